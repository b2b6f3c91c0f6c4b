//! Windows microphone privacy handling.
//!
//! On Windows 10 1803+, microphone access is controlled at Settings > Privacy >
//! Microphone. Unpackaged desktop apps get no consent prompt: activation of the
//! endpoint simply fails. Loopback capture is never restricted.

use windows::core::Error;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use loopmux_core::models::audio_models::SourceKind;
use loopmux_core::models::error::CaptureError;

use crate::wasapi_stream::{create_enumerator, ComScope};

const E_ACCESSDENIED: i32 = 0x8007_0005_u32 as i32;
const AUDCLNT_E_DEVICE_IN_USE: i32 = 0x8889_000A_u32 as i32;

/// Whether an activation failure means access was refused rather than a
/// missing or broken device.
pub fn is_access_denied(error: &Error) -> bool {
    let code = error.code().0;
    code == E_ACCESSDENIED || code == AUDCLNT_E_DEVICE_IN_USE
}

/// Map an `IMMDevice::Activate` failure to a pipeline error.
pub fn activation_error(kind: SourceKind, error: &Error) -> CaptureError {
    if kind == SourceKind::Microphone && is_access_denied(error) {
        CaptureError::DeviceUnavailable(
            "microphone access is blocked (Settings > Privacy > Microphone) or the device is in exclusive use".into(),
        )
    } else {
        CaptureError::DeviceUnavailable(format!("{} endpoint activation failed: {}", kind, error))
    }
}

/// Check whether the default microphone can be opened.
///
/// Returns `Ok(false)` when there is no capture device or access is denied.
pub fn check_microphone_permission() -> Result<bool, CaptureError> {
    let _com = ComScope::enter()?;
    let enumerator = create_enumerator()?;

    let device = match unsafe { enumerator.GetDefaultAudioEndpoint(eCapture, eConsole) } {
        Ok(d) => d,
        Err(_) => return Ok(false),
    };

    let result: Result<IAudioClient, _> = unsafe { device.Activate(CLSCTX_ALL, None) };
    match result {
        Ok(_) => Ok(true),
        Err(e) if is_access_denied(&e) => Ok(false),
        Err(e) => {
            log::warn!("unexpected error checking microphone access: {}", e);
            Ok(true)
        }
    }
}

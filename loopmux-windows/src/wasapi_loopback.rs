//! WASAPI loopback capture provider for system audio.
//!
//! Captures the mix going to a render endpoint using
//! `AUDCLNT_STREAMFLAGS_LOOPBACK`. No special permissions needed on Windows.
//!
//! - Captures one specific render device, not every device
//! - DRM-protected audio is delivered as silence
//! - Buffers only arrive while something is playing; the multiplexer's skew
//!   guard keeps the recording moving through silent stretches

use loopmux_core::models::audio_models::{Endpoint, SourceKind};
use loopmux_core::models::error::CaptureError;
use loopmux_core::models::format::AudioFormat;
use loopmux_core::traits::capture_provider::{CaptureProvider, RawBufferCallback, StreamErrorCallback};

use crate::wasapi_stream::WasapiStream;

/// WASAPI loopback capture of a render endpoint.
pub struct WasapiLoopbackCapture {
    stream: WasapiStream,
}

impl WasapiLoopbackCapture {
    /// Loopback of the default console render device.
    pub fn default_device() -> Self {
        let endpoint = Endpoint {
            id: "default-render".into(),
            name: "System Audio (Loopback)".into(),
            kind: SourceKind::Loopback,
            is_default: true,
        };
        Self {
            stream: WasapiStream::new(endpoint, None),
        }
    }

    /// Loopback of a specific render device from `DeviceEnumerator`.
    pub fn with_endpoint(endpoint: Endpoint) -> Self {
        let device_id = Some(endpoint.id.clone());
        Self {
            stream: WasapiStream::new(endpoint, device_id),
        }
    }
}

impl CaptureProvider for WasapiLoopbackCapture {
    fn endpoint(&self) -> Endpoint {
        self.stream.endpoint()
    }

    fn native_format(&self) -> Result<AudioFormat, CaptureError> {
        self.stream.native_format()
    }

    fn open(&mut self, format: &AudioFormat) -> Result<(), CaptureError> {
        self.stream.open(format)
    }

    fn start(&mut self, callback: RawBufferCallback, on_error: StreamErrorCallback) -> Result<(), CaptureError> {
        self.stream.start(callback, on_error)
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.stream.stop()
    }
}

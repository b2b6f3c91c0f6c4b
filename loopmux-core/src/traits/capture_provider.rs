use std::sync::Arc;

use crate::models::audio_models::Endpoint;
use crate::models::error::CaptureError;
use crate::models::format::AudioFormat;

/// Callback invoked when the hardware delivers a buffer.
///
/// The slice holds raw little-endian interleaved samples in the format the
/// provider was opened with. It is only valid for the duration of the call.
pub type RawBufferCallback = Arc<dyn Fn(&[u8]) + Send + Sync + 'static>;

/// Callback invoked when a running stream dies, e.g. the device was unplugged.
///
/// Fires at most once per `start`, from the hardware thread, after the last
/// buffer callback.
pub type StreamErrorCallback = Arc<dyn Fn(CaptureError) + Send + Sync + 'static>;

/// Interface for platform-specific audio endpoints.
///
/// Implemented by:
/// - `WasapiLoopbackCapture` (Windows, render endpoint in loopback mode)
/// - `WasapiMicCapture` (Windows, capture endpoint)
///
/// Providers never resample. A source asks for the native format, checks it
/// against the pipeline rate, and opens the provider in exactly that format.
pub trait CaptureProvider: Send + Sync {
    /// The device backing this provider.
    fn endpoint(&self) -> Endpoint;

    /// The format the device delivers without conversion.
    ///
    /// Fails with `DeviceUnavailable` when the device cannot be queried.
    fn native_format(&self) -> Result<AudioFormat, CaptureError>;

    /// Prepare the stream. `format` is always the value returned by
    /// [`native_format`](Self::native_format).
    fn open(&mut self, format: &AudioFormat) -> Result<(), CaptureError>;

    /// Begin delivering buffers to `callback`.
    ///
    /// The callback fires on a dedicated hardware thread; keep it short.
    /// Errors while setting the stream up are returned here; once `start`
    /// has returned `Ok`, failures go to `on_error`.
    fn start(&mut self, callback: RawBufferCallback, on_error: StreamErrorCallback) -> Result<(), CaptureError>;

    /// Stop delivering buffers. No callback runs after this returns.
    fn stop(&mut self) -> Result<(), CaptureError>;

    /// Release the device. Called once, after the last `stop`.
    fn close(&mut self) {}
}

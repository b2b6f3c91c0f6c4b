//! WASAPI microphone capture provider.
//!
//! Captures from a capture endpoint in shared mode, in the endpoint's mix
//! format. Access can be blocked by the Windows microphone privacy setting;
//! that surfaces as `DeviceUnavailable` when the source is opened.

use loopmux_core::models::audio_models::{Endpoint, SourceKind};
use loopmux_core::models::error::CaptureError;
use loopmux_core::models::format::AudioFormat;
use loopmux_core::traits::capture_provider::{CaptureProvider, RawBufferCallback, StreamErrorCallback};

use crate::wasapi_stream::WasapiStream;

/// WASAPI microphone capture.
pub struct WasapiMicCapture {
    stream: WasapiStream,
}

impl WasapiMicCapture {
    /// Capture from the system default microphone.
    pub fn default_device() -> Self {
        let endpoint = Endpoint {
            id: "default-capture".into(),
            name: "Default Microphone".into(),
            kind: SourceKind::Microphone,
            is_default: true,
        };
        Self {
            stream: WasapiStream::new(endpoint, None),
        }
    }

    /// Capture from a specific microphone from `DeviceEnumerator`.
    pub fn with_endpoint(endpoint: Endpoint) -> Self {
        let device_id = Some(endpoint.id.clone());
        Self {
            stream: WasapiStream::new(endpoint, device_id),
        }
    }
}

impl CaptureProvider for WasapiMicCapture {
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

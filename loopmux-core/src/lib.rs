//! # loopmux-core
//!
//! Platform-agnostic core for recording a render endpoint's loopback stream
//! and a microphone into one multi-channel file.
//!
//! Provides bounded per-source queues, format conversion, channel
//! multiplexing with gain and saturating clamp, a periodic drain scheduler,
//! WAV output and session orchestration. Platform backends (Windows WASAPI)
//! implement the `CaptureProvider` trait and plug into `CaptureSource`.
//!
//! ## Architecture
//!
//! ```text
//! loopmux-core (this crate)
//! ├── traits/       ← CaptureProvider, PipelineDelegate, DeviceDirectory
//! ├── models/       ← CaptureError, SessionState, PipelineConfiguration, AudioFormat, etc.
//! ├── capture/      ← CaptureSource (hardware buffer → SampleQueue)
//! ├── processing/   ← SampleQueue, ChannelMultiplexer, gain, conversion, level meter, WAV header
//! ├── session/      ← RecordingSession, DrainScheduler
//! └── storage/      ← SinkWriter, metadata sidecar
//! ```

pub mod capture;
pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use capture::source::{CaptureSource, FaultListener, LevelListener};
pub use models::audio_models::{
    AudioTrack, DeviceEvent, Endpoint, PipelineDiagnostics, SourceDiagnostics, SourceKind,
};
pub use models::config::{FrameAlignment, PipelineConfiguration, DEFAULT_GAIN};
pub use models::error::CaptureError;
pub use models::format::{AudioFormat, SampleEncoding};
pub use models::recording_result::{RecordingMetadata, RecordingResult};
pub use models::state::SessionState;
pub use processing::multiplexer::{ChannelMultiplexer, MuxInput, SourceBinding};
pub use processing::sample_queue::SampleQueue;
pub use session::recording::RecordingSession;
pub use session::scheduler::{DrainScheduler, DrainTask};
pub use storage::sink_writer::SinkWriter;
pub use traits::capture_delegate::PipelineDelegate;
pub use traits::capture_provider::{CaptureProvider, RawBufferCallback, StreamErrorCallback};
pub use traits::device_directory::{DeviceDirectory, DeviceEventBus};

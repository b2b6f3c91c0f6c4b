//! # loopmux-windows
//!
//! Windows WASAPI backend for loopmux.
//!
//! Provides:
//! - `WasapiLoopbackCapture`: render endpoint captured in loopback mode
//! - `WasapiMicCapture`: capture endpoint (microphone)
//! - `DeviceEnumerator`: MMDevice enumeration and endpoint notifications,
//!   implementing the core `DeviceDirectory` trait
//! - `permissions`: Windows microphone privacy check
//!
//! Both providers report the endpoint's shared-mode mix format as their
//! native format and deliver raw buffers in it; conversion happens in the
//! core's `CaptureSource`.
//!
//! ## Platform Requirements
//! - Windows 10 1703+ (build 15063)
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use loopmux_core::{CaptureSource, PipelineConfiguration, RecordingSession};
//! use loopmux_windows::{WasapiLoopbackCapture, WasapiMicCapture};
//!
//! let config = PipelineConfiguration::default();
//! let format = config.output_format();
//! let loopback = CaptureSource::open(Box::new(WasapiLoopbackCapture::default_device()), &format, config.queue_frames())?;
//! let mic = CaptureSource::open(Box::new(WasapiMicCapture::default_device()), &format, config.queue_frames())?;
//! let mut session = RecordingSession::new(loopback, mic, config)?;
//! session.start()?;
//! ```

pub mod mix_format;

#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod permissions;
#[cfg(target_os = "windows")]
pub mod wasapi_loopback;
#[cfg(target_os = "windows")]
pub mod wasapi_mic;
#[cfg(target_os = "windows")]
mod wasapi_stream;

#[cfg(target_os = "windows")]
pub use device_enumerator::DeviceEnumerator;
#[cfg(target_os = "windows")]
pub use wasapi_loopback::WasapiLoopbackCapture;
#[cfg(target_os = "windows")]
pub use wasapi_mic::WasapiMicCapture;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which hardware stream a capture source reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// The mix a render endpoint is currently playing.
    Loopback,
    Microphone,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loopback => f.write_str("loopback"),
            Self::Microphone => f.write_str("microphone"),
        }
    }
}

/// An audio endpoint available for capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub id: String,
    pub name: String,
    pub kind: SourceKind,
    pub is_default: bool,
}

/// Device topology change published by a device directory.
///
/// The pipeline never consumes these; the control layer decides whether a
/// change warrants re-opening a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Added { id: String },
    Removed { id: String },
    DefaultChanged { kind: SourceKind, id: String },
    StateChanged { id: String, active: bool },
}

/// An output channel of a recording and the source feeding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTrack {
    pub source: SourceKind,
    pub source_channel: u16,
    pub output_channel: u16,
}

/// Per-source capture counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceDiagnostics {
    pub callback_count: u64,
    pub samples_accepted: u64,
    /// Samples discarded by the drop-newest overflow policy.
    pub samples_dropped: u64,
    pub format: String,
    /// Error that ended the stream while recording, if any.
    pub fault: Option<String>,
}

/// Diagnostics for debugging a recording session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineDiagnostics {
    pub loopback: SourceDiagnostics,
    pub microphone: SourceDiagnostics,
    pub ticks: u64,
    pub frames_written: u64,
    pub write_errors: u64,
}

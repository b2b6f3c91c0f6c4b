use thiserror::Error;

/// Errors surfaced by the capture pipeline.
///
/// Queue overflow is deliberately absent: it is bounded by the drop-newest
/// policy and reported through diagnostics counters instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("format unsupported: {0}")]
    FormatUnsupported(String),

    #[error("invalid channel mapping: {0}")]
    InvalidMapping(String),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("already started")]
    AlreadyStarted,

    #[error("already stopped")]
    AlreadyStopped,

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

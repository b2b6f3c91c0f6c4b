use super::error::CaptureError;

/// Recording session state machine.
///
/// State transitions:
/// ```text
/// idle → recording → stopped
///            ↓
///         failed ──(stop)──→ stopped
/// ```
///
/// The session owns this value and hands it to the drain scheduler explicitly.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Recording,
    /// The sink became unusable mid-recording; drain ticks are no-ops.
    Failed(CaptureError),
    Stopped,
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Whether the sink still needs finalizing.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Recording | Self::Failed(_))
    }
}

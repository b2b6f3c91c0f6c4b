use crate::models::audio_models::SourceKind;
use crate::models::error::CaptureError;
use crate::models::recording_result::RecordingResult;
use crate::models::state::SessionState;

/// Event delegate for recording session notifications.
///
/// `on_level` is called from the hardware callback threads, the rest from
/// whichever thread drives the session or the drain scheduler. Implementations
/// should marshal to a UI thread if needed and must not block.
pub trait PipelineDelegate: Send + Sync {
    /// Called when the session state changes.
    fn on_state_changed(&self, state: &SessionState);

    /// Mean absolute magnitude of one hardware buffer, keyed by source.
    fn on_level(&self, source: SourceKind, magnitude: f32);

    /// Called when an error occurs during recording.
    fn on_error(&self, error: &CaptureError);

    /// Called when recording completes and the file is finalized.
    fn on_recording_finished(&self, result: &RecordingResult);
}

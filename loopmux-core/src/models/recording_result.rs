use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::audio_models::AudioTrack;
use super::format::AudioFormat;

/// Result returned when a recording session is stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    pub file_path: PathBuf,
    pub frames_written: u64,
    pub duration_secs: f64,
    pub metadata: RecordingMetadata,
    pub checksum: String,
}

/// Metadata stored alongside a recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub id: String,
    pub file_path: String,
    pub format: AudioFormat,
    pub frames_written: u64,
    pub duration_secs: f64,
    pub checksum: String,
    pub started_at: String,
    pub tracks: Vec<AudioTrack>,
    /// Set when the sink failed mid-recording and the file holds a truncated take.
    pub failure: Option<String>,
}

impl RecordingMetadata {
    pub fn new(
        file_path: &str,
        format: AudioFormat,
        frames_written: u64,
        checksum: &str,
        started_at: chrono::DateTime<chrono::Local>,
        tracks: Vec<AudioTrack>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file_path: file_path.to_string(),
            format,
            frames_written,
            duration_secs: frames_written as f64 / format.sample_rate as f64,
            checksum: checksum.to_string(),
            started_at: started_at.to_rfc3339(),
            tracks,
            failure: None,
        }
    }
}

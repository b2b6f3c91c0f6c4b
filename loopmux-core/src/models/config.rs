use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::format::{AudioFormat, SampleEncoding};

/// Gain applied when none is configured. Unity: sources are recorded as captured.
pub const DEFAULT_GAIN: f32 = 1.0;

/// How the multiplexer lines up sources whose queues hold different amounts of audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameAlignment {
    /// Emit only the frames every source can supply; the surplus stays queued.
    ///
    /// Once the leading source is more than `max_skew` ahead, the excess is
    /// emitted with silence in the lagging channels so a stalled device
    /// cannot hold the recording back indefinitely.
    TruncateToShortest,
    /// Emit everything the fullest source holds, padding the others with silence.
    PadWithSilence,
}

/// Configuration for a recording session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfiguration {
    /// Rate shared by both sources and the output file (default: 44100).
    pub sample_rate: u32,

    /// Encoding of the output file. Valid values: `Int16`, `Float32`.
    pub output_encoding: SampleEncoding,

    /// Number of channels in the output file (default: 2).
    pub output_channels: u16,

    /// Drain scheduler period (default: 10 ms). Valid range 1..=100 ms.
    pub drain_interval: Duration,

    /// Audio each sample queue may hold before dropping input (default: 1 s).
    pub queue_capacity: Duration,

    pub loopback_gain: f32,
    pub mic_gain: f32,

    pub alignment: FrameAlignment,

    /// Largest backlog difference tolerated between sources under
    /// `TruncateToShortest` (default: 200 ms).
    pub max_skew: Duration,

    /// Directory for generated recording file names.
    pub output_directory: PathBuf,

    /// File name prefix; the start time is appended.
    pub file_prefix: String,

    /// Write a `.metadata.json` sidecar next to the recording.
    pub write_metadata: bool,
}

impl PipelineConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample rate must be positive".into());
        }
        if !matches!(self.output_encoding, SampleEncoding::Int16 | SampleEncoding::Float32) {
            return Err(format!("unsupported output encoding: {}", self.output_encoding));
        }
        if self.output_channels == 0 {
            return Err("output channel count must be positive".into());
        }
        let interval_ms = self.drain_interval.as_millis();
        if !(1..=100).contains(&interval_ms) {
            return Err(format!("drain interval out of range: {} ms", interval_ms));
        }
        if self.queue_capacity < self.drain_interval {
            return Err("queue capacity must cover at least one drain interval".into());
        }
        // A backlog past the queue capacity is dropped before the skew guard can release it.
        if self.alignment == FrameAlignment::TruncateToShortest && self.max_skew >= self.queue_capacity {
            return Err(format!(
                "max skew ({} ms) must be shorter than the queue capacity ({} ms)",
                self.max_skew.as_millis(),
                self.queue_capacity.as_millis()
            ));
        }
        for (name, gain) in [("loopback", self.loopback_gain), ("mic", self.mic_gain)] {
            if !gain.is_finite() || gain < 0.0 {
                return Err(format!("invalid {} gain: {}", name, gain));
            }
        }
        Ok(())
    }

    /// Format of the written container.
    pub fn output_format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.output_encoding, self.output_channels)
    }

    /// Frames covered by one drain interval, rounded up.
    pub fn frames_per_tick(&self) -> usize {
        let nanos = self.sample_rate as u128 * self.drain_interval.as_nanos();
        nanos.div_ceil(1_000_000_000) as usize
    }

    /// Queue capacity in frames.
    pub fn queue_frames(&self) -> usize {
        (self.sample_rate as f64 * self.queue_capacity.as_secs_f64()).ceil() as usize
    }

    pub fn max_skew_frames(&self) -> usize {
        (self.sample_rate as f64 * self.max_skew.as_secs_f64()) as usize
    }
}

impl Default for PipelineConfiguration {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            output_encoding: SampleEncoding::Int16,
            output_channels: 2,
            drain_interval: Duration::from_millis(10),
            queue_capacity: Duration::from_secs(1),
            loopback_gain: DEFAULT_GAIN,
            mic_gain: DEFAULT_GAIN,
            alignment: FrameAlignment::TruncateToShortest,
            max_skew: Duration::from_millis(200),
            output_directory: PathBuf::from("."),
            file_prefix: "dual_channel_audio".into(),
            write_metadata: false,
        }
    }
}

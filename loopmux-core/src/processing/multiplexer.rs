use std::sync::Arc;

use crate::models::config::{FrameAlignment, DEFAULT_GAIN};
use crate::models::error::CaptureError;
use crate::processing::gain;
use crate::processing::sample_queue::SampleQueue;

/// Routes one channel of one source into one output channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceBinding {
    pub source_index: usize,
    pub source_channel: u16,
    pub output_channel: u16,
    /// Overrides the source gain for this binding only.
    pub gain: Option<f32>,
}

/// A source registered with the multiplexer.
#[derive(Debug, Clone)]
pub struct MuxInput {
    pub queue: Arc<SampleQueue>,
    pub gain: f32,
}

impl MuxInput {
    pub fn new(queue: Arc<SampleQueue>) -> Self {
        Self {
            queue,
            gain: DEFAULT_GAIN,
        }
    }

    pub fn with_gain(queue: Arc<SampleQueue>, gain: f32) -> Self {
        Self { queue, gain }
    }
}

/// Combines N independently clocked sample queues into one interleaved
/// M-channel stream.
///
/// Each output channel is the saturating sum of every source channel bound to
/// it, each scaled by its gain. Unbound output channels stay silent. Sources
/// are drained on every read whether or not they are bound, so their queues
/// keep moving in step.
///
/// ```text
/// [queue 0] ─┐  bindings + gain   ┌→ out 0
///            ├──────────────────→ ┤
/// [queue 1] ─┘      sum, clamp    └→ out 1
/// ```
#[derive(Debug)]
pub struct ChannelMultiplexer {
    sources: Vec<MuxInput>,
    output_channels: u16,
    bindings: Vec<SourceBinding>,
    alignment: FrameAlignment,
    max_skew_frames: usize,
    scratch: Vec<Vec<f32>>,
    padded_frames: u64,
    /// Set once the skew guard engages with a source empty; cleared when
    /// every source has audio again.
    stalled: bool,
}

impl ChannelMultiplexer {
    pub fn new(sources: Vec<MuxInput>, output_channels: u16) -> Result<Self, CaptureError> {
        if output_channels == 0 {
            return Err(CaptureError::ConfigurationFailed(
                "output channel count must be positive".into(),
            ));
        }
        for input in &sources {
            gain::validate_gain(input.gain)?;
        }
        let scratch = vec![Vec::new(); sources.len()];
        Ok(Self {
            sources,
            output_channels,
            bindings: Vec::new(),
            alignment: FrameAlignment::TruncateToShortest,
            max_skew_frames: usize::MAX,
            scratch,
            padded_frames: 0,
            stalled: false,
        })
    }

    /// Select the alignment policy. `max_skew_frames` only affects
    /// [`FrameAlignment::TruncateToShortest`].
    pub fn with_alignment(mut self, alignment: FrameAlignment, max_skew_frames: usize) -> Self {
        self.alignment = alignment;
        self.max_skew_frames = max_skew_frames;
        self
    }

    /// Register a binding at the source's own gain.
    pub fn map(&mut self, source_index: usize, source_channel: u16, output_channel: u16) -> Result<(), CaptureError> {
        self.add_binding(SourceBinding {
            source_index,
            source_channel,
            output_channel,
            gain: None,
        })
    }

    /// Register a binding with its own gain.
    pub fn map_with_gain(
        &mut self,
        source_index: usize,
        source_channel: u16,
        output_channel: u16,
        gain: f32,
    ) -> Result<(), CaptureError> {
        let gain = gain::validate_gain(gain)?;
        self.add_binding(SourceBinding {
            source_index,
            source_channel,
            output_channel,
            gain: Some(gain),
        })
    }

    fn add_binding(&mut self, binding: SourceBinding) -> Result<(), CaptureError> {
        let source = self.sources.get(binding.source_index).ok_or_else(|| {
            CaptureError::InvalidMapping(format!(
                "source index {} out of range ({} sources)",
                binding.source_index,
                self.sources.len()
            ))
        })?;
        if binding.source_channel >= source.queue.channels() {
            return Err(CaptureError::InvalidMapping(format!(
                "source {} has {} channels, channel {} requested",
                binding.source_index,
                source.queue.channels(),
                binding.source_channel
            )));
        }
        if binding.output_channel >= self.output_channels {
            return Err(CaptureError::InvalidMapping(format!(
                "output channel {} out of range ({} channels)",
                binding.output_channel, self.output_channels
            )));
        }
        log::debug!(
            "bound source {} ch {} -> output ch {}",
            binding.source_index,
            binding.source_channel,
            binding.output_channel
        );
        self.bindings.push(binding);
        Ok(())
    }

    pub fn set_source_gain(&mut self, source_index: usize, gain: f32) -> Result<(), CaptureError> {
        let gain = gain::validate_gain(gain)?;
        let source = self.sources.get_mut(source_index).ok_or_else(|| {
            CaptureError::InvalidMapping(format!("source index {} out of range", source_index))
        })?;
        source.gain = gain;
        Ok(())
    }

    /// Drop every binding; all output channels become silent.
    pub fn clear_bindings(&mut self) {
        self.bindings.clear();
    }

    pub fn bindings(&self) -> &[SourceBinding] {
        &self.bindings
    }

    pub fn output_channels(&self) -> u16 {
        self.output_channels
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Total frames of silence inserted for sources that had nothing to give.
    pub fn padded_frames(&self) -> u64 {
        self.padded_frames
    }

    /// Produce up to `frame_count` interleaved output frames under the
    /// configured alignment policy. May return an empty block.
    pub fn read(&mut self, frame_count: usize) -> Vec<f32> {
        let frames = self.frames_to_emit(frame_count, false);
        self.mix(frames)
    }

    /// Like [`read`](Self::read) but drains as much as the fullest source
    /// holds, padding the others. Used for the final drain when capture stops.
    pub fn flush(&mut self, frame_count: usize) -> Vec<f32> {
        let frames = self.frames_to_emit(frame_count, true);
        self.mix(frames)
    }

    /// True while a stalled source is being padded with silence.
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    fn frames_to_emit(&mut self, frame_count: usize, draining: bool) -> usize {
        let mut shortest = usize::MAX;
        let mut longest = 0;
        for source in &self.sources {
            let available = source.queue.available_frames();
            shortest = shortest.min(available);
            longest = longest.max(available);
        }
        if self.sources.is_empty() {
            return 0;
        }

        let frames = match (draining, self.alignment) {
            (true, _) | (false, FrameAlignment::PadWithSilence) => longest,
            (false, FrameAlignment::TruncateToShortest) => {
                if shortest > 0 {
                    if self.stalled {
                        log::debug!("stalled source resumed");
                    }
                    self.stalled = false;
                } else if longest > self.max_skew_frames && !self.stalled {
                    log::debug!("source stalled, padding with silence");
                    self.stalled = true;
                }
                // While a source is empty past the guard, drain the leaders
                // completely so they hold no backlog when it resumes.
                if self.stalled {
                    longest
                } else {
                    shortest.max(longest.saturating_sub(self.max_skew_frames))
                }
            }
        };
        frames.min(frame_count)
    }

    fn mix(&mut self, frames: usize) -> Vec<f32> {
        if frames == 0 {
            return Vec::new();
        }

        let mut popped = Vec::with_capacity(self.sources.len());
        for (source, scratch) in self.sources.iter().zip(self.scratch.iter_mut()) {
            scratch.clear();
            let got = source.queue.pop_frames_into(frames, scratch);
            if got < frames {
                self.padded_frames += (frames - got) as u64;
            }
            popped.push(got);
        }

        let out_channels = self.output_channels as usize;
        let mut output = vec![0.0f32; frames * out_channels];
        for binding in &self.bindings {
            let source = &self.sources[binding.source_index];
            let samples = &self.scratch[binding.source_index];
            let in_channels = source.queue.channels() as usize;
            let gain = binding.gain.unwrap_or(source.gain);
            let src_ch = binding.source_channel as usize;
            let out_ch = binding.output_channel as usize;

            // Frames past `popped` are silence and contribute nothing.
            for frame in 0..popped[binding.source_index] {
                gain::accumulate(
                    &mut output[frame * out_channels + out_ch],
                    samples[frame * in_channels + src_ch],
                    gain,
                );
            }
        }

        gain::clamp_block(&mut output);
        output
    }
}

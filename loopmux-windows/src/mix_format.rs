//! Translation of a WASAPI mix format (`WAVEFORMATEX`/`WAVEFORMATEXTENSIBLE`)
//! into the core `AudioFormat`.
//!
//! Kept free of Windows types so the mapping is testable on every platform;
//! the WASAPI modules copy the relevant header fields into [`WaveDescriptor`].

use loopmux_core::models::error::CaptureError;
use loopmux_core::models::format::{AudioFormat, SampleEncoding};

pub const WAVE_FORMAT_PCM: u16 = 0x0001;
pub const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
pub const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// The `WAVEFORMATEX` fields that determine how a buffer is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveDescriptor {
    pub sample_rate: u32,
    pub channels: u16,
    pub format_tag: u16,
    pub bits_per_sample: u16,
    /// For `WAVE_FORMAT_EXTENSIBLE`: the format tag embedded in the first
    /// field of the `SubFormat` GUID (`KSDATAFORMAT_SUBTYPE_PCM` → 1,
    /// `KSDATAFORMAT_SUBTYPE_IEEE_FLOAT` → 3).
    pub sub_format_tag: Option<u16>,
}

impl WaveDescriptor {
    /// Map to the core format. The container width decides the encoding: a
    /// 24-bit-valid sample in a 32-bit slot is decoded as `Int32`.
    pub fn to_audio_format(&self) -> Result<AudioFormat, CaptureError> {
        let tag = if self.format_tag == WAVE_FORMAT_EXTENSIBLE {
            self.sub_format_tag.ok_or_else(|| {
                CaptureError::FormatUnsupported("extensible mix format without a sub-format".into())
            })?
        } else {
            self.format_tag
        };

        let encoding = match (tag, self.bits_per_sample) {
            (WAVE_FORMAT_PCM, 16) => SampleEncoding::Int16,
            (WAVE_FORMAT_PCM, 24) => SampleEncoding::Int24,
            (WAVE_FORMAT_PCM, 32) => SampleEncoding::Int32,
            (WAVE_FORMAT_IEEE_FLOAT, 32) => SampleEncoding::Float32,
            (tag, bits) => {
                return Err(CaptureError::FormatUnsupported(format!(
                    "mix format tag {:#06x} with {} bits per sample",
                    tag, bits
                )))
            }
        };

        let format = AudioFormat::new(self.sample_rate, encoding, self.channels);
        format.validate()?;
        Ok(format)
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::CaptureError;

/// On-the-wire sample representation of a raw hardware buffer or an output file.
///
/// All encodings are little-endian. `Int24` is packed (3 bytes per sample).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleEncoding {
    Int16,
    Int24,
    Int32,
    Float32,
}

impl SampleEncoding {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::Int16 => 2,
            Self::Int24 => 3,
            Self::Int32 | Self::Float32 => 4,
        }
    }

    pub fn bits_per_sample(self) -> u16 {
        (self.bytes_per_sample() * 8) as u16
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float32)
    }
}

impl fmt::Display for SampleEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Int16 => "s16le",
            Self::Int24 => "s24le",
            Self::Int32 => "s32le",
            Self::Float32 => "f32le",
        };
        f.write_str(name)
    }
}

/// Sample rate, encoding and channel count of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub encoding: SampleEncoding,
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, encoding: SampleEncoding, channels: u16) -> Self {
        Self {
            sample_rate,
            encoding,
            channels,
        }
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.sample_rate == 0 {
            return Err(CaptureError::FormatUnsupported("sample rate must be positive".into()));
        }
        if self.channels == 0 {
            return Err(CaptureError::FormatUnsupported("channel count must be positive".into()));
        }
        Ok(())
    }

    /// Bytes occupied by one interleaved frame.
    pub fn block_align(&self) -> usize {
        self.encoding.bytes_per_sample() * self.channels as usize
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }

    /// Number of whole frames contained in `byte_count` bytes.
    pub fn frames_in(&self, byte_count: usize) -> usize {
        byte_count / self.block_align()
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz {} x{}", self.sample_rate, self.encoding, self.channels)
    }
}

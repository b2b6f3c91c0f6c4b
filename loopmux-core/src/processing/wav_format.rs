//! WAV container layout.
//!
//! Generates the canonical 44-byte RIFF header and the values for its length
//! fields once the amount of audio is known.

use crate::models::format::AudioFormat;

/// Size of the canonical WAV RIFF header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

/// Byte offset of the RIFF chunk size (file size - 8).
pub const RIFF_SIZE_OFFSET: u64 = 4;

/// Byte offset of the data chunk size.
pub const DATA_SIZE_OFFSET: u64 = 40;

const FORMAT_PCM: u16 = 1;
const FORMAT_IEEE_FLOAT: u16 = 3;

/// Largest data chunk a 32-bit RIFF size field can describe.
pub const MAX_DATA_SIZE: u64 = u32::MAX as u64 - (WAV_HEADER_SIZE as u64 - 8);

/// Generate a 44-byte WAV RIFF header for `format`.
///
/// Integer encodings use format code 1 (PCM), `Float32` uses 3 (IEEE float).
///
/// Layout:
/// ```text
/// [0-3]    "RIFF"
/// [4-7]    36 + data_size
/// [8-11]   "WAVE"
/// [12-15]  "fmt "
/// [16-19]  16 (format chunk size)
/// [20-21]  format code
/// [22-23]  channels
/// [24-27]  sample_rate
/// [28-31]  byte_rate = sample_rate * block_align
/// [32-33]  block_align = channels * bytes_per_sample
/// [34-35]  bits_per_sample
/// [36-39]  "data"
/// [40-43]  data_size
/// ```
pub fn generate_wav_header(format: &AudioFormat, data_size: u32) -> [u8; WAV_HEADER_SIZE] {
    let format_code = if format.encoding.is_float() {
        FORMAT_IEEE_FLOAT
    } else {
        FORMAT_PCM
    };
    let chunk_size = 36 + data_size;

    let mut header = [0u8; WAV_HEADER_SIZE];

    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&chunk_size.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&format_code.to_le_bytes());
    header[22..24].copy_from_slice(&format.channels.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&format.byte_rate().to_le_bytes());
    header[32..34].copy_from_slice(&(format.block_align() as u16).to_le_bytes());
    header[34..36].copy_from_slice(&format.encoding.bits_per_sample().to_le_bytes());

    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    header
}

/// RIFF chunk size field value for `data_size` bytes of audio.
pub fn riff_size(data_size: u64) -> u32 {
    (data_size.min(MAX_DATA_SIZE) + WAV_HEADER_SIZE as u64 - 8) as u32
}

/// Data chunk size field value, saturated at the 32-bit limit.
pub fn data_size_field(data_size: u64) -> u32 {
    data_size.min(MAX_DATA_SIZE) as u32
}

//! Sample format normalization.
//!
//! Integer PCM is scaled by its full-scale magnitude (2^(bits-1)), so every
//! 16-bit value survives a decode → encode round trip unchanged.

use crate::models::format::SampleEncoding;

const I16_SCALE: f32 = 32768.0;
const I24_SCALE: f32 = 8_388_608.0;
const I32_SCALE: f64 = 2_147_483_648.0;

/// Decode little-endian raw bytes into normalized samples, appending to `out`.
///
/// Trailing bytes that do not form a whole sample are ignored.
pub fn decode_into(raw: &[u8], encoding: SampleEncoding, out: &mut Vec<f32>) {
    let width = encoding.bytes_per_sample();
    out.reserve(raw.len() / width);
    let chunks = raw.chunks_exact(width);
    match encoding {
        SampleEncoding::Int16 => {
            out.extend(chunks.map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / I16_SCALE));
        }
        SampleEncoding::Int24 => {
            out.extend(chunks.map(|b| {
                // Sign-extend by placing the 24 bits in the top of an i32.
                let value = i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8;
                value as f32 / I24_SCALE
            }));
        }
        SampleEncoding::Int32 => {
            out.extend(chunks.map(|b| {
                (i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64 / I32_SCALE) as f32
            }));
        }
        SampleEncoding::Float32 => {
            out.extend(chunks.map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])));
        }
    }
}

/// Decode raw bytes into a new buffer.
pub fn decode(raw: &[u8], encoding: SampleEncoding) -> Vec<f32> {
    let mut out = Vec::new();
    decode_into(raw, encoding, &mut out);
    out
}

/// Pin a normalized sample to [-1.0, 1.0]. NaN becomes silence.
#[inline]
pub fn clamp_unit(sample: f32) -> f32 {
    if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    }
}

/// Saturating conversion of a normalized sample to 16-bit PCM.
#[inline]
pub fn to_i16(sample: f32) -> i16 {
    // `as` from f32 saturates at the integer bounds and maps NaN to 0.
    (clamp_unit(sample) * I16_SCALE).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Encode normalized samples as little-endian bytes in `encoding`.
///
/// Only the output encodings the sink supports are meaningful here;
/// `Int24`/`Int32` are encoded for completeness with the same saturation rules.
pub fn encode_into(samples: &[f32], encoding: SampleEncoding, out: &mut Vec<u8>) {
    out.reserve(samples.len() * encoding.bytes_per_sample());
    match encoding {
        SampleEncoding::Int16 => {
            for &s in samples {
                out.extend_from_slice(&to_i16(s).to_le_bytes());
            }
        }
        SampleEncoding::Int24 => {
            for &s in samples {
                let v = (clamp_unit(s) * I24_SCALE).round().clamp(-8_388_608.0, 8_388_607.0) as i32;
                out.extend_from_slice(&v.to_le_bytes()[..3]);
            }
        }
        SampleEncoding::Int32 => {
            for &s in samples {
                let v = (clamp_unit(s) as f64 * I32_SCALE).round() as i32;
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        SampleEncoding::Float32 => {
            for &s in samples {
                out.extend_from_slice(&clamp_unit(s).to_le_bytes());
            }
        }
    }
}

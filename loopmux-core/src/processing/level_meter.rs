//! Level metering for the excluded display layer.
//!
//! Pure functions; safe to call from a hardware callback.

use crate::models::format::SampleEncoding;
use crate::processing::convert;

/// Mean absolute magnitude (rectified average) of a raw buffer, in [0.0, 1.0].
///
/// Returns 0.0 for empty input or input whose length is not a whole number
/// of samples.
pub fn mean_magnitude(raw: &[u8], encoding: SampleEncoding) -> f32 {
    let width = encoding.bytes_per_sample();
    if raw.is_empty() || raw.len() % width != 0 {
        return 0.0;
    }
    let samples = convert::decode(raw, encoding);
    let sum: f64 = samples.iter().map(|s| convert::clamp_unit(*s).abs() as f64).sum();
    (sum / samples.len() as f64) as f32
}

/// RMS level of normalized samples.
pub fn rms_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Peak absolute level of normalized samples.
pub fn peak_level(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
}

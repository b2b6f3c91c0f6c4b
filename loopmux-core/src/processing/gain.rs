//! Gain and clamp stage.
//!
//! Order of operations is fixed: convert → gain → sum → clamp → emit.
//! Gain is applied per contribution before summation; the clamp runs once on
//! the summed output so two loud sources saturate instead of wrapping.

use crate::models::error::CaptureError;
use crate::processing::convert;

/// Check a gain value is usable: finite and non-negative.
pub fn validate_gain(gain: f32) -> Result<f32, CaptureError> {
    if gain.is_finite() && gain >= 0.0 {
        Ok(gain)
    } else {
        Err(CaptureError::ConfigurationFailed(format!("invalid gain: {}", gain)))
    }
}

/// Add `sample * gain` into an accumulator.
#[inline]
pub fn accumulate(acc: &mut f32, sample: f32, gain: f32) {
    *acc += sample * gain;
}

/// Pin every summed sample to the representable range [-1.0, 1.0].
pub fn clamp_block(block: &mut [f32]) {
    for sample in block.iter_mut() {
        *sample = convert::clamp_unit(*sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_negative_and_non_finite() {
        assert!(validate_gain(-0.1).is_err());
        assert!(validate_gain(f32::INFINITY).is_err());
        assert!(validate_gain(f32::NAN).is_err());
        assert_eq!(validate_gain(0.0), Ok(0.0));
        assert_eq!(validate_gain(2.5), Ok(2.5));
    }

    #[test]
    fn gain_then_sum_then_clamp() {
        let mut acc = 0.0;
        accumulate(&mut acc, 0.6, 1.0);
        accumulate(&mut acc, 0.6, 1.0);
        let mut block = [acc, -acc, 0.25];
        clamp_block(&mut block);
        assert_eq!(block, [1.0, -1.0, 0.25]);
    }

    #[test]
    fn clamp_happens_after_sum_not_per_contribution() {
        // Clipping each contribution first would give 1.0 - 0.75 = 0.25.
        let mut acc = 0.0;
        accumulate(&mut acc, 0.75, 2.0);
        accumulate(&mut acc, -0.75, 1.0);
        let mut block = [acc];
        clamp_block(&mut block);
        assert_eq!(block, [0.75]);
    }
}

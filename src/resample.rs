//! Resampling of raw signatures to a fixed dimensionality.

use crate::config::Number;
use crate::vector_entry::FeatureVector;

/// Linearly interpolates `signature` at `target_len` evenly spaced positions
/// spanning `[0, len - 1]`. Empty when either side is empty.
pub fn resample(signature: &[Number], target_len: usize) -> Vec<Number> {
    let len = signature.len();
    if len == 0 || target_len == 0 {
        return Vec::new();
    }
    let last = (len - 1) as Number;
    (0..target_len)
        .map(|i| {
            let position = if target_len == 1 {
                0.0
            } else {
                i as Number * last / (target_len - 1) as Number
            };
            let lo = (position.floor() as usize).min(len - 1);
            let hi = (lo + 1).min(len - 1);
            let frac = position - lo as Number;
            signature[lo] + (signature[hi] - signature[lo]) * frac
        })
        .collect()
}

/// Resamples to `target_len` and scales to unit norm.
///
/// `None` means no usable fingerprint: an empty signature, a zero target
/// length, or a profile that resamples to all zeros. Any other finite
/// signature normalizes, however large or small its values.
pub fn resample_and_normalize(signature: &[Number], target_len: usize) -> Option<FeatureVector> {
    let resampled = resample(signature, target_len);
    if resampled.is_empty() {
        return None;
    }
    FeatureVector::normalized(resampled)
}

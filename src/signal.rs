//! Signal primitives
//!
//! Threshold-crossing detection and the small summary statistics shared by
//! the timeline and segmentation stages.

/// Indices where `intensity > threshold` changes value.
///
/// Index `i` is reported when sample `i` is on the other side of the threshold
/// from sample `i - 1`, so index 0 is never a crossing.
pub fn threshold_crossings(intensity: &[i64], threshold: i64) -> Vec<usize> {
    intensity
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| (pair[0] > threshold) != (pair[1] > threshold))
        .map(|(i, _)| i + 1)
        .collect()
}

/// Consecutive differences `values[i + 1] - values[i]`
pub fn diffs(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|pair| pair[1] - pair[0]).collect()
}

/// Median of the finite values, `None` when there are none
pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Median of consecutive differences
pub fn median_interval(times: &[f64]) -> Option<f64> {
    median(&diffs(times))
}

/// Arithmetic mean, `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Python-style slice `values[start..end:step]` where `end` may count from the back.
///
/// A negative `end` is taken relative to the length, matching the way block
/// ends are addressed as "second-to-last" or "last" crossings.
pub(crate) fn stepped_slice<T: Copy>(values: &[T], start: usize, end: isize, step: usize) -> Vec<T> {
    let len = values.len() as isize;
    let end = if end < 0 { (len + end).max(0) } else { end.min(len) };
    let end = end as usize;
    if start >= end || step == 0 {
        return Vec::new();
    }
    values[start..end].iter().step_by(step).copied().collect()
}

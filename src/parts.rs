//! Multi-part session concatenation
//!
//! Some sessions were recorded in several parts. Each part starts its clock at
//! zero, so later parts are shifted to begin one median interval after the
//! previous part's last sample.

use crate::error::SyncError;
use crate::signal::median_interval;
use crate::types::{DenseFrameTimeline, SensorSample};

/// Join per-part frame timelines into one; frame indices continue across parts
pub fn concat_timelines(parts: &[DenseFrameTimeline]) -> Result<DenseFrameTimeline, SyncError> {
    let times: Vec<&[f64]> = parts.iter().map(|p| p.times()).collect();
    concat_times(&times).map(DenseFrameTimeline::from_times)
}

/// Join per-part sensor logs; each part is zeroed to its own first sample first
pub fn concat_sensor_logs(parts: &[Vec<SensorSample>]) -> Result<Vec<SensorSample>, SyncError> {
    let zeroed: Vec<Vec<f64>> = parts
        .iter()
        .map(|part| {
            let t0 = part.first().map_or(0.0, |s| s.time);
            part.iter().map(|s| s.time - t0).collect()
        })
        .collect();
    let times: Vec<&[f64]> = zeroed.iter().map(Vec::as_slice).collect();
    let shifted = concat_times(&times)?;

    Ok(parts
        .iter()
        .flatten()
        .zip(shifted)
        .map(|(sample, time)| SensorSample::new(time, sample.intensity))
        .collect())
}

fn concat_times(parts: &[&[f64]]) -> Result<Vec<f64>, SyncError> {
    let (first, rest) = parts.split_first().ok_or(SyncError::EmptyInput)?;

    let mut out: Vec<f64> = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
    out.extend_from_slice(first);
    let mut previous_start = 0;

    for (i, part) in rest.iter().enumerate() {
        let previous = &out[previous_start..];
        let (last, dt) = match (previous.last(), median_interval(previous)) {
            (Some(&last), Some(dt)) => (last, dt),
            _ => {
                return Err(SyncError::InsufficientSamples(format!(
                    "part {i} has {} samples, at least 2 are needed to offset the next part",
                    previous.len()
                )))
            }
        };
        let offset = last + dt;
        tracing::debug!(part = i + 1, offset, "appending session part");

        previous_start = out.len();
        out.extend(part.iter().map(|t| t + offset));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn assert_times(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len(), "{actual:?}");
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn test_single_part_is_unchanged() {
        let part = DenseFrameTimeline::from_times(vec![0.0, 0.5, 1.0]);
        let joined = concat_timelines(&[part.clone()]).unwrap();
        assert_eq!(joined, part);
    }

    #[test]
    fn test_timelines_continue_after_median_interval() {
        let parts = vec![
            DenseFrameTimeline::from_times(vec![0.0, 0.1, 0.2, 0.5]),
            DenseFrameTimeline::from_times(vec![0.0, 0.2]),
            DenseFrameTimeline::from_times(vec![0.0, 1.0]),
        ];
        let joined = concat_timelines(&parts).unwrap();

        // first offset 0.5 + 0.1, second offset 0.8 + 0.2
        assert_times(joined.times(), &[0.0, 0.1, 0.2, 0.5, 0.6, 0.8, 1.0, 2.0]);
        assert_eq!(joined.last_frame_index(), Some(7));
    }

    #[test]
    fn test_sensor_parts_are_zeroed_then_shifted() {
        let parts = vec![
            vec![SensorSample::new(10.0, 1), SensorSample::new(10.5, 2), SensorSample::new(11.0, 3)],
            vec![SensorSample::new(3.0, 4), SensorSample::new(3.5, 5)],
        ];
        let joined = concat_sensor_logs(&parts).unwrap();

        let times: Vec<f64> = joined.iter().map(|s| s.time).collect();
        assert_times(&times, &[0.0, 0.5, 1.0, 1.5, 2.0]);
        let intensities: Vec<i64> = joined.iter().map(|s| s.intensity).collect();
        assert_eq!(intensities, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_empty_part_list() {
        assert!(matches!(concat_timelines(&[]), Err(SyncError::EmptyInput)));
        assert!(matches!(concat_sensor_logs(&[]), Err(SyncError::EmptyInput)));
    }

    #[test]
    fn test_short_part_cannot_offset_the_next() {
        let parts = vec![
            DenseFrameTimeline::from_times(vec![0.0]),
            DenseFrameTimeline::from_times(vec![0.0, 0.1]),
        ];
        assert!(matches!(
            concat_timelines(&parts),
            Err(SyncError::InsufficientSamples(_))
        ));

        // a short final part is fine
        let parts = vec![
            DenseFrameTimeline::from_times(vec![0.0, 0.1]),
            DenseFrameTimeline::from_times(vec![0.0]),
        ];
        assert_times(concat_timelines(&parts).unwrap().times(), &[0.0, 0.1, 0.2]);
    }
}

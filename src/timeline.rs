//! Frame timeline reconstruction
//!
//! Turns a sparse, duplicate-ridden (time, frame index) log into a dense
//! per-frame time array. Gaps in the frame index are filled by stepping the
//! global median sampling interval forward from the sample before the gap.
//! When the elapsed time spans more intervals than there are missing frame
//! slots, the surplus intervals are frames the recorder dropped without ever
//! assigning an index; that surplus is left at the end of the gap.

use crate::config::TimelineConfig;
use crate::error::SyncError;
use crate::signal::median_interval;
use crate::types::{DenseFrameTimeline, RawTimeFrameSample};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Result of reconstructing one session's frame timeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reconstruction {
    /// Dense per-frame times, zeroed to frame 0
    pub timeline: DenseFrameTimeline,
    /// Median sampling interval used as the reference rate (None for a single frame)
    pub dt_median: Option<f64>,
    /// Whether frame 0 had to be synthesised because the log started mid-count
    pub synthetic_first_frame: bool,
    /// Number of duplicate frame-index samples dropped
    pub duplicates_dropped: usize,
    /// Number of gap-filling passes run
    pub passes: usize,
    /// One entry per gap resolved in each pass
    pub repairs: Vec<GapRepair>,
}

impl Reconstruction {
    /// Frames never captured, summed over all repaired gaps
    pub fn dropped_frames(&self) -> u64 {
        self.repairs
            .iter()
            .map(|r| r.n_dropped_frames.max(0) as u64)
            .sum()
    }

    /// Total number of synthesised samples
    pub fn inserted_samples(&self) -> usize {
        self.repairs.iter().map(|r| r.inserted).sum()
    }
}

/// Bookkeeping for one resolved frame gap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapRepair {
    pub pass: usize,
    pub prev_frame: u64,
    pub next_frame: u64,
    /// Frame-index difference across the gap
    pub n_missing_frames: u64,
    /// Nominal sampling intervals spanned by the gap
    pub n_dts: i64,
    /// Intervals with no frame index at all (negative when time is compressed)
    pub n_dropped_frames: i64,
    /// Samples actually inserted
    pub inserted: usize,
    /// Local before/after view, only captured in diagnostic mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<GapWindow>,
}

/// Samples around a gap before and after it was filled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapWindow {
    pub before: Vec<RawTimeFrameSample>,
    pub after: Vec<RawTimeFrameSample>,
}

/// Reconstructs dense frame timelines from raw frame logs
#[derive(Debug, Clone, Default)]
pub struct FrameTimelineReconstructor {
    config: TimelineConfig,
}

impl FrameTimelineReconstructor {
    pub fn new(config: TimelineConfig) -> Self {
        Self { config }
    }

    /// Reconstruct the dense timeline of one session
    pub fn reconstruct(&self, raw: &[RawTimeFrameSample]) -> Result<Reconstruction, SyncError> {
        let prepared = prepare(raw)?;
        let mut samples = prepared.samples;

        let dt_median = median_interval(&samples.iter().map(|s| s.time).collect::<Vec<_>>());
        tracing::debug!(
            samples = samples.len(),
            dt_median = dt_median.unwrap_or(f64::NAN),
            "frame log prepared"
        );

        let mut repairs = Vec::new();
        let mut pass = 0;

        loop {
            let gaps = find_gaps(&samples);
            if gaps.is_empty() {
                break;
            }
            pass += 1;
            let dt = usable_interval(dt_median)?;

            let (filled, mut pass_repairs, placements) = self.fill_pass(&samples, &gaps, dt, pass);
            let inserted: usize = pass_repairs.iter().map(|r| r.inserted).sum();
            if inserted == 0 {
                let position = gaps[0];
                return Err(SyncError::NonConvergentGapFill {
                    pass,
                    position,
                    prev_frame: samples[position].frame_index,
                    next_frame: samples[position + 1].frame_index,
                });
            }

            if self.config.diagnostics {
                let ctx = self.config.diagnostic_context;
                for (repair, (&gap, &out_pos)) in pass_repairs
                    .iter_mut()
                    .zip(gaps.iter().zip(placements.iter()))
                {
                    repair.window = Some(GapWindow {
                        before: window(&samples, gap, 1, ctx),
                        after: window(&filled, out_pos, repair.inserted + 1, ctx),
                    });
                }
            }

            repairs.extend(pass_repairs);
            samples = filled;
        }

        let expected = samples.last().map(|s| s.frame_index as usize + 1).unwrap_or(0);
        if samples.len() != expected {
            return Err(SyncError::FatalReconstructionMismatch {
                expected,
                actual: samples.len(),
            });
        }

        let timeline = DenseFrameTimeline::from_times(samples.iter().map(|s| s.time).collect());
        tracing::debug!(
            frames = timeline.len(),
            passes = pass,
            gaps = repairs.len(),
            "frame timeline reconstructed"
        );

        Ok(Reconstruction {
            timeline,
            dt_median,
            synthetic_first_frame: prepared.synthetic_first_frame,
            duplicates_dropped: prepared.duplicates_dropped,
            passes: pass,
            repairs,
        })
    }

    /// Fill every gap found at the start of a pass in one merge.
    ///
    /// Returns the merged samples, one repair per gap and, per gap, the
    /// position of its `prev` sample in the merged output.
    fn fill_pass(
        &self,
        samples: &[RawTimeFrameSample],
        gaps: &[usize],
        dt: f64,
        pass: usize,
    ) -> (Vec<RawTimeFrameSample>, Vec<GapRepair>, Vec<usize>) {
        let mut out = Vec::with_capacity(samples.len());
        let mut repairs = Vec::with_capacity(gaps.len());
        let mut placements = Vec::with_capacity(gaps.len());
        let mut copied = 0;

        for &gap in gaps {
            out.extend_from_slice(&samples[copied..=gap]);
            copied = gap + 1;

            let prev = samples[gap];
            let next = samples[gap + 1];
            let plan = GapPlan::new(prev, next, dt);
            let new_samples = plan.samples();

            tracing::debug!(
                pass,
                prev_frame = prev.frame_index,
                next_frame = next.frame_index,
                n_dts = plan.n_dts,
                dropped = plan.n_dropped_frames,
                inserted = new_samples.len(),
                "filling frame gap"
            );

            placements.push(out.len() - 1);
            repairs.push(GapRepair {
                pass,
                prev_frame: prev.frame_index,
                next_frame: next.frame_index,
                n_missing_frames: plan.n_missing_frames,
                n_dts: plan.n_dts,
                n_dropped_frames: plan.n_dropped_frames,
                inserted: new_samples.len(),
                window: None,
            });
            out.extend(new_samples);
        }
        out.extend_from_slice(&samples[copied..]);

        (out, repairs, placements)
    }
}

/// Convenience wrapper with default settings
pub fn reconstruct_frame_timeline(
    raw: &[RawTimeFrameSample],
) -> Result<DenseFrameTimeline, SyncError> {
    FrameTimelineReconstructor::default()
        .reconstruct(raw)
        .map(|r| r.timeline)
}

/// Gap arithmetic for one (prev, next) pair
struct GapPlan {
    prev: RawTimeFrameSample,
    next: RawTimeFrameSample,
    dt: f64,
    n_missing_frames: u64,
    n_dts: i64,
    n_dropped_frames: i64,
}

impl GapPlan {
    fn new(prev: RawTimeFrameSample, next: RawTimeFrameSample, dt: f64) -> Self {
        let n_missing_frames = next.frame_index - prev.frame_index;
        let n_dts = ((next.time - prev.time) / dt).round() as i64;
        Self {
            prev,
            next,
            dt,
            n_missing_frames,
            n_dts,
            n_dropped_frames: n_dts - n_missing_frames as i64,
        }
    }

    /// Interior samples: frame `prev + k` at `prev.time + k * dt`.
    ///
    /// Only times strictly before `next.time` are available, so a gap whose
    /// elapsed time is too short is filled partially and left for a later pass.
    fn samples(&self) -> Vec<RawTimeFrameSample> {
        // n_dts - n_dropped_frames == n_missing_frames
        let n_new_times = (self.n_dts - self.n_dropped_frames) as u64;
        let available = ((self.next.time - self.prev.time) / self.dt).ceil().max(0.0) as u64;
        let count = n_new_times.min(available);

        (1..count)
            .map(|k| {
                RawTimeFrameSample::new(
                    self.prev.time + k as f64 * self.dt,
                    self.prev.frame_index + k,
                )
            })
            .collect()
    }
}

struct Prepared {
    samples: Vec<RawTimeFrameSample>,
    synthetic_first_frame: bool,
    duplicates_dropped: usize,
}

/// Validate, de-duplicate, zero and back-fill frame 0
fn prepare(raw: &[RawTimeFrameSample]) -> Result<Prepared, SyncError> {
    let first = raw.first().ok_or(SyncError::EmptyInput)?;

    for (i, pair) in raw.windows(2).enumerate() {
        if pair[1].time.is_nan() || pair[1].time < pair[0].time {
            return Err(SyncError::NonMonotonicTime {
                index: i + 1,
                previous: pair[0].time,
                current: pair[1].time,
            });
        }
    }

    let t0 = first.time;
    let mut seen = HashSet::with_capacity(raw.len());
    let mut samples: Vec<RawTimeFrameSample> = Vec::with_capacity(raw.len() + 1);
    for (i, sample) in raw.iter().enumerate() {
        if !seen.insert(sample.frame_index) {
            continue;
        }
        if let Some(last) = samples.last() {
            if sample.frame_index < last.frame_index {
                return Err(SyncError::NonMonotonicFrames {
                    index: i,
                    previous: last.frame_index,
                    current: sample.frame_index,
                });
            }
        }
        samples.push(RawTimeFrameSample::new(sample.time - t0, sample.frame_index));
    }
    let duplicates_dropped = raw.len() - samples.len();

    let first_frame = samples[0].frame_index;
    let synthetic_first_frame = first_frame != 0;
    if synthetic_first_frame {
        let times: Vec<f64> = samples.iter().map(|s| s.time).collect();
        let dt = median_interval(&times).ok_or_else(|| {
            SyncError::InsufficientSamples(format!(
                "log starts at frame {first_frame} with a single sample; cannot back-fill frame 0"
            ))
        })?;
        let dt = usable_interval(Some(dt))?;

        let offset = first_frame as f64 * dt;
        for sample in samples.iter_mut() {
            sample.time += offset;
        }
        samples.insert(0, RawTimeFrameSample::new(0.0, 0));
        tracing::debug!(first_frame, offset, "back-filled frame 0");
    }

    Ok(Prepared {
        samples,
        synthetic_first_frame,
        duplicates_dropped,
    })
}

fn usable_interval(dt: Option<f64>) -> Result<f64, SyncError> {
    match dt {
        Some(dt) if dt.is_finite() && dt > 0.0 => Ok(dt),
        Some(dt) => Err(SyncError::DegenerateSamplingInterval(dt)),
        None => Err(SyncError::InsufficientSamples(
            "fewer than two samples to estimate the sampling interval".to_string(),
        )),
    }
}

/// Positions `p` where frames `p` and `p + 1` are more than one index apart
fn find_gaps(samples: &[RawTimeFrameSample]) -> Vec<usize> {
    samples
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| pair[1].frame_index - pair[0].frame_index > 1)
        .map(|(i, _)| i)
        .collect()
}

/// `ctx` samples either side of `span + 1` samples starting at `start`
fn window(
    samples: &[RawTimeFrameSample],
    start: usize,
    span: usize,
    ctx: usize,
) -> Vec<RawTimeFrameSample> {
    let lo = start.saturating_sub(ctx);
    let hi = (start + span + 1 + ctx).min(samples.len());
    samples[lo..hi].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn log(pairs: &[(f64, u64)]) -> Vec<RawTimeFrameSample> {
        pairs
            .iter()
            .map(|&(t, f)| RawTimeFrameSample::new(t, f))
            .collect()
    }

    fn assert_times(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len(), "length mismatch: {actual:?}");
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn test_consecutive_log_is_only_zeroed() {
        let raw = log(&[(5.0, 0), (5.1, 1), (5.25, 2), (5.3, 3)]);
        let result = FrameTimelineReconstructor::default().reconstruct(&raw).unwrap();

        assert_times(result.timeline.times(), &[0.0, 0.1, 0.25, 0.3]);
        assert_eq!(result.timeline.len(), 4);
        assert!(result.repairs.is_empty());
        assert_eq!(result.passes, 0);
        assert!(!result.synthetic_first_frame);
    }

    #[test]
    fn test_fills_three_missing_frames() {
        // frames 5-7 missing between frame 4 (0.40s) and frame 8 (0.81s)
        let raw = log(&[
            (0.0, 0),
            (0.1, 1),
            (0.2, 2),
            (0.3, 3),
            (0.4, 4),
            (0.81, 8),
            (0.91, 9),
            (1.01, 10),
        ]);
        let result = FrameTimelineReconstructor::default().reconstruct(&raw).unwrap();

        let dt = result.dt_median.unwrap();
        assert!((dt - 0.1).abs() < 1e-9);
        assert_eq!(result.repairs.len(), 1);
        let repair = &result.repairs[0];
        assert_eq!(repair.n_missing_frames, 4);
        assert_eq!(repair.n_dts, 4);
        assert_eq!(repair.n_dropped_frames, 0);
        assert_eq!(repair.inserted, 3);

        assert_eq!(result.timeline.len(), 11);
        assert_times(
            &result.timeline.times()[4..9],
            &[0.4, 0.5, 0.6, 0.7, 0.81],
        );
    }

    #[test]
    fn test_gap_before_last_frame() {
        let raw = log(&[
            (0.0, 0),
            (0.1, 1),
            (0.2, 2),
            (0.3, 3),
            (0.4, 4),
            (0.81, 8),
        ]);
        let timeline = reconstruct_frame_timeline(&raw).unwrap();
        assert_eq!(timeline.len(), 9);
        assert_times(&timeline.times()[5..8], &[0.5, 0.6, 0.7]);
    }

    #[test]
    fn test_dropped_frame_time_left_at_gap_end() {
        // one missing index but two intervals elapsed: one frame was dropped
        let raw = log(&[(0.0, 0), (0.1, 1), (0.2, 2), (0.5, 4), (0.6, 5), (0.7, 6)]);
        let result = FrameTimelineReconstructor::default().reconstruct(&raw).unwrap();

        let repair = &result.repairs[0];
        assert_eq!(repair.n_missing_frames, 2);
        assert_eq!(repair.n_dts, 3);
        assert_eq!(repair.n_dropped_frames, 1);
        assert_eq!(repair.inserted, 1);
        assert_eq!(result.dropped_frames(), 1);
        assert_times(
            result.timeline.times(),
            &[0.0, 0.1, 0.2, 0.3, 0.5, 0.6, 0.7],
        );
    }

    #[test]
    fn test_multiple_gaps_filled_in_one_pass() {
        let raw = log(&[(0.0, 0), (0.1, 1), (0.3, 3), (0.4, 4), (0.7, 7), (0.8, 8)]);
        let result = FrameTimelineReconstructor::default().reconstruct(&raw).unwrap();

        assert_eq!(result.passes, 1);
        assert_eq!(result.repairs.len(), 2);
        assert_eq!(result.inserted_samples(), 3);
        assert_times(
            result.timeline.times(),
            &[0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8],
        );
    }

    #[test]
    fn test_back_fills_frame_zero() {
        let raw = log(&[(10.0, 3), (10.1, 4), (10.2, 5), (10.3, 6)]);
        let result = FrameTimelineReconstructor::default().reconstruct(&raw).unwrap();

        assert!(result.synthetic_first_frame);
        assert_times(
            result.timeline.times(),
            &[0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6],
        );
    }

    #[test]
    fn test_duplicates_keep_first_occurrence() {
        let raw = log(&[(0.0, 0), (0.05, 0), (0.1, 1), (0.15, 1), (0.2, 2)]);
        let result = FrameTimelineReconstructor::default().reconstruct(&raw).unwrap();

        assert_eq!(result.duplicates_dropped, 2);
        assert_times(result.timeline.times(), &[0.0, 0.1, 0.2]);
    }

    #[test]
    fn test_reconstruction_is_idempotent() {
        let raw = log(&[(2.0, 1), (2.1, 2), (2.4, 5), (2.5, 6), (2.6, 7)]);
        let reconstructor = FrameTimelineReconstructor::default();
        let first = reconstructor.reconstruct(&raw).unwrap();
        let second = reconstructor.reconstruct(&first.timeline.to_samples()).unwrap();

        assert_eq!(second.timeline, first.timeline);
        assert!(second.repairs.is_empty());
        assert!(!second.synthetic_first_frame);
    }

    #[test]
    fn test_compressed_gap_fails_instead_of_looping() {
        // four frame slots missing but less than one interval elapsed
        let raw = log(&[(0.0, 0), (0.1, 1), (0.2, 2), (0.25, 6), (0.35, 7), (0.45, 8)]);
        let err = FrameTimelineReconstructor::default()
            .reconstruct(&raw)
            .unwrap_err();
        match err {
            SyncError::NonConvergentGapFill {
                prev_frame,
                next_frame,
                ..
            } => {
                assert_eq!(prev_frame, 2);
                assert_eq!(next_frame, 6);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_decreasing_frame_index_rejected() {
        let raw = log(&[(0.0, 0), (0.1, 2), (0.2, 1)]);
        assert!(matches!(
            FrameTimelineReconstructor::default().reconstruct(&raw),
            Err(SyncError::NonMonotonicFrames { index: 2, .. })
        ));
    }

    #[test]
    fn test_decreasing_time_rejected() {
        let raw = log(&[(0.0, 0), (0.2, 1), (0.1, 2)]);
        assert!(matches!(
            FrameTimelineReconstructor::default().reconstruct(&raw),
            Err(SyncError::NonMonotonicTime { index: 2, .. })
        ));
    }

    #[test]
    fn test_empty_and_single_sample_logs() {
        assert!(matches!(
            FrameTimelineReconstructor::default().reconstruct(&[]),
            Err(SyncError::EmptyInput)
        ));

        let single = FrameTimelineReconstructor::default()
            .reconstruct(&log(&[(3.0, 0)]))
            .unwrap();
        assert_times(single.timeline.times(), &[0.0]);
        assert_eq!(single.dt_median, None);

        assert!(matches!(
            FrameTimelineReconstructor::default().reconstruct(&log(&[(3.0, 4)])),
            Err(SyncError::InsufficientSamples(_))
        ));
    }

    #[test]
    fn test_diagnostic_windows() {
        let config = TimelineConfig {
            diagnostics: true,
            diagnostic_context: 1,
        };
        let raw = log(&[(0.0, 0), (0.1, 1), (0.2, 2), (0.5, 5), (0.6, 6)]);
        let result = FrameTimelineReconstructor::new(config).reconstruct(&raw).unwrap();

        let window = result.repairs[0].window.as_ref().unwrap();
        let before: Vec<u64> = window.before.iter().map(|s| s.frame_index).collect();
        let after: Vec<u64> = window.after.iter().map(|s| s.frame_index).collect();
        assert_eq!(before, vec![1, 2, 5, 6]);
        assert_eq!(after, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_windows_absent_without_diagnostics() {
        let raw = log(&[(0.0, 0), (0.1, 1), (0.2, 2), (0.5, 5)]);
        let result = FrameTimelineReconstructor::default().reconstruct(&raw).unwrap();
        assert!(result.repairs.iter().all(|r| r.window.is_none()));
    }
}

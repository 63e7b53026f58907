//! Event onset extraction
//!
//! Reads trial event onsets out of a block segment. Every block opens with a
//! calibration region whose crossings are skipped; after that every second
//! crossing of the event threshold is a rising edge, i.e. an onset.
//!
//! Block duration comes from a late crossing when separator pulses exist. In
//! marker-pattern sessions no end marker is available and the duration is an
//! estimate: `last_onset + factor * mean(onset gaps)`. That heuristic has not
//! been calibrated against ground truth and should not be read as a hard
//! block boundary.

use crate::config::EventConfig;
use crate::error::SyncError;
use crate::signal::{diffs, mean, stepped_slice, threshold_crossings};
use crate::types::{BlockSegment, EventOnsetSet, SegmentationStrategy};

/// Extracts event onsets and block durations
#[derive(Debug, Clone, Default)]
pub struct EventOnsetExtractor {
    config: EventConfig,
}

impl EventOnsetExtractor {
    pub fn new(config: EventConfig) -> Self {
        Self { config }
    }

    /// Extract onsets for one block.
    ///
    /// `is_last` selects which late crossing closes the block in two-threshold
    /// mode: the second-to-last for every block but the final one.
    pub fn extract(
        &self,
        block: &BlockSegment,
        event_threshold: i64,
        strategy: SegmentationStrategy,
        is_last: bool,
    ) -> Result<EventOnsetSet, SyncError> {
        let times = block.times();
        let intensity = block.intensities();
        let crossings = threshold_crossings(&intensity, event_threshold);
        let stride = self.config.stride.max(1);

        // A block that starts above the threshold has lost the rise of its
        // first marker, so the calibration region holds one crossing fewer.
        let mut first = self.config.leading_crossings;
        if let Some(&c) = crossings.get(first) {
            if intensity[c] <= event_threshold {
                first = if first > 0 { first - 1 } else { 1 };
            }
        }

        let (onset_indices, end_crossing) = match strategy {
            SegmentationStrategy::TwoThreshold { .. } => {
                let end_offset: isize = if is_last { -1 } else { -2 };
                let from_end = end_offset.unsigned_abs();
                if crossings.len() < from_end {
                    return Err(SyncError::InsufficientEventCrossings {
                        block: block.index,
                        crossings: crossings.len(),
                    });
                }
                (
                    stepped_slice(&crossings, first, end_offset, stride),
                    Some(crossings[crossings.len() - from_end]),
                )
            }
            SegmentationStrategy::MarkerPattern => (
                stepped_slice(&crossings, first, crossings.len() as isize, stride),
                None,
            ),
        };

        let onset_times =
            strictly_increasing(block.index, onset_indices.iter().map(|&i| times[i]).collect());

        let (block_duration, duration_estimated) = match end_crossing {
            Some(end) => (times[end], false),
            None => {
                let mean_gap = mean(&diffs(&onset_times)).ok_or(
                    SyncError::InsufficientEventCrossings {
                        block: block.index,
                        crossings: crossings.len(),
                    },
                )?;
                let last = onset_times[onset_times.len() - 1];
                (last + self.config.fallback_duration_factor * mean_gap, true)
            }
        };

        tracing::debug!(
            block = block.index,
            onsets = onset_times.len(),
            duration = block_duration,
            estimated = duration_estimated,
            "extracted event onsets"
        );

        Ok(EventOnsetSet {
            block_index: block.index,
            onset_times,
            block_duration,
            duration_estimated,
        })
    }

    /// Extract onsets for every block of a session, in block order
    pub fn extract_all(
        &self,
        blocks: &[BlockSegment],
        event_threshold: i64,
        strategy: SegmentationStrategy,
    ) -> Result<Vec<EventOnsetSet>, SyncError> {
        blocks
            .iter()
            .enumerate()
            .map(|(i, block)| self.extract(block, event_threshold, strategy, i + 1 == blocks.len()))
            .collect()
    }
}

/// Drop onsets that do not advance time (duplicate sensor timestamps)
fn strictly_increasing(block: usize, times: Vec<f64>) -> Vec<f64> {
    let total = times.len();
    let mut kept: Vec<f64> = Vec::with_capacity(total);
    for t in times {
        if kept.last().map_or(true, |&last| t > last) {
            kept.push(t);
        }
    }
    if kept.len() < total {
        tracing::warn!(block, dropped = total - kept.len(), "dropped non-increasing onsets");
    }
    kept
}

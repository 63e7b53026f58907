//! Block segmentation
//!
//! Splits a session's light-sensor signal into experimental blocks. Each block
//! begins at the onset of its first calibration marker. Two ways of finding
//! that onset are supported:
//!
//! - **Two-threshold**: a high-intensity separator pulse precedes every block;
//!   the first marker onset after the separator's falling edge starts the block.
//! - **Marker pattern**: no separator exists; a block starts wherever a fixed
//!   number of marker crossings spans a known duration.

use crate::config::MarkerPatternConfig;
use crate::error::SyncError;
use crate::signal::threshold_crossings;
use crate::types::{validate_sensor_samples, BlockSegment, SegmentationStrategy, SensorSample};

/// Segments sensor signals into blocks
#[derive(Debug, Clone, Default)]
pub struct BlockSegmenter {
    marker_pattern: MarkerPatternConfig,
}

impl BlockSegmenter {
    pub fn new(marker_pattern: MarkerPatternConfig) -> Self {
        Self { marker_pattern }
    }

    /// Split `samples` into blocks.
    ///
    /// A session with no detectable block start is an error
    /// (`NoBlocksDetected` or `InsufficientMarkerPattern`), never an empty list.
    pub fn segment(
        &self,
        samples: &[SensorSample],
        apriltag_threshold: i64,
        strategy: SegmentationStrategy,
    ) -> Result<Vec<BlockSegment>, SyncError> {
        validate_sensor_samples(samples)?;
        let starts = self.block_starts(samples, apriltag_threshold, strategy)?;
        Ok(split_blocks(samples, &starts))
    }

    /// Sample indices where blocks begin, strictly increasing
    pub fn block_starts(
        &self,
        samples: &[SensorSample],
        apriltag_threshold: i64,
        strategy: SegmentationStrategy,
    ) -> Result<Vec<usize>, SyncError> {
        let intensity: Vec<i64> = samples.iter().map(|s| s.intensity).collect();

        match strategy {
            SegmentationStrategy::TwoThreshold {
                new_block_threshold,
            } => two_threshold_starts(&intensity, apriltag_threshold, new_block_threshold),
            SegmentationStrategy::MarkerPattern => {
                let times: Vec<f64> = samples.iter().map(|s| s.time).collect();
                marker_pattern_starts(&intensity, &times, apriltag_threshold, &self.marker_pattern)
            }
        }
    }
}

fn two_threshold_starts(
    intensity: &[i64],
    apriltag_threshold: i64,
    new_block_threshold: i64,
) -> Result<Vec<usize>, SyncError> {
    // Falling edges sit at odd positions only if the signal starts low.
    if let Some(&first) = intensity.first() {
        if first > new_block_threshold {
            return Err(SyncError::SignalStartsHigh {
                intensity: first,
                threshold: new_block_threshold,
            });
        }
    }

    let block_crossings = threshold_crossings(intensity, new_block_threshold);
    let tag_crossings = threshold_crossings(intensity, apriltag_threshold);

    let mut starts: Vec<usize> = Vec::new();
    for &block_end in block_crossings.iter().skip(1).step_by(2) {
        // First tag crossing at or after the separator's falling edge is the
        // separator leaving the tag band; the one after it is the first marker.
        let at_or_after = tag_crossings.partition_point(|&c| c < block_end);
        match tag_crossings.get(at_or_after + 1) {
            Some(&start) => {
                if starts.last().map_or(true, |&last| start > last) {
                    tracing::debug!(block_end, start, "block start from separator");
                    starts.push(start);
                }
            }
            None => {
                tracing::warn!(block_end, "no marker onset after separator, skipping");
            }
        }
    }

    if starts.is_empty() {
        return Err(SyncError::NoBlocksDetected {
            crossings: block_crossings.len(),
        });
    }
    Ok(starts)
}

fn marker_pattern_starts(
    intensity: &[i64],
    times: &[f64],
    apriltag_threshold: i64,
    config: &MarkerPatternConfig,
) -> Result<Vec<usize>, SyncError> {
    let crossings = threshold_crossings(intensity, apriltag_threshold);
    if crossings.is_empty() {
        return Err(SyncError::NoBlocksDetected { crossings: 0 });
    }

    let run_len = config.run_len;
    let mut starts = Vec::new();
    let mut next_allowed = 0;
    for (i, pair) in crossings.windows(run_len + 1).enumerate() {
        if i < next_allowed {
            continue;
        }
        let span = times[pair[run_len]] - times[pair[0]];
        if config.accepts(span) {
            tracing::debug!(start = pair[0], span, "block start from marker run");
            starts.push(pair[0]);
            next_allowed = i + run_len;
        }
    }

    if starts.is_empty() {
        return Err(SyncError::InsufficientMarkerPattern {
            crossings: crossings.len(),
            run_len,
        });
    }
    Ok(starts)
}

/// Cut the signal at each start; the last block runs to the end of the signal
fn split_blocks(samples: &[SensorSample], starts: &[usize]) -> Vec<BlockSegment> {
    starts
        .iter()
        .enumerate()
        .map(|(index, &start)| {
            let end = starts.get(index + 1).copied().unwrap_or(samples.len());
            let start_time = samples[start].time;
            BlockSegment {
                index,
                start_index: start,
                start_time,
                samples: samples[start..end]
                    .iter()
                    .map(|s| SensorSample::new(s.time - start_time, s.intensity))
                    .collect(),
            }
        })
        .collect()
}

//! Core types for the timeline-sync pipeline
//!
//! This module defines the data that flows through each stage: raw frame-log
//! samples, the dense per-frame timeline, raw light-sensor samples, block
//! segments and per-block event onsets.

use crate::error::SyncError;
use serde::{Deserialize, Serialize};

/// One logged (time, frame index) pair from the gaze/world timestamp log
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawTimeFrameSample {
    /// Log time (seconds, recorder clock)
    pub time: f64,
    /// Video frame index the sample was logged against
    pub frame_index: u64,
}

impl RawTimeFrameSample {
    pub fn new(time: f64, frame_index: u64) -> Self {
        Self { time, frame_index }
    }
}

/// Gap-free per-frame time array; position `i` holds the time of frame `i`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DenseFrameTimeline {
    times: Vec<f64>,
}

impl DenseFrameTimeline {
    /// Wrap an already dense time array
    pub fn from_times(times: Vec<f64>) -> Self {
        Self { times }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Time of a frame, if it exists
    pub fn time_of(&self, frame_index: usize) -> Option<f64> {
        self.times.get(frame_index).copied()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn into_times(self) -> Vec<f64> {
        self.times
    }

    /// Last frame index, `None` for an empty timeline
    pub fn last_frame_index(&self) -> Option<u64> {
        self.times.len().checked_sub(1).map(|i| i as u64)
    }

    /// Re-expand the timeline into frame-log samples
    pub fn to_samples(&self) -> Vec<RawTimeFrameSample> {
        self.times
            .iter()
            .enumerate()
            .map(|(i, &t)| RawTimeFrameSample::new(t, i as u64))
            .collect()
    }
}

/// One light-sensor reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    /// Sample time (seconds, sensor clock)
    pub time: f64,
    /// Raw light intensity
    pub intensity: i64,
}

impl SensorSample {
    pub fn new(time: f64, intensity: i64) -> Self {
        Self { time, intensity }
    }
}

/// Check that sensor sample times never decrease
pub fn validate_sensor_samples(samples: &[SensorSample]) -> Result<(), SyncError> {
    for (i, pair) in samples.windows(2).enumerate() {
        if pair[1].time.is_nan() || pair[1].time < pair[0].time {
            return Err(SyncError::NonMonotonicTime {
                index: i + 1,
                previous: pair[0].time,
                current: pair[1].time,
            });
        }
    }
    Ok(())
}

/// Signal belonging to one experimental block, time re-zeroed to its first sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSegment {
    /// Position of the block within the session (0-based)
    pub index: usize,
    /// Sample index of the block start within the session signal
    pub start_index: usize,
    /// Session time of the block start, before re-zeroing
    pub start_time: f64,
    /// Re-zeroed samples
    pub samples: Vec<SensorSample>,
}

impl BlockSegment {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Intensities of the block, in order
    pub fn intensities(&self) -> Vec<i64> {
        self.samples.iter().map(|s| s.intensity).collect()
    }

    /// Re-zeroed times of the block, in order
    pub fn times(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.time).collect()
    }
}

/// Event onsets of one block plus its estimated duration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventOnsetSet {
    /// Block index this set belongs to
    pub block_index: usize,
    /// Strictly increasing onset times within `[0, block_duration]`
    pub onset_times: Vec<f64>,
    /// Block duration (block time axis)
    pub block_duration: f64,
    /// True when the duration came from the fallback heuristic rather than an end marker
    pub duration_estimated: bool,
}

/// How block starts are located in the sensor signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SegmentationStrategy {
    /// High-intensity separator pulses mark block boundaries
    TwoThreshold { new_block_threshold: i64 },
    /// Block starts are found from fixed-duration marker runs
    MarkerPattern,
}

impl SegmentationStrategy {
    /// Strategy implied by an optional separator threshold
    pub fn from_separator(new_block_threshold: Option<i64>) -> Self {
        match new_block_threshold {
            Some(new_block_threshold) => SegmentationStrategy::TwoThreshold {
                new_block_threshold,
            },
            None => SegmentationStrategy::MarkerPattern,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentationStrategy::TwoThreshold { .. } => "two_threshold",
            SegmentationStrategy::MarkerPattern => "marker_pattern",
        }
    }
}

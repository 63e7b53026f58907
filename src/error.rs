//! Error types for timeline-sync

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur while reconstructing timelines or segmenting signals
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Input contains no samples")]
    EmptyInput,

    #[error("Insufficient samples: {0}")]
    InsufficientSamples(String),

    #[error("Time decreases at sample {index} ({previous} -> {current})")]
    NonMonotonicTime {
        index: usize,
        previous: f64,
        current: f64,
    },

    #[error("Frame index decreases at sample {index} ({previous} -> {current})")]
    NonMonotonicFrames {
        index: usize,
        previous: u64,
        current: u64,
    },

    #[error("Median sampling interval is not usable: {0}")]
    DegenerateSamplingInterval(f64),

    #[error(
        "Gap filling made no progress in pass {pass}: gap between frames {prev_frame} and {next_frame} at sample {position}"
    )]
    NonConvergentGapFill {
        pass: usize,
        position: usize,
        prev_frame: u64,
        next_frame: u64,
    },

    #[error("Reconstructed timeline has {actual} frames, expected {expected}")]
    FatalReconstructionMismatch { expected: usize, actual: usize },

    #[error("Signal starts above the new-block threshold ({intensity} > {threshold})")]
    SignalStartsHigh { intensity: i64, threshold: i64 },

    #[error("No block starts detected ({crossings} threshold crossings)")]
    NoBlocksDetected { crossings: usize },

    #[error("No run of {run_len} crossings matches the marker window ({crossings} crossings)")]
    InsufficientMarkerPattern { crossings: usize, run_len: usize },

    #[error("Block {block} has too few event crossings ({crossings})")]
    InsufficientEventCrossings { block: usize, crossings: usize },

    #[error("Sensor log supplied without segmentation thresholds")]
    MissingThresholds,

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl SyncError {
    /// Stable machine-readable code used in run reports
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::EmptyInput => "EMPTY_INPUT",
            SyncError::InsufficientSamples(_) => "INSUFFICIENT_SAMPLES",
            SyncError::NonMonotonicTime { .. } => "NON_MONOTONIC_TIME",
            SyncError::NonMonotonicFrames { .. } => "NON_MONOTONIC_FRAMES",
            SyncError::DegenerateSamplingInterval(_) => "DEGENERATE_SAMPLING_INTERVAL",
            SyncError::NonConvergentGapFill { .. } => "NON_CONVERGENT_GAP_FILL",
            SyncError::FatalReconstructionMismatch { .. } => "FATAL_RECONSTRUCTION_MISMATCH",
            SyncError::SignalStartsHigh { .. } => "SIGNAL_STARTS_HIGH",
            SyncError::NoBlocksDetected { .. } => "NO_BLOCKS_DETECTED",
            SyncError::InsufficientMarkerPattern { .. } => "INSUFFICIENT_MARKER_PATTERN",
            SyncError::InsufficientEventCrossings { .. } => "INSUFFICIENT_EVENT_CROSSINGS",
            SyncError::MissingThresholds => "MISSING_THRESHOLDS",
            SyncError::JsonError(_) => "JSON_ERROR",
        }
    }

    /// Whether this error means the session has no usable blocks
    pub fn is_no_blocks(&self) -> bool {
        matches!(
            self,
            SyncError::NoBlocksDetected { .. } | SyncError::InsufficientMarkerPattern { .. }
        )
    }
}

/// Processing stage a session failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Loading the session's input files
    Input,
    Timeline,
    Segmentation,
    Events,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Input => "input",
            Stage::Timeline => "timeline",
            Stage::Segmentation => "segmentation",
            Stage::Events => "events",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-session failure with enough context to re-inspect the raw input
#[derive(Debug, Error)]
#[error("session {session_id}: {stage} stage failed: {source}")]
pub struct SessionError {
    pub session_id: String,
    pub stage: Stage,
    #[source]
    pub source: SyncError,
}

impl SessionError {
    pub fn new(session_id: impl Into<String>, stage: Stage, source: SyncError) -> Self {
        Self {
            session_id: session_id.into(),
            stage,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_message_carries_context() {
        let err = SessionError::new(
            "P05_A2",
            Stage::Segmentation,
            SyncError::NoBlocksDetected { crossings: 0 },
        );
        let msg = err.to_string();
        assert!(msg.contains("P05_A2"));
        assert!(msg.contains("segmentation"));
        assert!(msg.contains("No block starts"));
    }

    #[test]
    fn test_no_blocks_classification() {
        assert!(SyncError::NoBlocksDetected { crossings: 0 }.is_no_blocks());
        assert!(SyncError::InsufficientMarkerPattern {
            crossings: 12,
            run_len: 9
        }
        .is_no_blocks());
        assert!(!SyncError::EmptyInput.is_no_blocks());
        assert_eq!(
            SyncError::FatalReconstructionMismatch {
                expected: 10,
                actual: 9
            }
            .code(),
            "FATAL_RECONSTRUCTION_MISMATCH"
        );
    }
}

//! Configuration
//!
//! Acquisition-specific constants (marker run size and duration window, event
//! warm-up crossings, fallback duration factor, tag-gap limits) live here so
//! they can be tuned per setup without code changes. Per-session thresholds
//! are kept separate because they differ from session to session.

use crate::error::SyncError;
use crate::types::SegmentationStrategy;
use serde::{Deserialize, Serialize};

/// Default number of crossings spanned by one calibration marker run
pub const DEFAULT_MARKER_RUN_LEN: usize = 9;

/// Default lower bound of a marker run duration (seconds)
pub const DEFAULT_MARKER_MIN_SPAN: f64 = 9.0;

/// Default upper bound of a marker run duration (seconds)
pub const DEFAULT_MARKER_MAX_SPAN: f64 = 9.2;

/// Default number of leading event crossings belonging to the calibration region
pub const DEFAULT_LEADING_CROSSINGS: usize = 10;

/// Default multiple of the mean trial length added after the last onset
pub const DEFAULT_FALLBACK_DURATION_FACTOR: f64 = 0.7;

/// Top-level configuration for all stages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub timeline: TimelineConfig,
    pub marker_pattern: MarkerPatternConfig,
    pub events: EventConfig,
    pub quality: QualityConfig,
}

impl SyncConfig {
    /// Load configuration from JSON; absent fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, SyncError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize configuration to pretty JSON
    pub fn to_json(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Frame timeline reconstruction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Capture before/after windows around every repaired gap
    pub diagnostics: bool,
    /// Samples kept on either side of a gap in diagnostic windows
    pub diagnostic_context: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            diagnostics: false,
            diagnostic_context: 2,
        }
    }
}

/// Marker-pattern (fallback) block detection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerPatternConfig {
    /// Crossing offset between the first and last crossing of a marker run
    pub run_len: usize,
    /// Minimum accepted run duration (inclusive)
    pub min_span: f64,
    /// Maximum accepted run duration (inclusive)
    pub max_span: f64,
}

impl Default for MarkerPatternConfig {
    fn default() -> Self {
        Self {
            run_len: DEFAULT_MARKER_RUN_LEN,
            min_span: DEFAULT_MARKER_MIN_SPAN,
            max_span: DEFAULT_MARKER_MAX_SPAN,
        }
    }
}

impl MarkerPatternConfig {
    pub fn accepts(&self, span: f64) -> bool {
        span >= self.min_span && span <= self.max_span
    }
}

/// Event onset extraction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Leading crossings skipped in every block (calibration markers)
    pub leading_crossings: usize,
    /// Stride between onsets; 2 skips the matching falling edge
    pub stride: usize,
    /// Fallback duration = last onset + factor * mean onset gap
    pub fallback_duration_factor: f64,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            leading_crossings: DEFAULT_LEADING_CROSSINGS,
            stride: 2,
            fallback_duration_factor: DEFAULT_FALLBACK_DURATION_FACTOR,
        }
    }
}

/// Tag detection gap limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Positions below this count as missed detections
    pub min_position: f64,
    /// Longest tolerated run of zero positions
    pub max_zero_run: usize,
    /// Most tolerated missed detections per tag
    pub max_zero_total: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_position: 0.1,
            max_zero_run: 30,
            max_zero_total: 500,
        }
    }
}

/// Thresholds and strategy for one session's sensor signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionThresholds {
    /// Intensity above which a calibration marker is visible
    pub apriltag_threshold: i64,
    /// Intensity above which a trial event is visible
    pub event_threshold: i64,
    pub strategy: SegmentationStrategy,
    /// Number of blocks the session is expected to contain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_blocks: Option<usize>,
}

impl SessionThresholds {
    pub fn new(apriltag_threshold: i64, event_threshold: i64, strategy: SegmentationStrategy) -> Self {
        Self {
            apriltag_threshold,
            event_threshold,
            strategy,
            expected_blocks: None,
        }
    }
}

/// Per-session settings file as written next to each session's data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    pub diode_threshold: i64,
    #[serde(default)]
    pub event_threshold: Option<i64>,
    #[serde(default)]
    pub separator_threshold: Option<i64>,
    #[serde(default)]
    pub n_blocks: Option<usize>,
}

impl SessionSettings {
    pub fn from_json(json: &str) -> Result<Self, SyncError> {
        Ok(serde_json::from_str(json)?)
    }
}

impl From<SessionSettings> for SessionThresholds {
    fn from(settings: SessionSettings) -> Self {
        Self {
            apriltag_threshold: settings.diode_threshold,
            event_threshold: settings.event_threshold.unwrap_or(settings.diode_threshold),
            strategy: SegmentationStrategy::from_separator(settings.separator_threshold),
            expected_blocks: settings.n_blocks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.marker_pattern.run_len, 9);
        assert_eq!(config.events.leading_crossings, 10);
        assert_eq!(config.events.stride, 2);
        assert!((config.events.fallback_duration_factor - 0.7).abs() < 1e-12);
        assert_eq!(config.quality.max_zero_run, 30);
        assert!(!config.timeline.diagnostics);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SyncConfig::from_json(r#"{"marker_pattern": {"min_span": 4.5}}"#).unwrap();
        assert!((config.marker_pattern.min_span - 4.5).abs() < 1e-12);
        assert!((config.marker_pattern.max_span - 9.2).abs() < 1e-12);
        assert_eq!(config.marker_pattern.run_len, 9);
        assert_eq!(config.events, EventConfig::default());
    }

    #[test]
    fn test_json_roundtrip() {
        let mut config = SyncConfig::default();
        config.timeline.diagnostics = true;
        let loaded = SyncConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_marker_window_is_inclusive() {
        let cfg = MarkerPatternConfig::default();
        assert!(cfg.accepts(9.0));
        assert!(cfg.accepts(9.05));
        assert!(cfg.accepts(9.2));
        assert!(!cfg.accepts(8.9));
        assert!(!cfg.accepts(9.3));
    }

    #[test]
    fn test_session_settings_conversion() {
        let settings = SessionSettings::from_json(
            r#"{"diode_threshold": 300, "separator_threshold": 900, "n_blocks": 4}"#,
        )
        .unwrap();
        let thresholds = SessionThresholds::from(settings);
        assert_eq!(thresholds.apriltag_threshold, 300);
        assert_eq!(thresholds.event_threshold, 300);
        assert_eq!(
            thresholds.strategy,
            SegmentationStrategy::TwoThreshold {
                new_block_threshold: 900
            }
        );
        assert_eq!(thresholds.expected_blocks, Some(4));

        let settings = SessionSettings::from_json(r#"{"diode_threshold": 250}"#).unwrap();
        let thresholds = SessionThresholds::from(settings);
        assert_eq!(thresholds.strategy, SegmentationStrategy::MarkerPattern);
        assert_eq!(thresholds.expected_blocks, None);
    }
}

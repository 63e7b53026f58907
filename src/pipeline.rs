//! Pipeline orchestration
//!
//! This module provides the session-level API. Each session runs two
//! independent stages:
//!
//! 1. Frame timeline: raw (time, frame index) log → dense per-frame times
//! 2. Sensor signal: raw (time, intensity) log → block segments → event onsets
//!
//! Failures are recorded per session and per stage; a batch never stops
//! because one session is malformed.

use crate::config::{SessionThresholds, SyncConfig};
use crate::error::{SessionError, Stage, SyncError};
use crate::events::EventOnsetExtractor;
use crate::parts::{concat_sensor_logs, concat_timelines};
use crate::segmenter::BlockSegmenter;
use crate::signal::median_interval;
use crate::timeline::{FrameTimelineReconstructor, Reconstruction};
use crate::types::{
    BlockSegment, DenseFrameTimeline, EventOnsetSet, RawTimeFrameSample, SegmentationStrategy,
    SensorSample,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Everything known about one recording session
///
/// Sessions recorded in several parts carry one log per part, in recording
/// order. A stage with no logs is skipped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionInput {
    /// Session identifier, e.g. participant and session id
    pub session_id: String,
    /// Frame timestamp logs, one per recording part
    #[serde(default)]
    pub frame_parts: Vec<Vec<RawTimeFrameSample>>,
    /// Light-sensor logs, one per recording part
    #[serde(default)]
    pub sensor_parts: Vec<Vec<SensorSample>>,
    /// Thresholds for the sensor logs
    #[serde(default)]
    pub thresholds: Option<SessionThresholds>,
}

impl SessionInput {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    /// Append one frame log part
    pub fn with_frame_log(mut self, frame_log: Vec<RawTimeFrameSample>) -> Self {
        self.frame_parts.push(frame_log);
        self
    }

    /// Append one sensor log part and set the session thresholds
    pub fn with_sensor_log(
        mut self,
        sensor_log: Vec<SensorSample>,
        thresholds: SessionThresholds,
    ) -> Self {
        self.sensor_parts.push(sensor_log);
        self.thresholds = Some(thresholds);
        self
    }
}

/// Output of the sensor stage for one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentedSession {
    pub strategy: SegmentationStrategy,
    pub blocks: Vec<BlockSegment>,
    pub events: Vec<EventOnsetSet>,
    /// Expected block count, when one was configured and did not match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_count_mismatch: Option<usize>,
}

/// Per-session result; each supplied stage either succeeded or failed on its own
#[derive(Debug)]
pub struct SessionOutcome {
    pub session_id: String,
    pub timeline: Option<Result<Reconstruction, SessionError>>,
    pub signal: Option<Result<SegmentedSession, SessionError>>,
}

impl SessionOutcome {
    /// True when every supplied stage succeeded
    pub fn is_success(&self) -> bool {
        self.timeline.as_ref().map_or(true, |r| r.is_ok())
            && self.signal.as_ref().map_or(true, |r| r.is_ok())
    }

    /// Failures of this session, in stage order
    pub fn errors(&self) -> Vec<&SessionError> {
        let timeline = self.timeline.as_ref().and_then(|r| r.as_ref().err());
        let signal = self.signal.as_ref().and_then(|r| r.as_ref().err());
        timeline.into_iter().chain(signal).collect()
    }
}

/// Processor holding the configuration shared by all sessions
#[derive(Debug, Clone, Default)]
pub struct SyncProcessor {
    config: SyncConfig,
}

impl SyncProcessor {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    /// Load configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, SyncError> {
        Ok(Self::new(SyncConfig::from_json(json)?))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Process one session
    pub fn process(&self, input: &SessionInput) -> SessionOutcome {
        let span = tracing::info_span!("session", id = %input.session_id);
        let _entered = span.enter();

        let id = &input.session_id;

        let timeline = match input.frame_parts.as_slice() {
            [] => None,
            [log] => Some(self.reconstruct(id, log)),
            parts => Some(self.reconstruct_parts(id, parts)),
        };

        let signal = (!input.sensor_parts.is_empty()).then(|| {
            let thresholds = input.thresholds.as_ref().ok_or_else(|| {
                SessionError::new(id, Stage::Segmentation, SyncError::MissingThresholds)
            })?;
            match input.sensor_parts.as_slice() {
                [log] => self.segment(id, log, thresholds),
                parts => {
                    let joined = concat_sensor_logs(parts)
                        .map_err(|e| SessionError::new(id, Stage::Segmentation, e))?;
                    self.segment(id, &joined, thresholds)
                }
            }
        });

        let outcome = SessionOutcome {
            session_id: input.session_id.clone(),
            timeline,
            signal,
        };
        for err in outcome.errors() {
            tracing::warn!(stage = %err.stage, code = err.source.code(), "{}", err.source);
        }
        if outcome.is_success() {
            tracing::info!("session processed");
        }
        outcome
    }

    /// Process sessions in parallel; output order matches input order
    pub fn process_batch(&self, inputs: &[SessionInput]) -> Vec<SessionOutcome> {
        let outcomes: Vec<SessionOutcome> =
            inputs.par_iter().map(|input| self.process(input)).collect();
        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        tracing::info!(sessions = outcomes.len(), failed, "batch finished");
        outcomes
    }

    /// Frame timeline stage
    pub fn reconstruct(
        &self,
        session_id: &str,
        frame_log: &[RawTimeFrameSample],
    ) -> Result<Reconstruction, SessionError> {
        FrameTimelineReconstructor::new(self.config.timeline.clone())
            .reconstruct(frame_log)
            .map_err(|e| SessionError::new(session_id, Stage::Timeline, e))
    }

    /// Frame timeline stage for a session recorded in several parts.
    ///
    /// Each part is reconstructed on its own, then the dense timelines are
    /// joined. Repairs are renumbered to frame indices of the joined timeline.
    pub fn reconstruct_parts(
        &self,
        session_id: &str,
        parts: &[Vec<RawTimeFrameSample>],
    ) -> Result<Reconstruction, SessionError> {
        let reconstructions = parts
            .iter()
            .map(|log| self.reconstruct(session_id, log))
            .collect::<Result<Vec<_>, _>>()?;

        let timelines: Vec<DenseFrameTimeline> =
            reconstructions.iter().map(|r| r.timeline.clone()).collect();
        let timeline = concat_timelines(&timelines)
            .map_err(|e| SessionError::new(session_id, Stage::Timeline, e))?;

        let mut repairs = Vec::new();
        let mut frame_offset = 0;
        for r in &reconstructions {
            repairs.extend(r.repairs.iter().cloned().map(|mut repair| {
                repair.prev_frame += frame_offset;
                repair.next_frame += frame_offset;
                repair
            }));
            frame_offset += r.timeline.len() as u64;
        }

        tracing::debug!(parts = parts.len(), frames = timeline.len(), "joined frame timeline parts");
        Ok(Reconstruction {
            dt_median: median_interval(timeline.times()),
            timeline,
            synthetic_first_frame: reconstructions[0].synthetic_first_frame,
            duplicates_dropped: reconstructions.iter().map(|r| r.duplicates_dropped).sum(),
            passes: reconstructions.iter().map(|r| r.passes).max().unwrap_or(0),
            repairs,
        })
    }

    /// Sensor stage: segmentation followed by event extraction
    pub fn segment(
        &self,
        session_id: &str,
        sensor_log: &[SensorSample],
        thresholds: &SessionThresholds,
    ) -> Result<SegmentedSession, SessionError> {
        let blocks = BlockSegmenter::new(self.config.marker_pattern.clone())
            .segment(sensor_log, thresholds.apriltag_threshold, thresholds.strategy)
            .map_err(|e| SessionError::new(session_id, Stage::Segmentation, e))?;

        let events = EventOnsetExtractor::new(self.config.events.clone())
            .extract_all(&blocks, thresholds.event_threshold, thresholds.strategy)
            .map_err(|e| SessionError::new(session_id, Stage::Events, e))?;

        let block_count_mismatch = thresholds
            .expected_blocks
            .filter(|&expected| expected != blocks.len());
        if let Some(expected) = block_count_mismatch {
            tracing::warn!(expected, found = blocks.len(), "unexpected number of blocks");
        }

        Ok(SegmentedSession {
            strategy: thresholds.strategy,
            blocks,
            events,
            block_count_mismatch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmenter::tests::SignalBuilder;

    fn frame_log() -> Vec<RawTimeFrameSample> {
        vec![
            RawTimeFrameSample::new(1.0, 0),
            RawTimeFrameSample::new(1.1, 1),
            RawTimeFrameSample::new(1.2, 2),
            RawTimeFrameSample::new(1.5, 5),
            RawTimeFrameSample::new(1.6, 6),
        ]
    }

    fn sensor_log() -> Vec<SensorSample> {
        let mut builder = SignalBuilder::new().hold(20, 0);
        for _ in 0..2 {
            builder = builder
                .hold(10, 1000)
                .hold(10, 0)
                .pulses(5, 10, 10, 500)
                .pulses(5, 10, 10, 800)
                .pulses(3, 10, 90, 800);
        }
        builder.hold(10, 1000).build()
    }

    fn thresholds() -> SessionThresholds {
        SessionThresholds::new(
            300,
            600,
            SegmentationStrategy::TwoThreshold {
                new_block_threshold: 900,
            },
        )
    }

    #[test]
    fn test_full_session() {
        let input = SessionInput::new("P17_A1")
            .with_frame_log(frame_log())
            .with_sensor_log(sensor_log(), thresholds());
        let outcome = SyncProcessor::default().process(&input);

        assert!(outcome.is_success());
        let reconstruction = outcome.timeline.unwrap().unwrap();
        assert_eq!(reconstruction.timeline.len(), 7);
        let signal = outcome.signal.unwrap().unwrap();
        assert_eq!(signal.blocks.len(), 2);
        assert_eq!(signal.events.len(), 2);
        assert_eq!(signal.block_count_mismatch, None);
    }

    #[test]
    fn test_stages_fail_independently() {
        let flat: Vec<SensorSample> = SignalBuilder::new().hold(100, 0).build();
        let input = SessionInput::new("P02_A1")
            .with_frame_log(frame_log())
            .with_sensor_log(flat, thresholds());
        let outcome = SyncProcessor::default().process(&input);

        assert!(!outcome.is_success());
        assert!(outcome.timeline.as_ref().unwrap().is_ok());
        let err = outcome.signal.unwrap().unwrap_err();
        assert_eq!(err.stage, Stage::Segmentation);
        assert_eq!(err.session_id, "P02_A1");
        assert!(err.source.is_no_blocks());
    }

    #[test]
    fn test_batch_keeps_order_and_isolates_failures() {
        let inputs = vec![
            SessionInput::new("good").with_frame_log(frame_log()),
            SessionInput::new("empty").with_frame_log(Vec::new()),
            SessionInput::new("also-good").with_sensor_log(sensor_log(), thresholds()),
        ];
        let outcomes = SyncProcessor::default().process_batch(&inputs);

        let ids: Vec<&str> = outcomes.iter().map(|o| o.session_id.as_str()).collect();
        assert_eq!(ids, vec!["good", "empty", "also-good"]);
        assert!(outcomes[0].is_success());
        assert!(!outcomes[1].is_success());
        assert_eq!(outcomes[1].errors()[0].source.code(), "EMPTY_INPUT");
        assert!(outcomes[2].is_success());
        assert!(outcomes[2].timeline.is_none());
    }

    #[test]
    fn test_expected_block_count_mismatch_is_flagged() {
        let mut thresholds = thresholds();
        thresholds.expected_blocks = Some(3);
        let input = SessionInput::new("P05_A2").with_sensor_log(sensor_log(), thresholds);
        let outcome = SyncProcessor::default().process(&input);

        assert!(outcome.is_success());
        let signal = outcome.signal.unwrap().unwrap();
        assert_eq!(signal.block_count_mismatch, Some(3));
    }

    #[test]
    fn test_two_part_session() {
        let second_part = vec![
            RawTimeFrameSample::new(40.0, 0),
            RawTimeFrameSample::new(40.1, 1),
            RawTimeFrameSample::new(40.3, 3),
        ];
        let input = SessionInput::new("P11_A1")
            .with_frame_log(frame_log())
            .with_frame_log(second_part);
        let outcome = SyncProcessor::default().process(&input);

        let reconstruction = outcome.timeline.unwrap().unwrap();
        assert_eq!(reconstruction.timeline.len(), 11);
        // second part starts one interval after the first part's last frame
        let times = reconstruction.timeline.times();
        assert!((times[7] - (times[6] + 0.1)).abs() < 1e-9);
        assert_eq!(reconstruction.repairs.len(), 2);
        assert_eq!(reconstruction.repairs[1].prev_frame, 8);
        assert_eq!(reconstruction.repairs[1].next_frame, 10);
    }

    #[test]
    fn test_failing_part_fails_the_timeline_stage() {
        let input = SessionInput::new("P12_A1")
            .with_frame_log(frame_log())
            .with_frame_log(Vec::new());
        let outcome = SyncProcessor::default().process(&input);
        let err = outcome.timeline.unwrap().unwrap_err();
        assert_eq!(err.stage, Stage::Timeline);
        assert_eq!(err.source.code(), "EMPTY_INPUT");
    }

    #[test]
    fn test_sensor_parts_are_joined_before_segmentation() {
        let log = sensor_log();
        let split = log.len() / 2;
        let (first, second) = log.split_at(split);
        let input = SessionInput::new("P13_A1")
            .with_sensor_log(first.to_vec(), thresholds())
            .with_sensor_log(second.to_vec(), thresholds());
        let outcome = SyncProcessor::default().process(&input);

        let signal = outcome.signal.unwrap().unwrap();
        assert_eq!(signal.blocks.len(), 2);
        assert_eq!(signal.events.len(), 2);
    }

    #[test]
    fn test_sensor_log_without_thresholds_fails() {
        let mut input = SessionInput::new("P09_B1");
        input.sensor_parts.push(sensor_log());
        let outcome = SyncProcessor::default().process(&input);
        let err = outcome.signal.unwrap().unwrap_err();
        assert_eq!(err.stage, Stage::Segmentation);
        assert!(matches!(err.source, SyncError::MissingThresholds));
        assert_eq!(err.source.code(), "MISSING_THRESHOLDS");
    }
}

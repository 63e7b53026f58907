//! Run report encoding
//!
//! Summarises a batch of session outcomes as a JSON report: producer
//! metadata, then per session the status of each stage with either its key
//! figures or the error that stopped it.

use crate::error::{SessionError, Stage, SyncError};
use crate::pipeline::{SegmentedSession, SessionOutcome};
use crate::timeline::Reconstruction;
use crate::{PRODUCER_NAME, VERSION};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current report schema version
pub const REPORT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub report_version: String,
    pub producer: ReportProducer,
    pub computed_at_utc: String,
    pub sessions: Vec<SessionSummary>,
}

impl BatchReport {
    /// Number of sessions with at least one failed stage
    pub fn failed_sessions(&self) -> usize {
        self.sessions.iter().filter(|s| s.status == Status::Failed).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeline: Option<TimelineSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<SignalSummary>,
    /// Set when the session never reached processing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorSummary>,
}

impl SessionSummary {
    /// Failed summary for a session whose input files could not be loaded
    pub fn input_failure(
        session_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            status: Status::Failed,
            timeline: None,
            signal: None,
            error: Some(ErrorSummary {
                stage: Stage::Input.as_str().to_string(),
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

impl From<&SessionOutcome> for SessionSummary {
    fn from(outcome: &SessionOutcome) -> Self {
        Self {
            session_id: outcome.session_id.clone(),
            status: if outcome.is_success() {
                Status::Ok
            } else {
                Status::Failed
            },
            timeline: outcome.timeline.as_ref().map(summarize_timeline),
            signal: outcome.signal.as_ref().map(summarize_signal),
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub stage: String,
    pub code: String,
    pub message: String,
}

impl From<&SessionError> for ErrorSummary {
    fn from(err: &SessionError) -> Self {
        Self {
            stage: err.stage.as_str().to_string(),
            code: err.source.code().to_string(),
            message: err.source.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineSummary {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frames: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dt_median: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repaired_gaps: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inserted_samples: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropped_frames: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthetic_first_frame: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSummary {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<BlockSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_blocks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub index: usize,
    /// Session time of the block start
    pub start_time: f64,
    pub duration: f64,
    pub duration_estimated: bool,
    pub onset_times: Vec<f64>,
}

/// Encoder for batch run reports
pub struct ReportEncoder {
    instance_id: String,
}

impl Default for ReportEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    pub fn encode(&self, outcomes: &[SessionOutcome]) -> BatchReport {
        self.encode_summaries(outcomes.iter().map(SessionSummary::from).collect())
    }

    /// Wrap already summarised sessions, keeping their order
    pub fn encode_summaries(&self, sessions: Vec<SessionSummary>) -> BatchReport {
        BatchReport {
            report_version: REPORT_VERSION.to_string(),
            producer: ReportProducer {
                name: PRODUCER_NAME.to_string(),
                version: VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            computed_at_utc: Utc::now().to_rfc3339(),
            sessions,
        }
    }

    /// Encode to JSON string
    pub fn encode_to_json(&self, outcomes: &[SessionOutcome]) -> Result<String, SyncError> {
        let report = self.encode(outcomes);
        serde_json::to_string_pretty(&report).map_err(SyncError::JsonError)
    }
}

fn status_of<T, E>(result: &Result<T, E>) -> Status {
    if result.is_ok() {
        Status::Ok
    } else {
        Status::Failed
    }
}

fn summarize_timeline(result: &Result<Reconstruction, SessionError>) -> TimelineSummary {
    let ok = result.as_ref().ok();
    TimelineSummary {
        status: status_of(result),
        frames: ok.map(|r| r.timeline.len()),
        dt_median: ok.and_then(|r| r.dt_median),
        repaired_gaps: ok.map(|r| r.repairs.len()),
        inserted_samples: ok.map(Reconstruction::inserted_samples),
        dropped_frames: ok.map(Reconstruction::dropped_frames),
        synthetic_first_frame: ok.map(|r| r.synthetic_first_frame),
        error: result.as_ref().err().map(ErrorSummary::from),
    }
}

fn summarize_signal(result: &Result<SegmentedSession, SessionError>) -> SignalSummary {
    match result {
        Ok(session) => SignalSummary {
            status: Status::Ok,
            strategy: Some(session.strategy.as_str().to_string()),
            blocks: session
                .blocks
                .iter()
                .zip(&session.events)
                .map(|(block, events)| BlockSummary {
                    index: block.index,
                    start_time: block.start_time,
                    duration: events.block_duration,
                    duration_estimated: events.duration_estimated,
                    onset_times: events.onset_times.clone(),
                })
                .collect(),
            expected_blocks: session.block_count_mismatch,
            error: None,
        },
        Err(err) => SignalSummary {
            status: Status::Failed,
            strategy: None,
            blocks: Vec::new(),
            expected_blocks: None,
            error: Some(ErrorSummary::from(err)),
        },
    }
}

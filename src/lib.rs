//! timeline-sync - Temporal alignment for eye-tracking and light-sensor recordings
//!
//! Turns raw acquisition logs into analysis-ready time references through
//! two independent stages:
//!
//! - **Frame timeline**: sparse (time, frame index) log → dense per-frame times,
//!   with missing and dropped frames accounted for
//! - **Sensor signal**: light-sensor log → experimental blocks → per-block
//!   event onsets and block durations
//!
//! Sessions are processed in batches by [`SyncProcessor`]; failures are
//! reported per session and never abort the batch.

pub mod config;
pub mod error;
pub mod events;
pub mod parts;
pub mod pipeline;
pub mod quality;
pub mod report;
pub mod segmenter;
pub mod signal;
pub mod timeline;
pub mod types;

pub use config::{SessionSettings, SessionThresholds, SyncConfig};
pub use error::{SessionError, Stage, SyncError};
pub use events::EventOnsetExtractor;
pub use pipeline::{SessionInput, SessionOutcome, SyncProcessor};
pub use report::{BatchReport, ReportEncoder};
pub use segmenter::BlockSegmenter;
pub use timeline::{reconstruct_frame_timeline, FrameTimelineReconstructor, Reconstruction};
pub use types::{
    BlockSegment, DenseFrameTimeline, EventOnsetSet, RawTimeFrameSample, SegmentationStrategy,
    SensorSample,
};

/// Crate version embedded in all run reports
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for run reports
pub const PRODUCER_NAME: &str = "timeline-sync";

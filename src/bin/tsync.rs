//! tsync CLI - Command-line interface for timeline-sync
//!
//! Commands:
//! - timeline: Reconstruct the dense frame timeline of one gaze log
//! - blocks: Segment one light-sensor log and extract event onsets
//! - batch: Process every session listed in a manifest (parallel)
//! - check-tags: Check tag position traces for detection gaps
//! - doctor: Diagnose configuration and environment

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use timeline_sync::config::{SessionSettings, SessionThresholds, SyncConfig};
use timeline_sync::quality::check_tag_gaps;
use timeline_sync::report::SessionSummary;
use timeline_sync::types::{RawTimeFrameSample, SegmentationStrategy, SensorSample};
use timeline_sync::{ReportEncoder, SessionInput, SyncError, SyncProcessor, PRODUCER_NAME, VERSION};

/// tsync - Temporal alignment for eye-tracking and light-sensor recordings
#[derive(Parser)]
#[command(name = "tsync")]
#[command(author = "Synheart AI Inc")]
#[command(version = VERSION)]
#[command(about = "Reconstruct frame timelines and segment light-sensor logs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconstruct the dense frame timeline of a gaze log
    Timeline {
        /// Gaze CSV with world_timestamp and world_index columns (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output CSV with one time per frame (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// Log a before/after window around every repaired gap
        #[arg(long)]
        diagnostics: bool,
    },

    /// Segment a light-sensor log into blocks and extract event onsets
    Blocks {
        /// Sensor CSV with timestamp and light_value columns (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output JSON (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// Intensity above which a calibration marker is visible
        #[arg(long)]
        apriltag_threshold: i64,

        /// Intensity above which a trial event is visible (defaults to the marker threshold)
        #[arg(long)]
        event_threshold: Option<i64>,

        /// Separator threshold; without it blocks are found by marker pattern
        #[arg(long)]
        new_block_threshold: Option<i64>,

        /// Configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Process all sessions listed in a manifest
    Batch {
        /// Manifest JSON listing sessions and their files
        #[arg(short, long)]
        manifest: PathBuf,

        /// Configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output report JSON (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// Exit with an error if any session failed
        #[arg(long)]
        strict: bool,
    },

    /// Check tag position traces for detection gaps
    CheckTags {
        /// CSV with one position column per tag id (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Check configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr so stdout stays clean for `-o -`
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(!cfg!(windows))
        .init();
}

fn run(cli: Cli) -> Result<(), TsyncCliError> {
    match cli.command {
        Commands::Timeline {
            input,
            output,
            diagnostics,
        } => cmd_timeline(&input, &output, diagnostics),

        Commands::Blocks {
            input,
            output,
            apriltag_threshold,
            event_threshold,
            new_block_threshold,
            config,
        } => {
            let thresholds = SessionThresholds::new(
                apriltag_threshold,
                event_threshold.unwrap_or(apriltag_threshold),
                SegmentationStrategy::from_separator(new_block_threshold),
            );
            cmd_blocks(&input, &output, thresholds, config.as_deref())
        }

        Commands::Batch {
            manifest,
            config,
            output,
            strict,
        } => cmd_batch(&manifest, config.as_deref(), &output, strict),

        Commands::CheckTags {
            input,
            config,
            json,
        } => cmd_check_tags(&input, config.as_deref(), json),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

fn cmd_timeline(input: &Path, output: &Path, diagnostics: bool) -> Result<(), TsyncCliError> {
    let frame_log = read_frame_log(&read_input(input)?)?;

    let mut config = SyncConfig::default();
    config.timeline.diagnostics = diagnostics;
    let processor = SyncProcessor::new(config);
    let reconstruction = processor
        .reconstruct(&display_name(input), &frame_log)
        .map_err(|e| TsyncCliError::Sync(e.source))?;

    for repair in &reconstruction.repairs {
        if let Some(window) = &repair.window {
            tracing::info!(
                prev_frame = repair.prev_frame,
                next_frame = repair.next_frame,
                dropped = repair.n_dropped_frames,
                "gap before: {:?} after: {:?}",
                window.before,
                window.after
            );
        }
    }
    tracing::info!(
        frames = reconstruction.timeline.len(),
        gaps = reconstruction.repairs.len(),
        dropped = reconstruction.dropped_frames(),
        "timeline reconstructed"
    );

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["time"])?;
    for t in reconstruction.timeline.times() {
        writer.write_record([t.to_string()])?;
    }
    let data = writer
        .into_inner()
        .map_err(|e| TsyncCliError::Io(e.into_error()))?;
    write_output(output, &data)
}

fn cmd_blocks(
    input: &Path,
    output: &Path,
    thresholds: SessionThresholds,
    config: Option<&Path>,
) -> Result<(), TsyncCliError> {
    let sensor_log = read_sensor_log(&read_input(input)?)?;
    let processor = SyncProcessor::new(load_config(config)?);

    let session = processor
        .segment(&display_name(input), &sensor_log, &thresholds)
        .map_err(|e| TsyncCliError::Sync(e.source))?;

    let json = serde_json::to_string_pretty(&session.events)?;
    write_output(output, json.as_bytes())
}

fn cmd_batch(
    manifest_path: &Path,
    config: Option<&Path>,
    output: &Path,
    strict: bool,
) -> Result<(), TsyncCliError> {
    let manifest: Manifest = serde_json::from_str(&fs::read_to_string(manifest_path)?)?;
    if manifest.sessions.is_empty() {
        return Err(TsyncCliError::NoSessions);
    }
    let base = manifest_path.parent().unwrap_or_else(|| Path::new("."));

    let processor = SyncProcessor::new(load_config(config)?);
    let sessions = process_manifest(&manifest, base, &processor);

    let encoder = ReportEncoder::new();
    let report = encoder.encode_summaries(sessions);
    let json = serde_json::to_string_pretty(&report)?;
    write_output(output, json.as_bytes())?;

    let failed = report.failed_sessions();
    if strict && failed > 0 {
        Err(TsyncCliError::SessionsFailed(failed))
    } else {
        Ok(())
    }
}

/// Load and process every manifest entry, in manifest order.
///
/// An entry whose files cannot be read is reported as failed and the rest
/// of the batch still runs.
fn process_manifest(manifest: &Manifest, base: &Path, processor: &SyncProcessor) -> Vec<SessionSummary> {
    let mut inputs = Vec::with_capacity(manifest.sessions.len());
    let mut slots: Vec<Result<usize, SessionSummary>> = Vec::with_capacity(manifest.sessions.len());

    for entry in &manifest.sessions {
        match entry.load(base) {
            Ok(input) => {
                slots.push(Ok(inputs.len()));
                inputs.push(input);
            }
            Err(e) => {
                let err = CliError::from(e);
                tracing::warn!(session = %entry.session_id, code = %err.code, "{}", err.message);
                slots.push(Err(SessionSummary::input_failure(&entry.session_id, err.code, err.message)));
            }
        }
    }

    let outcomes = processor.process_batch(&inputs);
    slots
        .into_iter()
        .map(|slot| match slot {
            Ok(i) => SessionSummary::from(&outcomes[i]),
            Err(summary) => summary,
        })
        .collect()
}

fn cmd_check_tags(input: &Path, config: Option<&Path>, json: bool) -> Result<(), TsyncCliError> {
    let tags = read_tag_positions(&read_input(input)?)?;
    let config = load_config(config)?;
    let issues = check_tag_gaps(&tags, &config.quality);

    if json {
        println!("{}", serde_json::to_string_pretty(&issues)?);
    } else if issues.is_empty() {
        println!("All {} tags within detection limits", tags.len());
    } else {
        for issue in &issues {
            println!(
                "Tag {}: {} missed detections, longest gap {} frames",
                issue.tag_id, issue.missed_detections, issue.longest_zero_run
            );
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(TsyncCliError::TagGaps(issues.len()))
    }
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), TsyncCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("{} version {}", PRODUCER_NAME, VERSION),
    });

    if let Some(config_path) = config {
        let check = match fs::read_to_string(config_path) {
            Ok(content) => match SyncConfig::from_json(&content) {
                Ok(cfg) => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "Configuration valid (marker window {}-{} s over {} crossings)",
                        cfg.marker_pattern.min_span, cfg.marker_pattern.max_span, cfg.marker_pattern.run_len
                    ),
                },
                Err(e) => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Invalid configuration: {}", e),
                },
            },
            Err(e) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: format!("Cannot read configuration file: {}", e),
            },
        };
        checks.push(check);
    } else {
        checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Warning,
            message: "No configuration file given, defaults in use".to_string(),
        });
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (- inputs ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    checks.push(DoctorCheck {
        name: "threads".to_string(),
        status: CheckStatus::Ok,
        message: format!("{} worker threads for batch mode", rayon::current_num_threads()),
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("tsync Doctor Report");
        println!("===================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(TsyncCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Input helpers

fn read_input(input: &Path) -> Result<String, TsyncCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn write_output(output: &Path, data: &[u8]) -> Result<(), TsyncCliError> {
    if output.to_string_lossy() == "-" {
        let mut stdout = io::stdout();
        stdout.write_all(data)?;
        stdout.flush()?;
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "-".to_string())
}

fn load_config(path: Option<&Path>) -> Result<SyncConfig, TsyncCliError> {
    match path {
        Some(path) => Ok(SyncConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(SyncConfig::default()),
    }
}

fn csv_reader(data: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(data.as_bytes())
}

#[derive(Deserialize)]
struct GazeRow {
    world_timestamp: f64,
    world_index: u64,
}

#[derive(Deserialize)]
struct SensorRow {
    timestamp: f64,
    light_value: i64,
}

fn read_frame_log(data: &str) -> Result<Vec<RawTimeFrameSample>, TsyncCliError> {
    csv_reader(data)
        .deserialize::<GazeRow>()
        .map(|row| {
            let row = row?;
            Ok::<_, TsyncCliError>(RawTimeFrameSample::new(row.world_timestamp, row.world_index))
        })
        .collect()
}

fn read_sensor_log(data: &str) -> Result<Vec<SensorSample>, TsyncCliError> {
    csv_reader(data)
        .deserialize::<SensorRow>()
        .map(|row| {
            let row = row?;
            Ok::<_, TsyncCliError>(SensorSample::new(row.timestamp, row.light_value))
        })
        .collect()
}

/// One column per tag; headers are tag ids
fn read_tag_positions(data: &str) -> Result<BTreeMap<u32, Vec<f64>>, TsyncCliError> {
    let mut reader = csv_reader(data);
    let ids = reader
        .headers()?
        .iter()
        .map(|h| {
            h.parse::<u32>()
                .map_err(|_| TsyncCliError::ParseError(format!("Tag column '{}' is not a tag id", h)))
        })
        .collect::<Result<Vec<u32>, _>>()?;

    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); ids.len()];
    for record in reader.records() {
        let record = record?;
        for (column, field) in columns.iter_mut().zip(record.iter()) {
            let value = field
                .parse::<f64>()
                .map_err(|_| TsyncCliError::ParseError(format!("'{}' is not a position", field)))?;
            column.push(value);
        }
    }
    Ok(ids.into_iter().zip(columns).collect())
}

/// Batch manifest: sessions with their files, paths relative to the manifest
#[derive(Deserialize)]
struct Manifest {
    sessions: Vec<ManifestEntry>,
}

#[derive(Deserialize)]
struct ManifestEntry {
    session_id: String,
    /// Gaze CSV parts, in recording order
    #[serde(default)]
    gaze: Vec<PathBuf>,
    /// Sensor CSV parts, in recording order
    #[serde(default)]
    diode: Vec<PathBuf>,
    #[serde(default)]
    thresholds: Option<SessionThresholds>,
    /// Per-session settings file, used when `thresholds` is absent
    #[serde(default)]
    settings: Option<PathBuf>,
}

impl ManifestEntry {
    fn load(&self, base: &Path) -> Result<SessionInput, TsyncCliError> {
        let mut input = SessionInput::new(&self.session_id);

        for part in &self.gaze {
            input.frame_parts.push(read_frame_log(&fs::read_to_string(base.join(part))?)?);
        }
        for part in &self.diode {
            input.sensor_parts.push(read_sensor_log(&fs::read_to_string(base.join(part))?)?);
        }

        input.thresholds = match (&self.thresholds, &self.settings) {
            (Some(thresholds), _) => Some(thresholds.clone()),
            (None, Some(path)) => {
                let settings = SessionSettings::from_json(&fs::read_to_string(base.join(path))?)?;
                Some(settings.into())
            }
            (None, None) => None,
        };
        Ok(input)
    }
}

// Errors

enum TsyncCliError {
    Io(io::Error),
    Sync(SyncError),
    Json(serde_json::Error),
    Csv(csv::Error),
    NoSessions,
    SessionsFailed(usize),
    TagGaps(usize),
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for TsyncCliError {
    fn from(e: io::Error) -> Self {
        TsyncCliError::Io(e)
    }
}

impl From<SyncError> for TsyncCliError {
    fn from(e: SyncError) -> Self {
        TsyncCliError::Sync(e)
    }
}

impl From<serde_json::Error> for TsyncCliError {
    fn from(e: serde_json::Error) -> Self {
        TsyncCliError::Json(e)
    }
}

impl From<csv::Error> for TsyncCliError {
    fn from(e: csv::Error) -> Self {
        TsyncCliError::Csv(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<TsyncCliError> for CliError {
    fn from(e: TsyncCliError) -> Self {
        match e {
            TsyncCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            TsyncCliError::Sync(e) => {
                let hint = match &e {
                    SyncError::SignalStartsHigh { .. } | SyncError::NoBlocksDetected { .. } => {
                        "Check the thresholds against a plot of the sensor signal"
                    }
                    SyncError::InsufficientMarkerPattern { .. } => {
                        "Check the marker window in the configuration"
                    }
                    SyncError::NonConvergentGapFill { .. }
                    | SyncError::FatalReconstructionMismatch { .. } => {
                        "Inspect the gaze log for repeated or reset frame indices"
                    }
                    SyncError::MissingThresholds => {
                        "Give thresholds or a settings file for every session with a diode log"
                    }
                    _ => "Check the input data",
                };
                CliError {
                    code: e.code().to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            TsyncCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            TsyncCliError::Csv(e) => CliError {
                code: "CSV_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check the CSV header names and numeric columns".to_string()),
            },
            TsyncCliError::NoSessions => CliError {
                code: "NO_SESSIONS".to_string(),
                message: "Manifest lists no sessions".to_string(),
                hint: Some("Add entries to the manifest's sessions array".to_string()),
            },
            TsyncCliError::SessionsFailed(count) => CliError {
                code: "SESSIONS_FAILED".to_string(),
                message: format!("{} sessions failed", count),
                hint: Some("See the report for per-session errors".to_string()),
            },
            TsyncCliError::TagGaps(count) => CliError {
                code: "TAG_GAPS".to_string(),
                message: format!("{} tags exceed detection gap limits", count),
                hint: Some("Consider excluding this session".to_string()),
            },
            TsyncCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            TsyncCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Check input format".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

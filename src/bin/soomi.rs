//! Soomi CLI - Command-line interface for Soomi Engine
//!
//! Commands:
//! - simulate: Run a synthetic night against the engine
//! - replay: Feed recorded scores and commands through a session
//! - config: Print the effective configuration
//! - profiles: Show learned profiles from a store directory
//! - doctor: Diagnose configuration and storage

use clap::{Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use soomi_engine::clock::ManualClock;
use soomi_engine::io::{JsonlStore, Persistence};
use soomi_engine::learning::LearningStats;
use soomi_engine::logging::{init_logging, LogConfig, LogFormat};
use soomi_engine::session::{SessionTick, SoomiSession};
use soomi_engine::types::{InterventionLevel, SoundType};
use soomi_engine::{SoomiConfig, SoomiError, SoomiState, ENGINE_NAME, ENGINE_VERSION};

/// Soomi - On-device unrest detection and adaptive soothing
#[derive(Parser)]
#[command(name = "soomi")]
#[command(author = "Soomi Labs")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Drive the Soomi soothing engine from the command line", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Log format
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic night against the engine
    Simulate {
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Simulated minutes
        #[arg(long, default_value = "120")]
        minutes: u32,

        /// Minutes between crying episodes
        #[arg(long, default_value = "15")]
        episode_every: u32,

        /// Seed for the infant model and exploration draws
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Persist events, profiles and transitions to this directory
        #[arg(long)]
        store: Option<PathBuf>,

        /// Print every tick, not only ticks that changed something
        #[arg(long)]
        verbose: bool,
    },

    /// Feed recorded scores and commands through a session
    Replay {
        /// Input file path (use - for stdin), one JSON object per line
        #[arg(short, long)]
        input: PathBuf,

        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Persist events, profiles and transitions to this directory
        #[arg(long)]
        store: Option<PathBuf>,

        /// Seed for exploration draws
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Print the effective configuration
    Config {
        /// Configuration file to validate and clamp; defaults when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show learned profiles from a store directory
    Profiles {
        #[arg(long)]
        store: PathBuf,
    },

    /// Diagnose configuration and storage
    Doctor {
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long)]
        store: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_config = LogConfig {
        level: cli.log_level.clone(),
        format: match cli.log_format {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        },
        file: None,
    };
    if let Err(e) = init_logging(&log_config) {
        eprintln!("warning: {e}");
    }

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<(), SoomiCliError> {
    match command {
        Commands::Simulate {
            config,
            minutes,
            episode_every,
            seed,
            store,
            verbose,
        } => cmd_simulate(
            config.as_deref(),
            minutes,
            episode_every,
            seed,
            store.as_deref(),
            verbose,
        ),
        Commands::Replay {
            input,
            config,
            store,
            seed,
        } => cmd_replay(&input, config.as_deref(), store.as_deref(), seed),
        Commands::Config { config } => cmd_config(config.as_deref()),
        Commands::Profiles { store } => cmd_profiles(&store),
        Commands::Doctor {
            config,
            store,
            json,
        } => cmd_doctor(config.as_deref(), store.as_deref(), json),
    }
}

fn load_config(path: Option<&Path>) -> Result<SoomiConfig, SoomiCliError> {
    match path {
        Some(path) => Ok(SoomiConfig::load(path)?),
        None => Ok(SoomiConfig::default()),
    }
}

fn build_session(
    config: SoomiConfig,
    clock: Arc<ManualClock>,
    store: Option<&Path>,
    seed: Option<u64>,
) -> Result<SoomiSession, SoomiCliError> {
    let mut builder = SoomiSession::builder(config).clock(clock);
    if let Some(dir) = store {
        builder = builder.persistence(Arc::new(JsonlStore::open(dir)?));
    }
    if let Some(seed) = seed {
        builder = builder.seed(seed);
    }
    Ok(builder.build()?)
}

// ============================================================================
// simulate
// ============================================================================

/// Crude infant model: crying episodes push unrest up, sound pulls it down
struct SimulatedInfant {
    unrest: f64,
    crying_for: u32,
    rng: StdRng,
}

impl SimulatedInfant {
    fn new(seed: u64) -> Self {
        Self {
            unrest: 12.0,
            crying_for: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn step(
        &mut self,
        second: u32,
        episode_every_sec: u32,
        playing: Option<(SoundType, InterventionLevel)>,
    ) -> f64 {
        if second > 0 && second % episode_every_sec == 0 {
            self.crying_for = self.rng.random_range(40..120);
        }

        if self.crying_for > 0 {
            self.crying_for -= 1;
            self.unrest += 4.0;
        } else {
            self.unrest -= 0.4;
        }

        if let Some((sound, level)) = playing {
            self.unrest -= soothing_effect(sound) * level.volume() * 4.0;
        }

        let noise: f64 = self.rng.random_range(-2.0..2.0);
        self.unrest = self.unrest.clamp(8.0, 92.0);
        (self.unrest + noise).clamp(0.0, 100.0)
    }
}

fn soothing_effect(sound: SoundType) -> f64 {
    match sound {
        SoundType::Shush => 1.6,
        SoundType::Heartbeat => 1.3,
        SoundType::PinkNoise => 1.1,
        SoundType::WhiteNoise => 1.0,
        SoundType::BrownNoise => 0.9,
        SoundType::Rain => 0.8,
    }
}

#[derive(Serialize)]
struct SimulationSummary {
    simulated_minutes: u32,
    interventions: usize,
    effective: usize,
    avg_delta_z: f64,
    learning: LearningStats,
}

fn cmd_simulate(
    config_path: Option<&Path>,
    minutes: u32,
    episode_every: u32,
    seed: u64,
    store: Option<&Path>,
    verbose: bool,
) -> Result<(), SoomiCliError> {
    let config = load_config(config_path)?;
    let clock = Arc::new(ManualClock::new(chrono::Utc::now().timestamp_millis()));
    let session = build_session(config, clock.clone(), store, Some(seed))?;
    let mut infant = SimulatedInfant::new(seed);
    let episode_every_sec = episode_every.max(1) * 60;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    write_json_line(&mut out, &session.start())?;
    let mut closed = Vec::new();
    for second in 0..minutes * 60 {
        clock.advance_millis(1000);
        let machine = session.snapshot().machine;
        let playing = match machine.state {
            SoomiState::Soothing | SoomiState::Predictive => {
                machine.sound_type.map(|s| (s, machine.level.max(InterventionLevel::Level1)))
            }
            _ => None,
        };
        let score = infant.step(second, episode_every_sec, playing);
        let tick = session.process_score(score);
        if let Some(event) = &tick.closed_event {
            closed.push(event.clone());
        }
        if verbose || !tick.step.is_empty() {
            write_json_line(&mut out, &tick)?;
        }
    }
    let stopped = session.stop();
    closed.extend(stopped.closed_events.iter().cloned());
    write_json_line(&mut out, &stopped)?;

    let summary = SimulationSummary {
        simulated_minutes: minutes,
        interventions: closed.len(),
        effective: closed.iter().filter(|e| e.was_effective).count(),
        avg_delta_z: if closed.is_empty() {
            0.0
        } else {
            closed.iter().map(|e| e.delta_z).sum::<f64>() / closed.len() as f64
        },
        learning: session.learning_stats(),
    };
    writeln!(out, "{}", serde_json::to_string(&summary)?)?;
    out.flush()?;
    Ok(())
}

// ============================================================================
// replay
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ReplayCommand {
    Start,
    Stop,
    ForceStop,
    Resume,
    ManualSoothe,
    MarkFeed,
}

#[derive(Debug, Deserialize)]
struct ReplayLine {
    timestamp_millis: i64,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    command: Option<ReplayCommand>,
}

fn cmd_replay(
    input: &Path,
    config_path: Option<&Path>,
    store: Option<&Path>,
    seed: Option<u64>,
) -> Result<(), SoomiCliError> {
    let config = load_config(config_path)?;
    let clock = Arc::new(ManualClock::new(0));
    let session = build_session(config, clock.clone(), store, seed)?;

    let reader: Box<dyn BufRead> = if input.to_string_lossy() == "-" {
        Box::new(io::BufReader::new(io::stdin()))
    } else {
        Box::new(io::BufReader::new(fs::File::open(input)?))
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut started = false;

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: ReplayLine = serde_json::from_str(line)
            .map_err(|e| SoomiCliError::ParseError(format!("line {}: {}", line_num + 1, e)))?;
        clock.set(record.timestamp_millis);

        if !started && record.command.is_none() {
            write_json_line(&mut out, &session.start())?;
            started = true;
        }

        if let Some(command) = record.command {
            started = true;
            match command {
                ReplayCommand::Start => write_json_line(&mut out, &session.start())?,
                ReplayCommand::Stop => write_json_line(&mut out, &session.stop())?,
                ReplayCommand::ForceStop => write_json_line(&mut out, &session.force_stop())?,
                ReplayCommand::Resume => write_json_line(&mut out, &session.resume())?,
                ReplayCommand::ManualSoothe => {
                    write_json_line(&mut out, &session.manual_soothe())?
                }
                ReplayCommand::MarkFeed => session.mark_feed(),
            }
        }

        if let Some(score) = record.score {
            let tick: SessionTick = session.process_score(score);
            write_json_line(&mut out, &tick)?;
        }
    }

    if session.state() != SoomiState::Stopped {
        write_json_line(&mut out, &session.stop())?;
    }
    out.flush()?;
    Ok(())
}

// ============================================================================
// config / profiles
// ============================================================================

fn cmd_config(config_path: Option<&Path>) -> Result<(), SoomiCliError> {
    let config = load_config(config_path)?;
    println!("{}", config.to_json()?);
    Ok(())
}

fn cmd_profiles(store: &Path) -> Result<(), SoomiCliError> {
    if !store.is_dir() {
        return Err(SoomiCliError::MissingStore(store.to_path_buf()));
    }
    let store = JsonlStore::open(store)?;
    let mut profiles = store.load_profiles()?;
    profiles.sort_by(|a, b| b.effectiveness_score.total_cmp(&a.effectiveness_score));
    println!("{}", serde_json::to_string_pretty(&profiles)?);
    Ok(())
}

// ============================================================================
// doctor
// ============================================================================

fn cmd_doctor(
    config_path: Option<&Path>,
    store: Option<&Path>,
    json: bool,
) -> Result<(), SoomiCliError> {
    let mut checks = Vec::new();

    match config_path {
        Some(path) => match SoomiConfig::load(path) {
            Ok(config) => {
                let raw: Option<SoomiConfig> = fs::read_to_string(path)
                    .ok()
                    .and_then(|s| serde_json::from_str(&s).ok());
                let clamped = raw.is_some_and(|raw| raw != config);
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: if clamped {
                        CheckStatus::Warning
                    } else {
                        CheckStatus::Ok
                    },
                    message: if clamped {
                        "Config loaded; some values were clamped into range".to_string()
                    } else {
                        "Config is valid".to_string()
                    },
                });
            }
            Err(e) => checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            }),
        },
        None => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: "No config given, using defaults".to_string(),
        }),
    }

    if let Some(dir) = store {
        if dir.is_dir() {
            match JsonlStore::open(dir).and_then(|s| {
                let profiles = s.load_profiles()?;
                let events = s.read_events()?;
                Ok((profiles.len(), events.len()))
            }) {
                Ok((profiles, events)) => checks.push(DoctorCheck {
                    name: "store".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("{profiles} profiles, {events} events"),
                }),
                Err(e) => checks.push(DoctorCheck {
                    name: "store".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot read store: {e}"),
                }),
            }
        } else {
            checks.push(DoctorCheck {
                name: "store".to_string(),
                status: CheckStatus::Warning,
                message: "Store directory does not exist".to_string(),
            });
        }
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
            message: "stdin is a pipe (replay from - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        engine: ENGINE_NAME.to_string(),
        version: ENGINE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Soomi Doctor Report");
        println!("===================");
        println!("Engine:  {}", report.engine);
        println!("Version: {}", report.version);
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

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(SoomiCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn write_json_line<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<(), SoomiCliError> {
    writeln!(out, "{}", serde_json::to_string(value)?)?;
    Ok(())
}

// ============================================================================
// Errors and reports
// ============================================================================

#[derive(Debug)]
enum SoomiCliError {
    Io(io::Error),
    Engine(SoomiError),
    Json(serde_json::Error),
    MissingStore(PathBuf),
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for SoomiCliError {
    fn from(e: io::Error) -> Self {
        SoomiCliError::Io(e)
    }
}

impl From<SoomiError> for SoomiCliError {
    fn from(e: SoomiError) -> Self {
        SoomiCliError::Engine(e)
    }
}

impl From<serde_json::Error> for SoomiCliError {
    fn from(e: serde_json::Error) -> Self {
        SoomiCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<SoomiCliError> for CliError {
    fn from(e: SoomiCliError) -> Self {
        match e {
            SoomiCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            SoomiCliError::Engine(e) => CliError {
                code: "ENGINE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'soomi doctor' for details".to_string()),
            },
            SoomiCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            SoomiCliError::MissingStore(path) => CliError {
                code: "MISSING_STORE".to_string(),
                message: format!("Store directory not found: {}", path.display()),
                hint: Some("Run 'soomi simulate --store <dir>' first".to_string()),
            },
            SoomiCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            SoomiCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some(
                    "Each line needs timestamp_millis plus a score or command".to_string(),
                ),
            },
        }
    }
}

#[derive(Serialize)]
struct DoctorReport {
    engine: String,
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

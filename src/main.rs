// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result, anyhow};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, error, info, warn};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use docjobs::app_config::{self, Config};
use docjobs::file_utils::{ArtifactStore, DocumentType, FileManager, LocalArtifactStore};
use docjobs::jobs::{JobManager, JobRequest, JobStatus, ProgressCallback, ProgressUpdate};
use docjobs::translation::{EchoTranslator, TextDocumentOperation};

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

/// Run document translations as background jobs
#[derive(Parser, Debug)]
#[command(name = "docjobs", version, about)]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Translate documents, one job per file
    Translate(TranslateArgs),

    /// Generate shell completions for docjobs
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser, Debug)]
struct TranslateArgs {
    /// Input documents or directories to process
    #[arg(value_name = "INPUT_PATH", required = true)]
    inputs: Vec<PathBuf>,

    /// Target language code (e.g., 'zh-cn', 'de', 'fr')
    #[arg(short, long)]
    target_language: String,

    /// Model name passed to the translator
    #[arg(short, long, default_value = "echo")]
    model: String,

    /// Configuration file path
    #[arg(short, long, default_value = "conf.json")]
    config_path: PathBuf,

    /// Set logging level
    #[arg(short, long, value_enum)]
    log_level: Option<CliLogLevel>,

    /// Write only the translation instead of bilingual output
    #[arg(long)]
    single: bool,

    /// Translate at most this many paragraphs per document
    #[arg(long)]
    limit: Option<usize>,

    /// Per-job timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Maximum retries per job
    #[arg(long)]
    max_retries: Option<u32>,
}

// @struct: Custom logger implementation, filtered by the global max level
struct CustomLogger;

impl CustomLogger {
    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(CustomLogger))?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: ANSI color for log level
    fn color_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "\x1B[1;31m",
            Level::Warn => "\x1B[1;33m",
            Level::Info => "\x1B[1;32m",
            Level::Debug => "\x1B[1;36m",
            Level::Trace => "\x1B[1;35m",
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let mut stderr = std::io::stderr();
            let _ = writeln!(
                stderr,
                "{}{} {:<5} {}\x1B[0m",
                Self::color_for_level(record.level()),
                now,
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    CustomLogger::init(LevelFilter::Info)?;

    let cli = CommandLineOptions::parse();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = CommandLineOptions::command();
            generate(shell, &mut cmd, "docjobs", &mut std::io::stdout());
            Ok(())
        }
        Commands::Translate(args) => run_translate(args).await,
    }
}

async fn run_translate(options: TranslateArgs) -> Result<()> {
    let mut config = Config::load_or_create(&options.config_path)?;

    // Command line level wins over the configuration file
    if let Some(log_level) = &options.log_level {
        config.log_level = log_level.clone().into();
    }
    log::set_max_level(config.log_level.to_level_filter());

    // Override defaults with CLI options if provided
    if options.single {
        config.defaults.single_output = true;
    }
    if let Some(limit) = options.limit {
        config.defaults.test_mode_limit = Some(limit);
    }
    if let Some(timeout) = options.timeout {
        config.defaults.timeout_secs = Some(timeout);
    }
    if let Some(max_retries) = options.max_retries {
        config.defaults.max_retries = Some(max_retries);
    }

    config.validate().context("Configuration validation failed")?;

    let artifacts: Arc<dyn ArtifactStore> =
        Arc::new(LocalArtifactStore::new(config.storage.root_dir.clone()));
    let manager = JobManager::new(config.jobs.to_manager_config(), Some(Arc::clone(&artifacts)))?;

    let inputs = collect_inputs(&options.inputs)?;
    if inputs.is_empty() {
        return Err(anyhow!("No supported documents found in the given inputs"));
    }

    let translator = Arc::new(EchoTranslator::new());
    let multi_progress = MultiProgress::new();
    let mut submitted = Vec::new();

    for input in inputs {
        let filename = input
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let request = JobRequest::new(&filename, &options.model, &options.target_language)
            .with_options(config.defaults.clone());

        let job = match manager.create(request) {
            Ok(job) => job,
            Err(e) => {
                error!("Skipping {:?}: {}", input, e);
                continue;
            }
        };

        let progress_bar = multi_progress.add(ProgressBar::new(0));
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} paragraphs ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        progress_bar.set_style(style.progress_chars("█▓▒░"));
        progress_bar.set_message(filename.clone());

        let bar = progress_bar.clone();
        let callback: ProgressCallback = Arc::new(move |update: &ProgressUpdate| {
            bar.set_length(update.total as u64);
            bar.set_position(update.current as u64);
        });

        let operation = TextDocumentOperation::new(input, Arc::clone(&translator), Arc::clone(&artifacts));
        if manager.start(&job.id, operation, Some(callback)) {
            submitted.push((job.id, progress_bar));
        }
    }

    let job_timeout = config
        .defaults
        .timeout_secs
        .unwrap_or(config.jobs.timeout_secs);
    let wait_limit = Duration::from_secs(job_timeout.saturating_mul(4).max(1));
    let all_done = async {
        for (id, progress_bar) in &submitted {
            let record = manager.wait_for(id, wait_limit).await;
            match record {
                Some(record) if record.status == JobStatus::Completed => {
                    progress_bar.finish_with_message(format!("{} done", record.source_filename));
                }
                Some(record) => {
                    progress_bar.abandon_with_message(format!(
                        "{} {}",
                        record.source_filename, record.status
                    ));
                }
                None => progress_bar.abandon(),
            }
        }
    };

    tokio::select! {
        _ = all_done => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling {} unfinished jobs", manager.shutdown());
        }
    }

    let mut failed = 0;
    for (id, _) in &submitted {
        if let Some(record) = manager.get(id) {
            match record.status {
                JobStatus::Completed => info!(
                    "{} -> {:?}",
                    record.source_filename,
                    record.output_path.unwrap_or_default()
                ),
                _ => {
                    failed += 1;
                    error!(
                        "{}: {} {}",
                        record.source_filename,
                        record.status,
                        record.error_message.unwrap_or_default()
                    );
                }
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&manager.stats())?);
    println!("{}", serde_json::to_string_pretty(&manager.error_stats())?);
    manager.sweep_expired();

    if failed > 0 {
        return Err(anyhow!("{} of {} jobs did not complete", failed, submitted.len()));
    }
    Ok(())
}

/// Expand directories into the supported documents they contain
fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut documents = Vec::new();
    for input in inputs {
        if FileManager::dir_exists(input) {
            documents.extend(FileManager::find_documents(input)?);
        } else if FileManager::file_exists(input) {
            if DocumentType::from_path(input).is_none() {
                warn!("Unsupported document type: {:?}", input);
            }
            documents.push(input.clone());
        } else {
            return Err(anyhow!("Input path does not exist: {:?}", input));
        }
    }
    Ok(documents)
}

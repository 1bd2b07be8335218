//! # CLI Module
//!
//! Command-line interface for the resumable duplicate finder.
//!
//! ## Usage
//! ```bash
//! # Scan (or continue scanning) a collection
//! photo-dedup scan ~/Photos
//!
//! # Stop after ten minutes (or on Ctrl-C); run the same command again to continue
//! photo-dedup scan ~/Photos --time-limit 600
//!
//! # Only look for photos in ~/Photos that also exist in ~/Backup
//! photo-dedup scan ~/Photos --against ~/Backup
//!
//! # Inspect a checkpoint without running anything
//! photo-dedup status
//! photo-dedup groups --output json
//!
//! # Copy the checkpoint somewhere safe
//! photo-dedup backup ~/dedup-backup.db
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use resumable_photo_dedup::core::checkpoint::{CheckpointStore, SqliteCheckpointStore};
use resumable_photo_dedup::core::comparator::{DuplicateGroup, ResultAggregator};
use resumable_photo_dedup::core::engine::{Engine, EngineConfig, MetricKind, PrefilterKind};
use resumable_photo_dedup::error::Result;
use resumable_photo_dedup::events::{CompareEvent, Event, EventChannel, RunEvent, SignatureEvent};
use resumable_photo_dedup::RunOutcome;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Resumable Photo Dedup - find duplicates in collections of any size
#[derive(Parser, Debug)]
#[command(name = "photo-dedup")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan a collection, continuing from the checkpoint when possible
    Scan {
        /// Collection root
        root: PathBuf,

        /// Second collection; only pairs across the two are compared
        #[arg(long, value_name = "DIR")]
        against: Option<PathBuf>,

        /// Checkpoint database path
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Number of workers (defaults to the number of CPUs)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Score at or above which a pair is a duplicate (0-1)
        #[arg(long, default_value = "0.95")]
        duplicate_threshold: f64,

        /// Score at or above which a pair is similar (0-1)
        #[arg(long, default_value = "0.90")]
        similar_threshold: f64,

        /// Cheap check applied before scoring
        #[arg(long, default_value = "dimensions")]
        prefilter: PrefilterArg,

        /// Relative difference the pre-filter tolerates
        #[arg(long, default_value = "0.25")]
        tolerance: f64,

        /// Similarity metric
        #[arg(short, long, default_value = "thumbnail-mse")]
        metric: MetricArg,

        /// Also match images rotated by 90, 180 or 270 degrees
        #[arg(long)]
        rotate: bool,

        /// Side of the signature thumbnail in pixels
        #[arg(long, default_value = "32")]
        signature_size: u32,

        /// Pairs handed to the workers per batch
        #[arg(long, default_value = "64")]
        batch_size: usize,

        /// Discard any existing checkpoint and start over
        #[arg(long)]
        fresh: bool,

        /// Retry images that failed to decode on earlier runs
        #[arg(long)]
        retry_failed: bool,

        /// Include hidden files
        #[arg(long)]
        include_hidden: bool,

        /// Stop gracefully after this many seconds
        #[arg(long)]
        time_limit: Option<u64>,

        /// Output format
        #[arg(short, long, default_value = "pretty")]
        output: OutputFormat,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show progress recorded in a checkpoint
    Status {
        /// Checkpoint database path
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "pretty")]
        output: OutputFormat,
    },

    /// Print the groups recorded in a checkpoint
    Groups {
        /// Checkpoint database path
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Include images without duplicates
        #[arg(long)]
        all: bool,

        /// Output format
        #[arg(short, long, default_value = "pretty")]
        output: OutputFormat,
    },

    /// Copy the checkpoint database to a new file
    Backup {
        /// Destination file (must not exist)
        destination: PathBuf,

        /// Checkpoint database path
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PrefilterArg {
    /// Compare widths and heights (default)
    Dimensions,
    /// Compare aspect ratios
    AspectRatio,
    /// Score every pair
    None,
}

impl From<PrefilterArg> for PrefilterKind {
    fn from(arg: PrefilterArg) -> Self {
        match arg {
            PrefilterArg::Dimensions => PrefilterKind::Dimensions,
            PrefilterArg::AspectRatio => PrefilterKind::AspectRatio,
            PrefilterArg::None => PrefilterKind::None,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MetricArg {
    /// Grayscale thumbnail pixel error (default)
    ThumbnailMse,
    /// Difference hash Hamming distance, faster and coarser
    Hamming,
}

impl From<MetricArg> for MetricKind {
    fn from(arg: MetricArg) -> Self {
        match arg {
            MetricArg::ThumbnailMse => MetricKind::ThumbnailMse,
            MetricArg::Hamming => MetricKind::Hamming,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable output with colors
    Pretty,
    /// JSON output for scripting
    Json,
    /// Minimal output (paths only)
    Minimal,
}

/// Run the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            root,
            against,
            checkpoint,
            workers,
            duplicate_threshold,
            similar_threshold,
            prefilter,
            tolerance,
            metric,
            rotate,
            signature_size,
            batch_size,
            fresh,
            retry_failed,
            include_hidden,
            time_limit,
            output,
            verbose,
        } => {
            resumable_photo_dedup::init_tracing(if verbose { "info" } else { "warn" });

            // Paths are stored in the checkpoint, so they must not depend on
            // the working directory
            let root = root.canonicalize().unwrap_or(root);
            let mut builder = EngineConfig::builder()
                .root(root)
                .checkpoint_path(checkpoint.unwrap_or_else(default_checkpoint))
                .thresholds(duplicate_threshold, similar_threshold)
                .prefilter(prefilter.into())
                .prefilter_tolerance(tolerance)
                .metric(metric.into())
                .rotate(rotate)
                .signature_size(signature_size)
                .batch_size(batch_size)
                .resume(!fresh)
                .retry_failed(retry_failed)
                .include_hidden(include_hidden);
            if let Some(workers) = workers {
                builder = builder.worker_count(workers);
            }
            if let Some(against) = against {
                builder = builder.compare_root(against.canonicalize().unwrap_or(against));
            }

            run_scan(
                builder.build()?,
                time_limit.map(Duration::from_secs),
                output,
                verbose,
            )
        }
        Commands::Status { checkpoint, output } => {
            resumable_photo_dedup::init_tracing("warn");
            run_status(&checkpoint.unwrap_or_else(default_checkpoint), output)
        }
        Commands::Groups {
            checkpoint,
            all,
            output,
        } => {
            resumable_photo_dedup::init_tracing("warn");
            run_groups(&checkpoint.unwrap_or_else(default_checkpoint), all, output)
        }
        Commands::Backup {
            destination,
            checkpoint,
        } => {
            resumable_photo_dedup::init_tracing("warn");
            let store = open_existing(&checkpoint.unwrap_or_else(default_checkpoint))?;
            store.backup(&destination)?;
            Term::stderr()
                .write_line(&format!(
                    "{} Checkpoint copied to {}",
                    style("✓").green().bold(),
                    display_path(&destination)
                ))
                .ok();
            Ok(())
        }
    }
}

fn default_checkpoint() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("resumable-photo-dedup")
        .join("checkpoint.db")
}

fn open_existing(path: &Path) -> Result<SqliteCheckpointStore> {
    if !path.exists() {
        return Err(resumable_photo_dedup::error::CheckpointError::OpenFailed {
            path: path.to_path_buf(),
            reason: "no checkpoint exists at this path; run `photo-dedup scan` first".to_string(),
        }
        .into());
    }
    Ok(SqliteCheckpointStore::open(path)?)
}

fn run_scan(
    config: EngineConfig,
    time_limit: Option<Duration>,
    output: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let term = Term::stderr();

    if matches!(output, OutputFormat::Pretty) {
        term.write_line(&format!(
            "{} {}",
            style("Resumable Photo Dedup").bold().cyan(),
            style(concat!("v", env!("CARGO_PKG_VERSION"))).dim()
        ))
        .ok();
        term.write_line("").ok();
    }

    let (sender, receiver) = EventChannel::lossy(1024);
    let engine = Engine::builder().config(config).events(sender).build()?;

    let progress = if matches!(output, OutputFormat::Pretty) {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .map(|s| s.progress_chars("█▓░"))
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Some(pb)
    } else {
        None
    };

    let progress_clone = progress.clone();

    // Handle events in a separate thread
    let event_thread = thread::spawn(move || {
        for event in receiver.iter() {
            let Some(ref pb) = progress_clone else {
                continue;
            };
            match event {
                Event::Run(RunEvent::PhaseChanged { phase }) => {
                    pb.set_message(phase.to_string());
                }
                Event::Signature(SignatureEvent::Started { pending, .. }) => {
                    pb.set_length(pending as u64);
                    pb.set_position(0);
                    pb.set_message("signatures");
                }
                Event::Signature(SignatureEvent::Progress(p)) => {
                    pb.set_position(p.completed as u64);
                }
                Event::Signature(SignatureEvent::Failed { path, reason }) if verbose => {
                    pb.println(format!("  {} {}: {}", style("!").yellow(), display_path(&path), reason));
                }
                Event::Compare(CompareEvent::Started {
                    total_pairs,
                    already_resolved,
                }) => {
                    pb.set_length(total_pairs);
                    pb.set_position(already_resolved);
                    pb.set_message("pairs");
                }
                Event::Compare(CompareEvent::Progress(p)) => {
                    pb.set_length(p.pairs_total);
                    pb.set_position(p.pairs_resolved);
                }
                Event::Run(RunEvent::Completed { .. }) | Event::Run(RunEvent::Interrupted { .. }) => {
                    pb.finish_and_clear();
                }
                _ => {}
            }
        }
    });

    let handle = engine.start();

    // First Ctrl-C stops gracefully so the checkpoint stays resumable; a
    // second one gives up on waiting
    let interrupt = handle.cancellation_token();
    if let Err(error) = ctrlc::set_handler(move || {
        if interrupt.is_cancelled() {
            std::process::exit(130);
        }
        interrupt.cancel();
    }) {
        tracing::warn!(%error, "could not install the Ctrl-C handler");
    }

    if let Some(limit) = time_limit {
        let started = Instant::now();
        while !handle.is_finished() {
            if started.elapsed() >= limit {
                handle.stop();
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }
    }
    let outcome = handle.wait();

    // The engine owned the only sender, so the event thread ends with it
    event_thread.join().ok();
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    let outcome = outcome?;

    match output {
        OutputFormat::Pretty => print_pretty_outcome(&term, &outcome, verbose),
        OutputFormat::Json => print_json(&outcome),
        OutputFormat::Minimal => print_minimal_groups(outcome.duplicates()),
    }

    Ok(())
}

fn run_status(checkpoint: &Path, output: OutputFormat) -> Result<()> {
    let store = open_existing(checkpoint)?;
    let progress = Engine::progress_from_store(&store)?;
    let state = store.load_run_state()?;

    match output {
        OutputFormat::Json => print_json(&serde_json::json!({
            "checkpoint": checkpoint,
            "run": state,
            "progress": progress,
        })),
        OutputFormat::Minimal => {
            println!("{} {}/{}", progress.phase, progress.pairs_resolved, progress.pairs_total);
        }
        OutputFormat::Pretty => {
            let term = Term::stdout();
            if let Some(state) = &state {
                term.write_line(&format!(
                    "{} {} ({})",
                    style("Run").bold(),
                    state.run_id,
                    style(state.phase).yellow()
                ))
                .ok();
                term.write_line(&format!(
                    "  root {}, {} invocation(s), last update {}",
                    display_path(&state.settings.root),
                    state.invocations,
                    state.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
                ))
                .ok();
            }
            term.write_line(&format!(
                "  {} images, {} signed, {} failed",
                style(progress.images_total).cyan(),
                style(progress.images_signed).cyan(),
                style(progress.images_failed).red()
            ))
            .ok();
            term.write_line(&format!(
                "  {}/{} pairs resolved ({:.1}%), {} errored",
                style(progress.pairs_resolved).cyan(),
                progress.pairs_total,
                progress.fraction() * 100.0,
                style(progress.pairs_errored).red()
            ))
            .ok();
        }
    }

    Ok(())
}

fn run_groups(checkpoint: &Path, all: bool, output: OutputFormat) -> Result<()> {
    let store: Arc<dyn CheckpointStore> = Arc::new(open_existing(checkpoint)?);
    let aggregator = ResultAggregator::new(store);
    let groups = if all {
        aggregator.groups()?
    } else {
        aggregator.duplicates()?
    };

    match output {
        OutputFormat::Pretty => print_pretty_groups(&Term::stdout(), &groups),
        OutputFormat::Json => print_json(&groups),
        OutputFormat::Minimal => print_minimal_groups(groups.iter()),
    }

    Ok(())
}

fn print_pretty_outcome(term: &Term, outcome: &RunOutcome, verbose: bool) {
    term.write_line("").ok();
    if outcome.is_complete() {
        term.write_line(&format!("{} Scan Complete", style("✓").green().bold()))
            .ok();
    } else {
        term.write_line(&format!(
            "{} Scan Interrupted - run the same command again to continue",
            style("⏸").yellow().bold()
        ))
        .ok();
    }
    term.write_line("").ok();

    let progress = &outcome.progress;
    term.write_line(&format!(
        "  {} images signed ({} failed) in {:.1}s",
        style(progress.images_signed).cyan(),
        style(progress.images_failed).red(),
        outcome.duration_ms as f64 / 1000.0
    ))
    .ok();
    term.write_line(&format!(
        "  {}/{} pairs resolved",
        style(progress.pairs_resolved).cyan(),
        progress.pairs_total
    ))
    .ok();

    if verbose {
        let discovery = &outcome.discovery;
        term.write_line(&format!(
            "  {} new, {} changed, {} missing since the last run",
            discovery.new_images, discovery.changed_images, discovery.missing_images
        ))
        .ok();
    }

    if !outcome.is_complete() {
        return;
    }

    let duplicates: Vec<DuplicateGroup> = outcome.duplicates().cloned().collect();
    term.write_line(&format!(
        "  {} duplicate groups found",
        style(duplicates.len()).cyan()
    ))
    .ok();
    term.write_line("").ok();

    print_pretty_groups(term, &duplicates);

    term.write_line(&format!(
        "{}",
        style("Remember: No files were deleted. Review carefully before taking action.").dim()
    ))
    .ok();
}

fn print_pretty_groups(term: &Term, groups: &[DuplicateGroup]) {
    if groups.is_empty() {
        term.write_line(&format!("  {} No duplicates found!", style("🎉").green()))
            .ok();
        return;
    }

    term.write_line(&format!("{}", style("Duplicate Groups:").bold().underlined()))
        .ok();
    term.write_line("").ok();

    for (i, group) in groups.iter().enumerate() {
        let link = group
            .verdict
            .map(|verdict| verdict.to_string())
            .unwrap_or_else(|| "unique".to_string());
        let score = group
            .average_score
            .map(|score| format!(", avg score {score:.3}"))
            .unwrap_or_default();
        term.write_line(&format!(
            "  {} {} ({} images{})",
            style(format!("Group {}:", i + 1)).bold(),
            style(link).yellow(),
            group.len(),
            score
        ))
        .ok();

        for (position, path) in group.paths.iter().enumerate() {
            let marker = if position == 0 {
                style("★").green().to_string()
            } else {
                style("○").dim().to_string()
            };
            term.write_line(&format!("    {} {}", marker, display_path(path)))
                .ok();
        }
        term.write_line("").ok();
    }
}

fn print_minimal_groups<'a>(groups: impl Iterator<Item = &'a DuplicateGroup>) {
    for group in groups {
        for path in group.paths.iter().skip(1) {
            println!("{}", path.display());
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(error) => eprintln!("failed to encode output: {error}"),
    }
}

fn display_path(path: &Path) -> String {
    match dirs::home_dir().and_then(|home| path.strip_prefix(home).ok().map(Path::to_path_buf)) {
        Some(relative) => format!("~/{}", relative.display()),
        None => path.display().to_string(),
    }
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use execguard_core::{paths, GuardError, GuardSettings, Monitor, ScanOutcome};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

const EXIT_CONFIGURATION_ABSENT: u8 = 101;
const EXIT_FAILURE: u8 = 102;
const MAX_FLAGGED_EXIT: usize = 100;

#[derive(Parser, Debug)]
#[command(author, version, about = "Darklock executable integrity monitor", long_about = None)]
struct Cli {
    /// Settings file (default: $EXECGUARD_CONFIG, then <data dir>/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify whitelisted files against the baseline; exit status is the flagged count
    Scan {
        /// Move new and modified files to the quarantine directory
        #[arg(long)]
        quarantine: bool,
        #[arg(long)]
        json: bool,
    },
    /// Refresh the baseline (incremental unless --full or no baseline yet)
    UpdateBaseline {
        #[arg(long)]
        full: bool,
    },
    /// Print the current baseline
    ShowBaseline {
        #[arg(long)]
        json: bool,
    },
    /// Append hashes to new allow-log lines
    EnrichLog,
    /// Write the baseline as a quoted path list for the analysis backend
    ExportBaseline {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the directories the whitelist resolves to
    Resolve,
    /// Show recent alert log entries, newest first
    Alerts {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            let absent = err
                .downcast_ref::<GuardError>()
                .is_some_and(GuardError::is_configuration_absent);
            ExitCode::from(if absent {
                EXIT_CONFIGURATION_ABSENT
            } else {
                EXIT_FAILURE
            })
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_settings(config: Option<PathBuf>) -> Result<GuardSettings> {
    let path = match config {
        Some(path) => path,
        None => paths::settings_path()?,
    };
    GuardSettings::load(&path).with_context(|| format!("loading settings from {}", path.display()))
}

fn run(cli: Cli) -> Result<ExitCode> {
    let settings = load_settings(cli.config)?;
    let monitor = Monitor::from_settings(settings);

    match cli.command {
        Commands::Scan { quarantine, json } => {
            let outcome = monitor.scan(quarantine).context("scan failed")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_scan(&outcome);
            }
            info!(flagged = outcome.flagged_count(), quarantine, "scan-complete");
            return Ok(scan_exit_code(outcome.flagged_count()));
        }
        Commands::UpdateBaseline { full } => {
            let summary = monitor
                .update_baseline(full)
                .context("baseline update failed")?;
            info!(mode = ?summary.mode, total = summary.total, "update-complete");
            println!(
                "{:?} update: scanned={} added={} overwritten={} removed={} skipped={} total={}",
                summary.mode,
                summary.scanned,
                summary.added,
                summary.overwritten,
                summary.removed,
                summary.skipped,
                summary.total
            );
        }
        Commands::ShowBaseline { json } => {
            let baseline = monitor.show_baseline();
            if json {
                let records: Vec<_> = baseline.records().collect();
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for r in baseline.records() {
                    println!("{}  {:>10}  {}", r.primary_hash, r.size_bytes, r.path);
                }
                println!("{} entries", baseline.len());
            }
        }
        Commands::EnrichLog => {
            let summary = monitor.enrich_log().context("log enrichment failed")?;
            info!(appended = summary.appended, "enrich-complete");
            println!(
                "appended={} enriched={} (sink had {} lines)",
                summary.appended, summary.enriched, summary.sink_lines_before
            );
        }
        Commands::ExportBaseline { output } => {
            let summary = monitor
                .export_baseline(output.as_deref())
                .context("baseline export failed")?;
            info!(entries = summary.entries, path = %summary.location.display(), "export-complete");
            println!("{} entries -> {}", summary.entries, summary.location.display());
        }
        Commands::Resolve => {
            for dir in monitor.resolve_whitelist()? {
                println!("{}", dir.display());
            }
        }
        Commands::Alerts { limit } => {
            for entry in monitor.alerts(Some(limit))? {
                println!(
                    "{} {:?} {} {} {}",
                    entry.timestamp.to_rfc3339(),
                    entry.level,
                    entry.event,
                    entry.path.as_deref().unwrap_or("-"),
                    entry.detail
                );
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_scan(outcome: &ScanOutcome) {
    for flagged in &outcome.flagged {
        println!(
            "{:<8} {}  {}",
            flagged.classification.to_string().to_uppercase(),
            flagged.record.path,
            flagged.record.reason.as_deref().unwrap_or("")
        );
    }
    for q in &outcome.quarantined {
        if q.moved() {
            println!("quarantined {} -> {}", q.source.display(), q.destination.display());
        } else {
            println!("quarantine failed for {}", q.source.display());
        }
    }
    println!(
        "known={} new={} modified={} skipped={}",
        outcome.known, outcome.new, outcome.modified, outcome.skipped
    );
}

fn scan_exit_code(flagged: usize) -> ExitCode {
    ExitCode::from(flagged.min(MAX_FLAGGED_EXIT) as u8)
}

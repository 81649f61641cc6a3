//! # Bakim CLI - Incremental versioned backups
//!
//! Archives each FILE argument into `<archive-root>/<YYYY-MM-DD>`, placing
//! changed entries into collision slots and refreshing the `newest` view.
//!
//! ## Usage
//! ```bash
//! # Back up two trees into /big
//! bakim /etc /home/user
//!
//! # Different archive location, no immutable flags, machine-readable report
//! bakim --archive-root /srv/backup --no-protect --json ~/projects
//! ```
//!
//! Exit status is 0 when the run completed (warnings included) and 1 on a
//! usage error or any fatal condition.

use bakim::utils::format_bytes;
use bakim::{BackupReport, BakimBuilder, BakimError, Result};
use clap::error::ErrorKind;
use clap::Parser;
use colored::*;
use humantime::format_duration;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Bakim CLI - Incremental, versioned filesystem backup
#[derive(Parser)]
#[command(name = "bakim")]
#[command(version)]
#[command(about = "Incremental, versioned backup into dated archive directories")]
#[command(long_about = None)]
struct Cli {
    /// Files or directories to back up
    #[arg(value_name = "FILE", required = true)]
    files: Vec<PathBuf>,

    /// Archive root (defaults to /big)
    #[arg(long, value_name = "DIR")]
    archive_root: Option<PathBuf>,

    /// Branch label (defaults to today's date, YYYY-MM-DD)
    #[arg(long)]
    branch: Option<String>,

    /// Maximum directory handles held open during a walk
    #[arg(long, value_name = "N")]
    max_open_dirs: Option<usize>,

    /// Do not mark archived files immutable
    #[arg(long)]
    no_protect: bool,

    /// Do not force archive directories to be owned by root
    #[arg(long)]
    no_chown_archive: bool,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
            _ => {
                let _ = e.print();
                std::process::exit(1);
            }
        },
    };

    // Set up logging
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> Result<()> {
    let mut builder = BakimBuilder::new().protect(!cli.no_protect);

    if let Some(root) = cli.archive_root {
        let root = std::path::absolute(&root)
            .map_err(|e| BakimError::Usage(format!("bad archive root {:?}: {}", root, e)))?;
        builder = builder.archive_root(root);
    }
    if let Some(branch) = cli.branch {
        builder = builder.branch(branch);
    }
    if let Some(n) = cli.max_open_dirs {
        builder = builder.max_open_dirs(n);
    }
    if cli.no_chown_archive {
        builder = builder.archive_owner(None);
    }

    let bakim = builder.build()?;
    let report = bakim.backup(&cli.files)?;

    if cli.json {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| BakimError::internal(format!("cannot encode report: {}", e)))?;
        println!("{}", json);
    } else {
        print_summary(&report, bakim.layout().primary().display().to_string());
    }
    Ok(())
}

fn print_summary(report: &BackupReport, primary: String) {
    println!(
        "{} Backed up {} argument(s) into {}",
        "✓".green().bold(),
        report.arguments,
        primary.yellow().bold()
    );
    println!(
        "  Archived: {} ({} files, {} directories, {} symlinks)",
        report.entries_archived().to_string().cyan(),
        report.files_archived,
        report.directories_archived,
        report.symlinks_archived
    );
    println!("  Unchanged: {}", report.unchanged.to_string().cyan());
    println!("  Copied: {}", format_bytes(report.bytes_copied).cyan());
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(report.duration_ms))
            .to_string()
            .cyan()
    );

    if report.collisions > 0 {
        println!(
            "  Collisions: {} ({} new slots)",
            report.collisions.to_string().yellow(),
            report.slots_created
        );
    }
    if report.skipped > 0 {
        println!("  Skipped: {} special files", report.skipped);
    }
    if report.warnings > 0 {
        println!(
            "  {}: {} (see log output)",
            "Warnings".yellow().bold(),
            report.warnings
        );
    }
}

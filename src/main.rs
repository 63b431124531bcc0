mod cli;

use crate::cli::{Cli, Command};
use clap::Parser;
use darkroom_config::Config;
use darkroom_library::{Failure, Library, Plan, RunId, RunStatus};
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).map_err(report)?;
    if let Some(options) = cli.command.options() {
        options.apply_to(&mut config);
        config.library.destination = config.library.destination.map(absolute).transpose()?;
    }
    config.validate().map_err(report)?;
    let library = Library::open(&config).await.map_err(report)?;

    // Stop at the next file boundary on Ctrl-C; the journal stays consistent.
    let cancel = library.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping after the current file");
            cancel.cancel();
        }
    });

    match cli.command {
        Command::Scan { source, .. } => {
            let plan = library.scan(&absolute(source)?).await.map_err(report)?;
            print_plan(&plan);
            Ok(ExitCode::SUCCESS)
        },
        Command::Organize { source, .. } => {
            let summary = library.organize(&absolute(source)?).await.map_err(report)?;
            println!(
                "run {}: {} (applied {}, skipped {}, failed {}, not attempted {})",
                summary.run_id,
                summary.status,
                summary.applied,
                summary.skipped,
                summary.failed,
                summary.pending
            );
            print_failures(&summary.failures);
            if summary.applied > 0 {
                println!("undo with: darkroom undo {}", summary.run_id);
            }
            Ok(exit_code(summary.status == RunStatus::Completed))
        },
        Command::Undo { run_id } => {
            let summary = library.undo(RunId::from(run_id)).await.map_err(report)?;
            println!(
                "run {}: {} (restored {}, unchanged {}, failed {})",
                summary.run_id, summary.status, summary.undone, summary.skipped, summary.failed_to_undo
            );
            print_failures(&summary.failures);
            Ok(exit_code(summary.status == RunStatus::Undone))
        },
        Command::Runs => {
            for overview in library.list_runs().await.map_err(report)? {
                let run = &overview.run;
                println!(
                    "{:>5}  {:<16}  {}  {} -> {}  ({} entries, {} applied, {} failed, {} undone)",
                    run.id.get(),
                    run.status,
                    run.started_at,
                    run.source_root.display(),
                    run.destination_root.display(),
                    overview.counts.total,
                    overview.counts.applied,
                    overview.counts.failed,
                    overview.counts.undone,
                );
            }
            Ok(ExitCode::SUCCESS)
        },
        Command::Check => {
            let report_ = library.check_consistency().await.map_err(report)?;
            if report_.run_active {
                println!("another run is in progress right now");
            }
            for overview in &report_.interrupted {
                println!(
                    "run {} was interrupted with {} of {} entries applied; `darkroom undo {}` restores it",
                    overview.run.id, overview.counts.applied, overview.counts.total, overview.run.id
                );
            }
            Ok(exit_code(report_.is_clean()))
        },
    }
}

fn print_plan(plan: &Plan) {
    for op in &plan.operations {
        let destination = op.destination.as_deref().map(Path::display);
        match (destination, &op.reason) {
            (Some(destination), None) => println!("{:<15} {} -> {}", op.kind, op.source.display(), destination),
            (_, Some(reason)) => println!("{:<15} {} ({reason})", op.kind, op.source.display()),
            (None, None) => println!("{:<15} {}", op.kind, op.source.display()),
        }
    }
    let stats = &plan.stats;
    println!(
        "{} files found, {} ignored: {} to move, {} to copy, {} duplicates, {} unreadable, {} undated",
        stats.discovered, stats.ignored, stats.moves, stats.copies, stats.duplicates, stats.unreadable, stats.undated
    );
}

fn print_failures(failures: &[Failure]) {
    for failure in failures {
        eprintln!("  {}: {}", failure.path.display(), failure.reason);
    }
}

fn exit_code(success: bool) -> ExitCode {
    match success {
        true => ExitCode::SUCCESS,
        false => ExitCode::FAILURE,
    }
}

/// The local backend only deals in absolute paths.
fn absolute(path: impl AsRef<Path>) -> miette::Result<std::path::PathBuf> {
    std::path::absolute(path.as_ref())
        .map_err(|e| miette::miette!("unable to resolve {}: {e}", path.as_ref().display()))
}

/// Render an error tree (with locations) for the terminal.
fn report<E>(e: exn::Exn<E>) -> miette::Report
where
    E: std::error::Error + Send + Sync + 'static,
{
    miette::miette!("{e:?}")
}

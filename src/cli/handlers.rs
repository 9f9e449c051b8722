//! Subcommand handlers
//!
//! Each handler returns the process exit code.

use super::commands::{CheckArgs, PollArgs};
use crate::checker::ProjectChecker;
use crate::config::PollerConfig;
use crate::directory::FileDirectory;
use crate::poll::{CycleReport, PollCycle};
use crate::scheduler::run_scheduler;
use crate::trigger::{BuildTrigger, CommandBuildTrigger, LoggingBuildTrigger};
use crate::watermark::Watermark;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;

pub async fn handle_check(args: &CheckArgs, config: &PollerConfig) -> i32 {
    let watermark = match Watermark::parse(&args.since) {
        Ok(watermark) => watermark,
        Err(e) => {
            println!("FAILED: {}", e);
            return EXIT_FAILURE;
        }
    };

    let checker = match config.repository_checker() {
        Ok(checker) => checker,
        Err(e) => {
            error!("Configuration error: {}", e);
            return EXIT_CONFIG;
        }
    };

    debug!("Checking {}/{} since {}", args.owner, args.name, watermark);

    match checker.needs_build(&args.owner, &args.name, Some(&watermark)).await {
        Ok(true) => {
            println!("NEEDSBUILD");
            EXIT_OK
        }
        Ok(false) => {
            println!("UNCHANGED");
            EXIT_OK
        }
        Err(e) => {
            println!("FAILED: {}", e);
            EXIT_FAILURE
        }
    }
}

pub async fn handle_poll(args: &PollArgs, config: &PollerConfig) -> i32 {
    let checker = match config.repository_checker() {
        Ok(checker) => checker,
        Err(e) => {
            error!("Configuration error: {}", e);
            return EXIT_CONFIG;
        }
    };

    let trigger: Arc<dyn BuildTrigger> = match &args.build_command {
        Some(command) => {
            info!("Build requests run: {}", command);
            Arc::new(CommandBuildTrigger::new(command.clone()))
        }
        None => {
            warn!("No --build-command given, build requests are only logged");
            Arc::new(LoggingBuildTrigger)
        }
    };

    let concurrency = args
        .concurrency
        .map(|n| n as usize)
        .unwrap_or(config.concurrency);

    let cycle = PollCycle::new(
        Arc::new(FileDirectory::new(args.directory.clone())),
        Arc::new(checker),
        trigger,
    )
    .with_concurrency(concurrency);

    if args.once {
        return match cycle.run().await {
            Ok(report) => {
                print_report(&report);
                EXIT_OK
            }
            Err(e) => {
                error!("Poll cycle aborted: {}", e);
                EXIT_FAILURE
            }
        };
    }

    let every = Duration::from_secs(args.interval.unwrap_or(config.poll_interval_secs));
    let shutdown = CancellationToken::new();

    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted, finishing up");
                on_signal.cancel();
            }
            Err(e) => error!("Cannot listen for Ctrl-C: {}", e),
        }
    });

    let stats = run_scheduler(Arc::new(cycle), every, shutdown).await;
    if stats.cycles > 0 && stats.failed_cycles == stats.cycles {
        EXIT_FAILURE
    } else {
        EXIT_OK
    }
}

fn print_report(report: &CycleReport) {
    for project in &report.projects {
        println!("{}/{}: {}", project.owner, project.name, project.outcome);
    }
    info!(
        checked = report.projects.len(),
        needs_build = report.needs_build().count(),
        failed = report.failed().count(),
        skipped = report.skipped().count(),
        "Poll cycle finished"
    );
}

//! Periodic poll driver
//!
//! Runs a [`PollCycle`] on a fixed interval until shut down. A tick that
//! arrives while a cycle is still in flight (started here or by another
//! holder of the same `PollCycle`) is dropped rather than queued.

use crate::poll::PollCycle;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Counters for a scheduler run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub cycles: usize,
    pub failed_cycles: usize,
    pub skipped_ticks: usize,
}

/// Polls every `every` until `shutdown` is cancelled; the first cycle starts immediately.
///
/// Cancelling also stops the cycle in flight before its next project.
pub async fn run_scheduler(
    cycle: Arc<PollCycle>,
    every: Duration,
    shutdown: CancellationToken,
) -> SchedulerStats {
    let mut stats = SchedulerStats::default();
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Polling every {}s", every.as_secs_f64());

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => {}
        }

        match cycle.try_run(&shutdown).await {
            None => {
                warn!("Previous poll cycle still running, skipping tick");
                stats.skipped_ticks += 1;
            }
            Some(Ok(report)) => {
                stats.cycles += 1;
                for project in report.failed() {
                    warn!("{}/{}: {}", project.owner, project.name, project.outcome);
                }
            }
            Some(Err(e)) => {
                stats.cycles += 1;
                stats.failed_cycles += 1;
                error!("Poll cycle aborted: {}", e);
            }
        }
    }

    info!(
        cycles = stats.cycles,
        failed_cycles = stats.failed_cycles,
        skipped_ticks = stats.skipped_ticks,
        "Scheduler stopped"
    );
    stats
}

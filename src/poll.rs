//! Poll cycles
//!
//! One cycle enumerates the tracked-repository directory, checks every
//! eligible project and requests builds for the ones that changed. Cycles on
//! the same [`PollCycle`] never overlap: the gate is held for the whole pass
//! and released when the pass ends, whichever way it ends. Inside a cycle,
//! projects are checked concurrently up to the configured limit, and the
//! report keeps directory order.

use crate::checker::ProjectChecker;
use crate::directory::{DirectoryError, Eligibility, RepositoryDirectory, TrackedProject};
use crate::trigger::BuildTrigger;
use crate::watermark::Watermark;
use futures_util::stream::{self, StreamExt};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Default number of projects checked at once
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Failures that abort a whole cycle
#[derive(Debug, Error)]
pub enum PollError {
    #[error("cannot enumerate tracked repositories: {0}")]
    Directory(#[from] DirectoryError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectOutcome {
    NeedsBuild,
    Unchanged,
    Skipped(String),
    Failed(String),
}

impl fmt::Display for ProjectOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectOutcome::NeedsBuild => write!(f, "NEEDSBUILD"),
            ProjectOutcome::Unchanged => write!(f, "UNCHANGED"),
            ProjectOutcome::Skipped(reason) => write!(f, "SKIPPED ({})", reason),
            ProjectOutcome::Failed(message) => write!(f, "FAILED ({})", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectReport {
    pub owner: String,
    pub name: String,
    pub outcome: ProjectOutcome,
}

/// Result of one pass over the directory
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: Watermark,
    pub projects: Vec<ProjectReport>,
}

impl CycleReport {
    pub fn needs_build(&self) -> impl Iterator<Item = &ProjectReport> {
        self.projects
            .iter()
            .filter(|p| p.outcome == ProjectOutcome::NeedsBuild)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ProjectReport> {
        self.projects
            .iter()
            .filter(|p| matches!(p.outcome, ProjectOutcome::Failed(_)))
    }

    pub fn skipped(&self) -> impl Iterator<Item = &ProjectReport> {
        self.projects
            .iter()
            .filter(|p| matches!(p.outcome, ProjectOutcome::Skipped(_)))
    }
}

pub struct PollCycle {
    directory: Arc<dyn RepositoryDirectory>,
    checker: Arc<dyn ProjectChecker>,
    trigger: Arc<dyn BuildTrigger>,
    concurrency: usize,
    gate: Mutex<()>,
}

impl PollCycle {
    pub fn new(
        directory: Arc<dyn RepositoryDirectory>,
        checker: Arc<dyn ProjectChecker>,
        trigger: Arc<dyn BuildTrigger>,
    ) -> Self {
        Self {
            directory,
            checker,
            trigger,
            concurrency: DEFAULT_CONCURRENCY,
            gate: Mutex::new(()),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn is_running(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    /// Runs a cycle, waiting for any cycle already in flight to finish first.
    pub async fn run(&self) -> Result<CycleReport, PollError> {
        self.run_until(&CancellationToken::new()).await
    }

    /// Like [`run`](Self::run); projects not yet started when `cancel` fires
    /// are reported as skipped.
    pub async fn run_until(&self, cancel: &CancellationToken) -> Result<CycleReport, PollError> {
        let _gate = self.gate.lock().await;
        self.cycle(cancel).await
    }

    /// Runs a cycle unless one is already in flight, in which case `None`.
    pub async fn try_run(&self, cancel: &CancellationToken) -> Option<Result<CycleReport, PollError>> {
        let _gate = self.gate.try_lock().ok()?;
        Some(self.cycle(cancel).await)
    }

    async fn cycle(&self, cancel: &CancellationToken) -> Result<CycleReport, PollError> {
        let started_at = Watermark::now();
        let projects = self.directory.fetch_all().await?;
        info!("Iterating over {} repositories.", projects.len());

        let projects: Vec<ProjectReport> = stream::iter(projects)
            .map(|project| self.process(project, started_at, cancel))
            .buffered(self.concurrency)
            .collect()
            .await;

        let report = CycleReport {
            started_at,
            projects,
        };
        info!(
            total = report.projects.len(),
            needs_build = report.needs_build().count(),
            failed = report.failed().count(),
            skipped = report.skipped().count(),
            "Poll cycle finished"
        );
        Ok(report)
    }

    async fn process(
        &self,
        project: TrackedProject,
        started_at: Watermark,
        cancel: &CancellationToken,
    ) -> ProjectReport {
        let outcome = self.outcome(&project, started_at, cancel).await;
        ProjectReport {
            owner: project.owner,
            name: project.name,
            outcome,
        }
    }

    async fn outcome(
        &self,
        project: &TrackedProject,
        started_at: Watermark,
        cancel: &CancellationToken,
    ) -> ProjectOutcome {
        let full_name = project.full_name();

        if cancel.is_cancelled() {
            return ProjectOutcome::Skipped("cancelled".to_string());
        }

        match self.directory.eligibility(project) {
            Eligibility::Eligible => {}
            Eligibility::Unconfigured => {
                info!("{}: not configured, skipping", full_name);
                return ProjectOutcome::Skipped("not configured".to_string());
            }
            Eligibility::NameConflict { store_name } => {
                info!("{}: store name {} registered elsewhere, skipping", full_name, store_name);
                return ProjectOutcome::Skipped(format!("store name {} conflict", store_name));
            }
        }

        let watermark = match project.watermark() {
            Ok(watermark) => watermark,
            Err(e) => {
                error!("{}: FAILED ({})", full_name, e);
                return ProjectOutcome::Failed(e.to_string());
            }
        };

        info!("{}: Polling ...", full_name);
        let changed = self
            .checker
            .needs_build(&project.owner, &project.name, watermark.as_ref())
            .await;

        match changed {
            Ok(true) => {
                info!("{}: NEEDSBUILD", full_name);
                self.dispatch(project, started_at).await
            }
            Ok(false) => {
                info!("{}: UNCHANGED", full_name);
                ProjectOutcome::Unchanged
            }
            Err(e) if e.is_systemic() => {
                error!(auth = true, "{}: FAILED ({}); check the GitHub token", full_name, e);
                ProjectOutcome::Failed(e.to_string())
            }
            Err(e) => {
                error!("{}: FAILED ({})", full_name, e);
                ProjectOutcome::Failed(e.to_string())
            }
        }
    }

    async fn dispatch(&self, project: &TrackedProject, started_at: Watermark) -> ProjectOutcome {
        let full_name = project.full_name();

        if let Err(e) = self.trigger.request_build(&project.owner, &project.name).await {
            error!("{}: FAILED (build request: {})", full_name, e);
            return ProjectOutcome::Failed(format!("build request: {}", e));
        }

        if let Err(e) = self
            .directory
            .advance_watermark(&project.owner, &project.name, started_at)
            .await
        {
            // The build went out; the next cycle will see the same changes again
            warn!("{}: cannot advance watermark: {}", full_name, e);
            return ProjectOutcome::Failed(format!("watermark update: {}", e));
        }

        ProjectOutcome::NeedsBuild
    }
}

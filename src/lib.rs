//! snappoll - change-detection poller for snap packages
//!
//! A tracked project needs a rebuild when its own GitHub repository, or any
//! GitHub repository its `snapcraft.yaml` pulls parts from, has new commits
//! since the project was last polled. snappoll walks a directory of tracked
//! projects, asks GitHub with conditional requests, and hands changed
//! projects to a build trigger.
//!
//! # Core Concepts
//!
//! - **Watermark**: the instant a project was last polled ([`Watermark`])
//! - **RepoRef**: one GitHub repository plus the ref being watched ([`RepoRef`])
//! - **ChangeOracle**: answers "did this ref change since the watermark?" ([`ChangeOracle`])
//! - **RepositoryChecker**: primary repository first, then each part source ([`RepositoryChecker`])
//! - **PollCycle**: one non-overlapping pass over the directory ([`PollCycle`])
//!
//! # Example Usage
//!
//! ```no_run
//! use snappoll::{PollerConfig, ProjectChecker, Watermark};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PollerConfig::from_env()?;
//! let checker = config.repository_checker()?;
//!
//! let since = Watermark::from_millis(1501762400000)?;
//! if checker.needs_build("anowner", "aname", Some(&since)).await? {
//!     println!("anowner/aname needs a build");
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod checker;
pub mod cli;
pub mod config;
pub mod directory;
pub mod github;
pub mod manifest;
pub mod oracle;
pub mod poll;
pub mod repo;
pub mod scheduler;
pub mod trigger;
pub mod util;
pub mod watermark;

pub use cache::{CacheError, MemoryCache, ResponseCache};
pub use checker::{ProjectChecker, RepositoryChecker};
pub use config::{ConfigError, PollerConfig};
pub use directory::{
    DirectoryError, Eligibility, FileDirectory, PolledAt, RepositoryDirectory, TrackedProject,
};
pub use github::{GitHubClient, GitHubError};
pub use manifest::{
    resolve_dependencies, CachingManifestFetcher, FetchedManifest, GitHubManifestFetcher, Manifest,
    ManifestError, ManifestFetcher, ManifestResolver,
};
pub use oracle::{BranchNotModifiedPolicy, ChangeOracle, GitHubChangeOracle, OracleError};
pub use poll::{CycleReport, PollCycle, PollError, ProjectOutcome, ProjectReport};
pub use repo::{RefKind, RepoRef, RepoUrlError};
pub use scheduler::{run_scheduler, SchedulerStats};
pub use trigger::{BuildTrigger, CommandBuildTrigger, LoggingBuildTrigger, TriggerError};
pub use util::{init_default, init_from_env, init_logging, LoggingConfig};
pub use watermark::{Watermark, WatermarkError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name() {
        assert_eq!(NAME, "snappoll");
    }
}

//! Configuration management for snappoll
//!
//! Settings are read from environment variables once, at startup, and then
//! passed explicitly into the components that need them. Nothing below the
//! binary reads the environment.
//!
//! # Environment Variables
//!
//! ## GitHub
//! - `GITHUB_API_ENDPOINT`: API base URL - default: "https://api.github.com"
//! - `GITHUB_AUTH_CLIENT_TOKEN`: OAuth token sent with every request - optional
//! - `GITHUB_REPOSITORY_PREFIX`: Hosting root that part sources must start with -
//!   default: "https://github.com/"
//!
//! ## Poller
//! - `SNAPPOLL_REQUEST_TIMEOUT`: Per-request timeout in seconds - default: "30"
//! - `SNAPPOLL_CONCURRENCY`: Projects checked at once within a cycle - default: "4"
//! - `SNAPPOLL_POLL_INTERVAL`: Seconds between cycles - default: "300"
//! - `SNAPPOLL_MANIFEST_CACHE_TTL`: Manifest cache lifetime in seconds, 0 disables,
//!   at most one week - default: "3600"
//! - `SNAPPOLL_BRANCH_NOT_MODIFIED`: How to read a 304 from the branch endpoint
//!   (unchanged|changed) - default: "unchanged"
//! - `SNAPPOLL_LOG_LEVEL`: Logging level - default: "info"
//!
//! # Example
//!
//! ```no_run
//! use snappoll::PollerConfig;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PollerConfig::from_env()?;
//! config.validate()?;
//! let checker = config.repository_checker()?;
//! # Ok(())
//! # }
//! ```

use crate::cache::MemoryCache;
use crate::checker::RepositoryChecker;
use crate::github::{GitHubClient, GitHubError};
use crate::manifest::{CachingManifestFetcher, GitHubManifestFetcher, ManifestFetcher, ManifestResolver};
use crate::oracle::{BranchNotModifiedPolicy, GitHubChangeOracle};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_API_ENDPOINT: &str = "https://api.github.com";
const DEFAULT_REPOSITORY_PREFIX: &str = "https://github.com/";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONCURRENCY: usize = crate::poll::DEFAULT_CONCURRENCY;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
const DEFAULT_MANIFEST_CACHE_TTL_SECS: u64 = 3600;
const MAX_MANIFEST_CACHE_TTL_SECS: u64 = 7 * 24 * 3600;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },

    #[error("Failed to create GitHub client: {0}")]
    ClientInit(#[from] GitHubError),
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// GitHub API base URL
    pub api_endpoint: String,

    /// OAuth token; anonymous requests when absent
    pub token: Option<String>,

    /// Hosting root that part sources are matched against
    pub repository_prefix: String,

    pub request_timeout_secs: u64,

    pub concurrency: usize,

    pub poll_interval_secs: u64,

    /// Zero disables the manifest cache
    pub manifest_cache_ttl_secs: u64,

    pub branch_not_modified: BranchNotModifiedPolicy,

    pub log_level: String,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            token: None,
            repository_prefix: DEFAULT_REPOSITORY_PREFIX.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            concurrency: DEFAULT_CONCURRENCY,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            manifest_cache_ttl_secs: DEFAULT_MANIFEST_CACHE_TTL_SECS,
            branch_not_modified: BranchNotModifiedPolicy::default(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parsed<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env_string(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::ParseError {
            field: key.to_string(),
            error: e.to_string(),
        }),
        None => Ok(default),
    }
}

impl PollerConfig {
    /// Loads configuration from the environment, falling back to defaults for unset variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            api_endpoint: env_string("GITHUB_API_ENDPOINT").unwrap_or(defaults.api_endpoint),
            token: env_string("GITHUB_AUTH_CLIENT_TOKEN"),
            repository_prefix: env_string("GITHUB_REPOSITORY_PREFIX")
                .unwrap_or(defaults.repository_prefix),
            request_timeout_secs: env_parsed("SNAPPOLL_REQUEST_TIMEOUT", defaults.request_timeout_secs)?,
            concurrency: env_parsed("SNAPPOLL_CONCURRENCY", defaults.concurrency)?,
            poll_interval_secs: env_parsed("SNAPPOLL_POLL_INTERVAL", defaults.poll_interval_secs)?,
            manifest_cache_ttl_secs: env_parsed(
                "SNAPPOLL_MANIFEST_CACHE_TTL",
                defaults.manifest_cache_ttl_secs,
            )?,
            branch_not_modified: env_parsed(
                "SNAPPOLL_BRANCH_NOT_MODIFIED",
                defaults.branch_not_modified,
            )?,
            log_level: env_string("SNAPPOLL_LOG_LEVEL")
                .unwrap_or(defaults.log_level)
                .to_lowercase(),
        })
    }

    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` naming the first offending setting
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, url) in [
            ("GITHUB_API_ENDPOINT", &self.api_endpoint),
            ("GITHUB_REPOSITORY_PREFIX", &self.repository_prefix),
        ] {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} must be an http(s) URL, got '{}'",
                    field, url
                )));
            }
        }

        if !self.repository_prefix.ends_with('/') {
            return Err(ConfigError::ValidationFailed(format!(
                "GITHUB_REPOSITORY_PREFIX must end with '/', got '{}'",
                self.repository_prefix
            )));
        }

        if self.request_timeout_secs == 0 || self.request_timeout_secs > 600 {
            return Err(ConfigError::ValidationFailed(
                "Request timeout must be between 1 second and 10 minutes".to_string(),
            ));
        }

        if self.manifest_cache_ttl_secs > MAX_MANIFEST_CACHE_TTL_SECS {
            return Err(ConfigError::ValidationFailed(format!(
                "SNAPPOLL_MANIFEST_CACHE_TTL must be at most {} seconds, got {}",
                MAX_MANIFEST_CACHE_TTL_SECS, self.manifest_cache_ttl_secs
            )));
        }

        if self.concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "Concurrency must be at least 1".to_string(),
            ));
        }

        if self.poll_interval_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Poll interval must be at least 1 second".to_string(),
            ));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn github_client(&self) -> Result<Arc<GitHubClient>, ConfigError> {
        let client = GitHubClient::with_timeout(
            self.api_endpoint.clone(),
            self.token.clone(),
            self.request_timeout(),
        )?;
        Ok(Arc::new(client))
    }

    /// Wires the GitHub-backed change oracle, manifest fetcher (cached unless
    /// the TTL is zero) and resolver into a [`RepositoryChecker`]
    pub fn repository_checker(&self) -> Result<RepositoryChecker, ConfigError> {
        let client = self.github_client()?;

        let oracle = GitHubChangeOracle::new(client.clone()).with_branch_policy(self.branch_not_modified);

        let fetcher: Arc<dyn ManifestFetcher> = Arc::new(GitHubManifestFetcher::new(client));
        let fetcher: Arc<dyn ManifestFetcher> = if self.manifest_cache_ttl_secs > 0 {
            Arc::new(CachingManifestFetcher::new(
                fetcher,
                Arc::new(MemoryCache::new()),
                self.repository_prefix.clone(),
                Duration::from_secs(self.manifest_cache_ttl_secs),
            ))
        } else {
            fetcher
        };

        Ok(RepositoryChecker::new(
            Arc::new(oracle),
            fetcher,
            ManifestResolver::new(self.repository_prefix.clone()),
        ))
    }
}

impl fmt::Display for PollerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Snappoll Configuration:")?;
        writeln!(f, "  API Endpoint: {}", self.api_endpoint)?;
        writeln!(
            f,
            "  Token: {}",
            if self.token.is_some() { "set" } else { "not set" }
        )?;
        writeln!(f, "  Repository Prefix: {}", self.repository_prefix)?;
        writeln!(f, "  Request Timeout: {}s", self.request_timeout_secs)?;
        writeln!(f, "  Concurrency: {}", self.concurrency)?;
        writeln!(f, "  Poll Interval: {}s", self.poll_interval_secs)?;
        writeln!(f, "  Manifest Cache TTL: {}s", self.manifest_cache_ttl_secs)?;
        writeln!(f, "  Branch 304 Policy: {}", self.branch_not_modified)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}

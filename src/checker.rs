//! Per-project change check
//!
//! A tracked project needs a build when its own repository changed, or when
//! any GitHub repository its manifest pulls parts from changed. Checks stop
//! at the first change found so the rate-limited API sees as few calls as
//! possible.

use crate::manifest::{ManifestFetcher, ManifestResolver};
use crate::oracle::{ChangeOracle, OracleError};
use crate::repo::RepoRef;
use crate::watermark::Watermark;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Decides whether a tracked project needs a build
#[async_trait]
pub trait ProjectChecker: Send + Sync {
    async fn needs_build(
        &self,
        owner: &str,
        name: &str,
        watermark: Option<&Watermark>,
    ) -> Result<bool, OracleError>;
}

/// [`ProjectChecker`] over a project's repository and its manifest's parts
pub struct RepositoryChecker {
    oracle: Arc<dyn ChangeOracle>,
    fetcher: Arc<dyn ManifestFetcher>,
    resolver: ManifestResolver,
}

impl RepositoryChecker {
    pub fn new(
        oracle: Arc<dyn ChangeOracle>,
        fetcher: Arc<dyn ManifestFetcher>,
        resolver: ManifestResolver,
    ) -> Self {
        Self {
            oracle,
            fetcher,
            resolver,
        }
    }

    async fn dependencies_changed(
        &self,
        owner: &str,
        name: &str,
        watermark: Option<&Watermark>,
    ) -> Result<bool, OracleError> {
        let fetched = match self.fetcher.fetch(owner, name).await {
            Ok(fetched) => fetched,
            Err(e) => {
                debug!("{}/{}: no readable manifest ({}), nothing else to check", owner, name, e);
                return Ok(false);
            }
        };

        let dependencies = self.resolver.resolve(&fetched.manifest);
        debug!(
            snap = fetched.manifest.name().unwrap_or("unnamed"),
            "{}/{}: {} pollable parts in {}",
            owner,
            name,
            dependencies.len(),
            fetched.path
        );

        for dependency in &dependencies {
            debug!(branch = dependency.kind().branch(), "{}/{}: checking {}", owner, name, dependency);
            match self.oracle.changed_since(dependency, watermark).await {
                Ok(true) => {
                    info!("{}/{}: {} changed.", owner, name, dependency);
                    return Ok(true);
                }
                Ok(false) => {}
                Err(e) if e.is_systemic() => return Err(e),
                Err(e) => {
                    warn!("{}/{}: cannot check part {}: {}", owner, name, dependency, e);
                }
            }
        }

        Ok(false)
    }
}

#[async_trait]
impl ProjectChecker for RepositoryChecker {
    async fn needs_build(
        &self,
        owner: &str,
        name: &str,
        watermark: Option<&Watermark>,
    ) -> Result<bool, OracleError> {
        let primary = RepoRef::primary(owner, name, self.resolver.prefix());

        if self.oracle.changed_since(&primary, watermark).await? {
            // The manifest itself may have changed with the repository
            self.fetcher.invalidate(owner, name).await;
            return Ok(true);
        }
        info!("{}/{}: unchanged, checking parts ...", owner, name);

        self.dependencies_changed(owner, name, watermark).await
    }
}

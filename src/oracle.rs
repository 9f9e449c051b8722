//! Change detection against the GitHub API
//!
//! Answers "has this repository moved since the watermark?" for a single
//! [`RepoRef`]. The default branch is checked through the commit listing with
//! `since` plus `If-Modified-Since`; a named branch is checked by comparing
//! its tip's committer date to the watermark. Tags are not checkable.

use crate::github::{ApiRequest, ApiResponse, GitHubClient, GitHubError};
use crate::repo::{RefKind, RepoRef};
use crate::watermark::{Watermark, WatermarkError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    /// Missing or unusable watermark; a caller bug, never retried
    #[error("invalid watermark: {0}")]
    InvalidWatermark(String),

    /// Unexpected response, timeout or transport failure
    #[error(
        "{repo} ({}): {message}",
        .status.map(|s| s.to_string()).unwrap_or_else(|| "no response".to_string())
    )]
    Upstream {
        repo: String,
        status: Option<u16>,
        message: String,
    },

    /// GitHub rejected the configured credentials
    #[error("{repo}: authentication failed: {message}")]
    Auth { repo: String, message: String },

    #[error("{repo}: cannot poll {kind}")]
    UnsupportedRefKind { repo: String, kind: String },
}

impl OracleError {
    pub fn status(&self) -> Option<u16> {
        match self {
            OracleError::Upstream { status, .. } => *status,
            _ => None,
        }
    }

    /// Auth failures usually mean every project will fail the same way
    pub fn is_systemic(&self) -> bool {
        matches!(self, OracleError::Auth { .. })
    }
}

impl From<WatermarkError> for OracleError {
    fn from(e: WatermarkError) -> Self {
        OracleError::InvalidWatermark(e.0)
    }
}

/// How to read a 304 from the branch endpoint, which does not reliably honor
/// `If-Modified-Since`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BranchNotModifiedPolicy {
    #[default]
    TrustUnchanged,
    AssumeChanged,
}

impl FromStr for BranchNotModifiedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unchanged" | "trust" => Ok(BranchNotModifiedPolicy::TrustUnchanged),
            "changed" | "assume-changed" => Ok(BranchNotModifiedPolicy::AssumeChanged),
            other => Err(format!(
                "invalid branch 304 policy '{}'. Valid options: unchanged, changed",
                other
            )),
        }
    }
}

impl fmt::Display for BranchNotModifiedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchNotModifiedPolicy::TrustUnchanged => write!(f, "unchanged"),
            BranchNotModifiedPolicy::AssumeChanged => write!(f, "changed"),
        }
    }
}

#[async_trait]
pub trait ChangeOracle: Send + Sync {
    /// Whether `repo` has changed since `watermark`.
    ///
    /// Fails with [`OracleError::InvalidWatermark`] when no watermark is given,
    /// before any request is made.
    async fn changed_since(
        &self,
        repo: &RepoRef,
        watermark: Option<&Watermark>,
    ) -> Result<bool, OracleError>;
}

#[derive(Debug, Deserialize)]
struct BranchDetail {
    commit: BranchCommit,
}

#[derive(Debug, Deserialize)]
struct BranchCommit {
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    committer: Option<Signature>,
}

#[derive(Debug, Deserialize)]
struct Signature {
    date: Option<DateTime<Utc>>,
}

/// [`ChangeOracle`] backed by the GitHub REST API
pub struct GitHubChangeOracle {
    client: Arc<GitHubClient>,
    branch_not_modified: BranchNotModifiedPolicy,
}

impl GitHubChangeOracle {
    pub fn new(client: Arc<GitHubClient>) -> Self {
        Self {
            client,
            branch_not_modified: BranchNotModifiedPolicy::default(),
        }
    }

    pub fn with_branch_policy(mut self, policy: BranchNotModifiedPolicy) -> Self {
        self.branch_not_modified = policy;
        self
    }

    async fn default_branch_changed(
        &self,
        repo: &RepoRef,
        watermark: &Watermark,
    ) -> Result<bool, OracleError> {
        let request = ApiRequest::get(["repos", repo.owner(), repo.name(), "commits"])
            .query("since", watermark.to_iso8601())
            .if_modified_since(watermark.to_http_date());
        let response = self.send(repo, request).await?;

        match response.status {
            StatusCode::OK => {
                let commits: Vec<serde_json::Value> =
                    response.json().map_err(|e| OracleError::Upstream {
                        repo: repo.url().to_string(),
                        status: Some(response.status.as_u16()),
                        message: format!("unexpected commit listing: {}", e),
                    })?;
                trace!("{}: {} commits since {}", repo, commits.len(), watermark);
                Ok(!commits.is_empty())
            }
            StatusCode::NOT_MODIFIED => {
                debug!("{}: not modified since {}", repo, watermark);
                Ok(false)
            }
            _ => Err(unexpected(repo, &response)),
        }
    }

    async fn named_branch_changed(
        &self,
        repo: &RepoRef,
        branch: &str,
        watermark: &Watermark,
    ) -> Result<bool, OracleError> {
        let request = ApiRequest::get(["repos", repo.owner(), repo.name(), "branches", branch])
            .if_modified_since(watermark.to_http_date());
        let response = self.send(repo, request).await?;

        match response.status {
            StatusCode::OK => {
                let tip = response
                    .json::<BranchDetail>()
                    .ok()
                    .and_then(|detail| detail.commit.commit.committer)
                    .and_then(|committer| committer.date)
                    .ok_or_else(|| OracleError::Upstream {
                        repo: repo.url().to_string(),
                        status: Some(response.status.as_u16()),
                        message: format!("branch {} has no committer date", branch),
                    })?;
                trace!("{}: tip committed at {}", repo, tip);
                Ok(tip > watermark.as_datetime())
            }
            StatusCode::NOT_MODIFIED => {
                debug!(
                    "{}: branch reported not modified, policy {}",
                    repo, self.branch_not_modified
                );
                Ok(self.branch_not_modified == BranchNotModifiedPolicy::AssumeChanged)
            }
            _ => Err(unexpected(repo, &response)),
        }
    }

    async fn send(&self, repo: &RepoRef, request: ApiRequest) -> Result<ApiResponse, OracleError> {
        self.client
            .send(request)
            .await
            .map_err(|e: GitHubError| OracleError::Upstream {
                repo: repo.url().to_string(),
                status: None,
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl ChangeOracle for GitHubChangeOracle {
    async fn changed_since(
        &self,
        repo: &RepoRef,
        watermark: Option<&Watermark>,
    ) -> Result<bool, OracleError> {
        let watermark = watermark
            .ok_or_else(|| OracleError::InvalidWatermark("`last_polled_at` must be given".to_string()))?;

        match repo.kind() {
            RefKind::DefaultBranch => self.default_branch_changed(repo, watermark).await,
            RefKind::NamedBranch(branch) => self.named_branch_changed(repo, branch, watermark).await,
            RefKind::Tag(_) => Err(OracleError::UnsupportedRefKind {
                repo: repo.url().to_string(),
                kind: repo.kind().to_string(),
            }),
        }
    }
}

fn unexpected(repo: &RepoRef, response: &ApiResponse) -> OracleError {
    let message = response.error_message();
    if response.is_auth_failure() {
        OracleError::Auth {
            repo: repo.url().to_string(),
            message,
        }
    } else {
        OracleError::Upstream {
            repo: repo.url().to_string(),
            status: Some(response.status.as_u16()),
            message,
        }
    }
}

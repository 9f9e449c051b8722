//! Build triggers
//!
//! The poller does not build anything itself. When a project needs a build it
//! hands `owner/name` to a [`BuildTrigger`].

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("failed to start build command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("build command exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },
}

#[async_trait]
pub trait BuildTrigger: Send + Sync {
    async fn request_build(&self, owner: &str, name: &str) -> Result<(), TriggerError>;
}

/// Logs build requests without acting on them (dry run)
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingBuildTrigger;

#[async_trait]
impl BuildTrigger for LoggingBuildTrigger {
    async fn request_build(&self, owner: &str, name: &str) -> Result<(), TriggerError> {
        info!(owner, name, "Build requested (dry run)");
        Ok(())
    }
}

/// Runs a shell command per build request.
///
/// The command sees `SNAPPOLL_OWNER`, `SNAPPOLL_NAME` and
/// `SNAPPOLL_REPOSITORY` (`owner/name`) in its environment.
#[derive(Debug, Clone)]
pub struct CommandBuildTrigger {
    command: String,
}

impl CommandBuildTrigger {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl BuildTrigger for CommandBuildTrigger {
    async fn request_build(&self, owner: &str, name: &str) -> Result<(), TriggerError> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("SNAPPOLL_OWNER", owner)
            .env("SNAPPOLL_NAME", name)
            .env("SNAPPOLL_REPOSITORY", format!("{}/{}", owner, name))
            .kill_on_drop(true)
            .output()
            .await?;

        if output.status.success() {
            info!("{}/{}: build command succeeded", owner, name);
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!("{}/{}: build command failed: {}", owner, name, stderr);
            Err(TriggerError::CommandFailed {
                status: output.status.to_string(),
                stderr,
            })
        }
    }
}

//! Tracked repository directory
//!
//! The registry of tracked projects lives outside the poller. The poller only
//! needs to enumerate it once per cycle, ask whether an entry is eligible, and
//! tell it when a project's watermark should move forward.
//!
//! [`FileDirectory`] is a YAML-file implementation used by the `snappoll` binary:
//!
//! ```yaml
//! repositories:
//!   - owner: anowner
//!     name: aname
//!     last_polled_at: 1501762400000
//!     snapcraft_name: my-snap
//!     store_name: my-snap
//! ```

use crate::watermark::{Watermark, WatermarkError};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("cannot access repository directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("repository directory {path} is malformed: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("{owner}/{name} is not in the repository directory")]
    UnknownProject { owner: String, name: String },
}

/// A project the poller watches
///
/// Keys the poller does not know about are kept in `extra` so rewriting the
/// file leaves them in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedProject {
    pub owner: String,
    pub name: String,
    #[serde(
        default,
        deserialize_with = "optional_polled_at",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_polled_at: Option<PolledAt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapcraft_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_name: Option<String>,
    #[serde(flatten, default)]
    pub extra: serde_yaml::Mapping,
}

/// `last_polled_at` as the directory holds it
///
/// A value that is not a timestamp is kept verbatim: only that project fails,
/// and the value is written back untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolledAt {
    Valid(Watermark),
    Invalid { raw: String, error: WatermarkError },
}

impl From<Watermark> for PolledAt {
    fn from(watermark: Watermark) -> Self {
        PolledAt::Valid(watermark)
    }
}

impl Serialize for PolledAt {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PolledAt::Valid(watermark) => watermark.serialize(serializer),
            PolledAt::Invalid { raw, .. } => serializer.serialize_str(raw),
        }
    }
}

/// Whether a project takes part in polling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    /// No snapcraft.yaml name recorded yet
    Unconfigured,
    /// The store name is registered to a different snap
    NameConflict { store_name: String },
}

impl TrackedProject {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            last_polled_at: None,
            snapcraft_name: None,
            store_name: None,
            extra: serde_yaml::Mapping::new(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// The stored watermark, `None` when never polled
    pub fn watermark(&self) -> Result<Option<Watermark>, WatermarkError> {
        match &self.last_polled_at {
            None => Ok(None),
            Some(PolledAt::Valid(watermark)) => Ok(Some(*watermark)),
            Some(PolledAt::Invalid { error, .. }) => Err(error.clone()),
        }
    }

    pub fn eligibility(&self) -> Eligibility {
        match (&self.snapcraft_name, &self.store_name) {
            (None, _) => Eligibility::Unconfigured,
            (Some(snap), Some(store)) if snap != store => Eligibility::NameConflict {
                store_name: store.clone(),
            },
            _ => Eligibility::Eligible,
        }
    }
}

/// Empty strings read as "never polled"; anything else that is not a
/// timestamp becomes [`PolledAt::Invalid`] instead of failing the directory.
fn optional_polled_at<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<PolledAt>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(String),
        Other(serde_yaml::Value),
    }

    let raw = match Option::<Raw>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(Raw::Text(text)) if text.trim().is_empty() => return Ok(None),
        Some(Raw::Millis(millis)) => {
            return Ok(Some(match Watermark::from_millis(millis) {
                Ok(watermark) => PolledAt::Valid(watermark),
                Err(error) => PolledAt::Invalid {
                    raw: millis.to_string(),
                    error,
                },
            }))
        }
        Some(Raw::Text(text)) => text,
        Some(Raw::Other(value)) => serde_yaml::to_string(&value)
            .map_err(serde::de::Error::custom)?
            .trim_end()
            .to_string(),
    };

    Ok(Some(match Watermark::parse(&raw) {
        Ok(watermark) => PolledAt::Valid(watermark),
        Err(error) => PolledAt::Invalid { raw, error },
    }))
}

#[async_trait]
pub trait RepositoryDirectory: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<TrackedProject>, DirectoryError>;

    /// Records that `owner/name` was handed to the build system at `at`
    async fn advance_watermark(&self, owner: &str, name: &str, at: Watermark) -> Result<(), DirectoryError>;

    fn eligibility(&self, project: &TrackedProject) -> Eligibility {
        project.eligibility()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    repositories: Vec<TrackedProject>,
}

/// YAML file-backed directory
#[derive(Debug)]
pub struct FileDirectory {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<DirectoryFile, DirectoryError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| DirectoryError::Io {
                path: self.path.clone(),
                source,
            })?;
        if text.trim().is_empty() {
            return Ok(DirectoryFile::default());
        }
        serde_yaml::from_str(&text).map_err(|e| DirectoryError::Malformed {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    async fn store(&self, file: &DirectoryFile) -> Result<(), DirectoryError> {
        let text = serde_yaml::to_string(file).map_err(|e| DirectoryError::Malformed {
            path: self.path.clone(),
            message: e.to_string(),
        })?;

        let tmp = self.path.with_extension("yaml.tmp");
        let io_error = |source| DirectoryError::Io {
            path: self.path.clone(),
            source,
        };
        tokio::fs::write(&tmp, text).await.map_err(io_error)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_error)
    }
}

#[async_trait]
impl RepositoryDirectory for FileDirectory {
    async fn fetch_all(&self) -> Result<Vec<TrackedProject>, DirectoryError> {
        let file = self.load().await?;
        debug!("Loaded {} repositories from {}", file.repositories.len(), self.path.display());
        Ok(file.repositories)
    }

    async fn advance_watermark(&self, owner: &str, name: &str, at: Watermark) -> Result<(), DirectoryError> {
        let _guard = self.write_lock.lock().await;

        let mut file = self.load().await?;
        let project = file
            .repositories
            .iter_mut()
            .find(|p| p.owner == owner && p.name == name)
            .ok_or_else(|| DirectoryError::UnknownProject {
                owner: owner.to_string(),
                name: name.to_string(),
            })?;
        project.last_polled_at = Some(at.into());

        self.store(&file).await
    }
}

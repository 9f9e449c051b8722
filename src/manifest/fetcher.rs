//! Manifest retrieval
//!
//! [`GitHubManifestFetcher`] reads `snapcraft.yaml` through the contents API,
//! trying the locations snapcraft itself looks at. [`CachingManifestFetcher`]
//! wraps any fetcher with the injected response cache, keyed by repository URL.

use super::Manifest;
use crate::cache::ResponseCache;
use crate::github::{ApiRequest, GitHubClient, GitHubError, RAW_MEDIA_TYPE};
use crate::repo::repo_url;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Manifest locations, in lookup order
pub const MANIFEST_PATHS: &[&str] = &["snap/snapcraft.yaml", "snapcraft.yaml", ".snapcraft.yaml"];

/// Default lifetime of a cached manifest
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("no snapcraft.yaml found in {owner}/{name}")]
    NotFound { owner: String, name: String },

    #[error("{path} in {owner}/{name} is not valid YAML: {message}")]
    Parse {
        owner: String,
        name: String,
        path: String,
        message: String,
    },

    #[error("GitHub authentication failed: {0}")]
    Auth(String),

    #[error("GitHub API error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error(transparent)]
    Transport(#[from] GitHubError),
}

/// A manifest together with the raw text and the path it was read from
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedManifest {
    pub path: String,
    pub contents: String,
    pub manifest: Manifest,
}

impl FetchedManifest {
    pub fn parse(
        owner: &str,
        name: &str,
        path: impl Into<String>,
        contents: impl Into<String>,
    ) -> Result<Self, ManifestError> {
        let path = path.into();
        let contents = contents.into();
        let manifest = Manifest::from_yaml(&contents).map_err(|e| ManifestError::Parse {
            owner: owner.to_string(),
            name: name.to_string(),
            path: path.clone(),
            message: e.to_string(),
        })?;
        Ok(Self {
            path,
            contents,
            manifest,
        })
    }
}

#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    async fn fetch(&self, owner: &str, name: &str) -> Result<FetchedManifest, ManifestError>;

    /// Drops any cached copy for `owner/name`. No-op for uncached fetchers.
    async fn invalidate(&self, _owner: &str, _name: &str) {}
}

/// Reads manifests with the GitHub contents API
pub struct GitHubManifestFetcher {
    client: Arc<GitHubClient>,
}

impl GitHubManifestFetcher {
    pub fn new(client: Arc<GitHubClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ManifestFetcher for GitHubManifestFetcher {
    async fn fetch(&self, owner: &str, name: &str) -> Result<FetchedManifest, ManifestError> {
        for path in MANIFEST_PATHS {
            let segments = ["repos", owner, name, "contents"].into_iter().chain(path.split('/'));
            let request = ApiRequest::get(segments).accept(RAW_MEDIA_TYPE);
            let response = self.client.send(request).await?;

            match response.status {
                StatusCode::OK => {
                    debug!("{}/{}: using {}", owner, name, path);
                    return FetchedManifest::parse(owner, name, *path, response.body);
                }
                StatusCode::NOT_FOUND => continue,
                _ if response.is_auth_failure() => {
                    return Err(ManifestError::Auth(response.error_message()));
                }
                status => {
                    let message = response.error_message();
                    // An empty repository answers with this instead of a 404
                    if message == "This repository is empty." {
                        break;
                    }
                    return Err(ManifestError::Upstream {
                        status: status.as_u16(),
                        message,
                    });
                }
            }
        }

        Err(ManifestError::NotFound {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

#[derive(Serialize, Deserialize)]
struct CachedManifest {
    path: String,
    contents: String,
}

/// Serves manifests from a [`ResponseCache`] before asking the inner fetcher
pub struct CachingManifestFetcher {
    inner: Arc<dyn ManifestFetcher>,
    cache: Arc<dyn ResponseCache>,
    prefix: String,
    ttl: Duration,
}

impl CachingManifestFetcher {
    pub fn new(
        inner: Arc<dyn ManifestFetcher>,
        cache: Arc<dyn ResponseCache>,
        prefix: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            inner,
            cache,
            prefix: prefix.into(),
            ttl,
        }
    }

    pub fn cache_key(&self, owner: &str, name: &str) -> String {
        format!("snapcraft_data:{}", repo_url(owner, name, &self.prefix))
    }
}

#[async_trait]
impl ManifestFetcher for CachingManifestFetcher {
    async fn fetch(&self, owner: &str, name: &str) -> Result<FetchedManifest, ManifestError> {
        let key = self.cache_key(owner, name);

        match self.cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<CachedManifest>(&raw) {
                Ok(cached) => {
                    debug!("{}/{}: manifest cache hit", owner, name);
                    return FetchedManifest::parse(owner, name, cached.path, cached.contents);
                }
                Err(e) => warn!("Discarding corrupt cache entry {}: {}", key, e),
            },
            Ok(None) => {}
            Err(e) => warn!("Error getting {} from cache: {}", key, e),
        }

        let fetched = self.inner.fetch(owner, name).await?;

        let entry = CachedManifest {
            path: fetched.path.clone(),
            contents: fetched.contents.clone(),
        };
        match serde_json::to_string(&entry) {
            Ok(raw) => {
                if let Err(e) = self.cache.set(&key, raw, self.ttl).await {
                    warn!("Error storing {} in cache: {}", key, e);
                }
            }
            Err(e) => warn!("Cannot serialize manifest for {}: {}", key, e),
        }

        Ok(fetched)
    }

    async fn invalidate(&self, owner: &str, name: &str) {
        let key = self.cache_key(owner, name);
        if let Err(e) = self.cache.delete(&key).await {
            warn!("Error deleting {} from cache: {}", key, e);
        }
        self.inner.invalidate(owner, name).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const YAML: &str = "parts:\n  foo:\n    source-type: git\n    source: https://github.com/some/part.git\n";

    fn github(server: &mockito::Server) -> Arc<GitHubClient> {
        Arc::new(GitHubClient::new(server.url(), None).unwrap())
    }

    #[tokio::test]
    async fn test_fetch_snap_directory_first() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/repos/anowner/aname/contents/snap/snapcraft.yaml")
            .match_header("accept", RAW_MEDIA_TYPE)
            .with_status(200)
            .with_body(YAML)
            .create_async()
            .await;

        let fetcher = GitHubManifestFetcher::new(github(&server));
        let fetched = fetcher.fetch("anowner", "aname").await.unwrap();

        assert_eq!(fetched.path, "snap/snapcraft.yaml");
        assert_eq!(fetched.manifest.parts().len(), 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_falls_back_to_root() {
        let mut server = mockito::Server::new_async().await;
        let missing = server
            .mock("GET", "/repos/anowner/aname/contents/snap/snapcraft.yaml")
            .with_status(404)
            .with_body(r#"{"message": "Not Found"}"#)
            .create_async()
            .await;
        let found = server
            .mock("GET", "/repos/anowner/aname/contents/snapcraft.yaml")
            .with_status(200)
            .with_body(YAML)
            .create_async()
            .await;

        let fetcher = GitHubManifestFetcher::new(github(&server));
        let fetched = fetcher.fetch("anowner", "aname").await.unwrap();

        assert_eq!(fetched.path, "snapcraft.yaml");
        missing.assert_async().await;
        found.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_not_found_anywhere() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", mockito::Matcher::Regex(r"^/repos/anowner/aname/contents/".into()))
            .with_status(404)
            .with_body("{}")
            .expect(MANIFEST_PATHS.len())
            .create_async()
            .await;

        let fetcher = GitHubManifestFetcher::new(github(&server));
        let err = fetcher.fetch("anowner", "aname").await.unwrap_err();

        assert!(matches!(err, ManifestError::NotFound { .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_parse_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/anowner/aname/contents/snap/snapcraft.yaml")
            .with_status(200)
            .with_body("parts: [unclosed")
            .create_async()
            .await;

        let fetcher = GitHubManifestFetcher::new(github(&server));
        let err = fetcher.fetch("anowner", "aname").await.unwrap_err();
        assert!(matches!(err, ManifestError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_fetch_bad_credentials() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/anowner/aname/contents/snap/snapcraft.yaml")
            .with_status(401)
            .with_body(r#"{"message": "Bad credentials"}"#)
            .create_async()
            .await;

        let fetcher = GitHubManifestFetcher::new(github(&server));
        let err = fetcher.fetch("anowner", "aname").await.unwrap_err();
        assert!(matches!(err, ManifestError::Auth(ref m) if m == "Bad credentials"));
    }

    struct CountingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ManifestFetcher for CountingFetcher {
        async fn fetch(&self, owner: &str, name: &str) -> Result<FetchedManifest, ManifestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            FetchedManifest::parse(owner, name, "snapcraft.yaml", YAML)
        }
    }

    #[tokio::test]
    async fn test_cache_hit_skips_inner_fetch() {
        let inner = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(MemoryCache::new());
        let fetcher = CachingManifestFetcher::new(
            inner.clone(),
            cache.clone(),
            "https://github.com/",
            DEFAULT_CACHE_TTL,
        );

        let first = fetcher.fetch("anowner", "aname").await.unwrap();
        let second = fetcher.fetch("anowner", "aname").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert!(cache
            .get("snapcraft_data:https://github.com/anowner/aname")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let inner = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
        });
        let fetcher = CachingManifestFetcher::new(
            inner.clone(),
            Arc::new(MemoryCache::new()),
            "https://github.com/",
            DEFAULT_CACHE_TTL,
        );

        fetcher.fetch("anowner", "aname").await.unwrap();
        fetcher.invalidate("anowner", "aname").await;
        fetcher.fetch("anowner", "aname").await.unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}

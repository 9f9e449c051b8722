//! Repository references
//!
//! A [`RepoRef`] names a GitHub repository together with the git reference the
//! poller should watch on it. References are built either for a tracked
//! project's own repository or from the `source` of a manifest part.

use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// Branch assumed when a manifest part does not name one
pub const PRIMARY_BRANCH: &str = "master";

/// Errors produced when a repository URL cannot be turned into an owner/name pair
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepoUrlError {
    #[error("repository URL is empty")]
    Empty,

    #[error("{url} does not start with the hosting prefix {prefix}")]
    ForeignHost { url: String, prefix: String },

    #[error("{0} is not of the form <prefix><owner>/<name>[.git]")]
    Malformed(String),
}

/// The git reference tracked on a repository
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// The repository's primary branch
    DefaultBranch,
    /// A branch named by `source-branch`
    NamedBranch(String),
    /// A tag named by `source-tag`; never checkable
    Tag(String),
}

impl RefKind {
    /// Builds the kind from a manifest part's `source-branch`/`source-tag` pair.
    ///
    /// A tag wins over a branch: a tagged part is pinned regardless of the branch.
    /// Naming [`PRIMARY_BRANCH`] is the same as naming no branch.
    pub fn from_part(branch: Option<&str>, tag: Option<&str>) -> Self {
        match (branch, tag) {
            (_, Some(tag)) => RefKind::Tag(tag.to_string()),
            (Some(branch), None) if !branch.is_empty() && branch != PRIMARY_BRANCH => {
                RefKind::NamedBranch(branch.to_string())
            }
            _ => RefKind::DefaultBranch,
        }
    }

    /// Branch name to report in logs
    pub fn branch(&self) -> Option<&str> {
        match self {
            RefKind::DefaultBranch => Some(PRIMARY_BRANCH),
            RefKind::NamedBranch(name) => Some(name),
            RefKind::Tag(_) => None,
        }
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefKind::DefaultBranch => write!(f, "default branch"),
            RefKind::NamedBranch(name) => write!(f, "branch {}", name),
            RefKind::Tag(name) => write!(f, "tag {}", name),
        }
    }
}

/// An immutable reference to a GitHub repository and the ref watched on it
#[derive(Debug, Clone)]
pub struct RepoRef {
    url: String,
    owner: String,
    name: String,
    kind: RefKind,
}

impl RepoRef {
    /// Parses `url` against the hosting `prefix` (e.g. `https://github.com/`).
    ///
    /// Accepts an optional `.git` suffix and a trailing slash; anything other
    /// than exactly `<owner>/<name>` after the prefix is rejected.
    pub fn parse(url: &str, prefix: &str, kind: RefKind) -> Result<Self, RepoUrlError> {
        let (owner, name) = parse_repo_url(url, prefix)?;
        Ok(Self {
            url: url.to_string(),
            owner,
            name,
            kind,
        })
    }

    /// Reference to a tracked project's own repository on its primary branch
    pub fn primary(owner: &str, name: &str, prefix: &str) -> Self {
        Self {
            url: repo_url(owner, name, prefix),
            owner: owner.to_string(),
            name: name.to_string(),
            kind: RefKind::DefaultBranch,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &RefKind {
        &self.kind
    }

    /// `owner/name`, used as the log key
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Two references are the same when they name the same repository and ref,
/// however the URL was spelled (`.git` suffix, trailing slash).
impl PartialEq for RepoRef {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner && self.name == other.name && self.kind == other.kind
    }
}

impl Eq for RepoRef {}

impl Hash for RepoRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.owner.hash(state);
        self.name.hash(state);
        self.kind.hash(state);
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RefKind::DefaultBranch => write!(f, "{}", self.url),
            kind => write!(f, "{} ({})", self.url, kind),
        }
    }
}

/// Builds the canonical repository URL for `owner/name`
pub fn repo_url(owner: &str, name: &str, prefix: &str) -> String {
    format!("{}{}/{}", prefix, owner, name)
}

/// Splits a repository URL into its owner and name
pub fn parse_repo_url(url: &str, prefix: &str) -> Result<(String, String), RepoUrlError> {
    if url.trim().is_empty() {
        return Err(RepoUrlError::Empty);
    }

    let path = url
        .strip_prefix(prefix)
        .ok_or_else(|| RepoUrlError::ForeignHost {
            url: url.to_string(),
            prefix: prefix.to_string(),
        })?;

    let path = path.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);

    let mut segments = path.split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => {
            Ok((owner.to_string(), name.to_string()))
        }
        _ => Err(RepoUrlError::Malformed(url.to_string())),
    }
}

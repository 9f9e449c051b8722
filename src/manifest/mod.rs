//! Snap build manifests
//!
//! Parses the subset of `snapcraft.yaml` the poller cares about (the `parts`
//! mapping and each part's `source`, `source-branch` and `source-tag`) and
//! resolves it into the set of GitHub repositories worth polling.

pub mod fetcher;

pub use fetcher::{
    CachingManifestFetcher, FetchedManifest, GitHubManifestFetcher, ManifestError, ManifestFetcher,
    MANIFEST_PATHS,
};

use crate::repo::{RefKind, RepoRef};
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use tracing::{debug, warn};

/// One entry of the manifest's `parts` mapping
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Part {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "optional_scalar")]
    pub source_branch: Option<String>,
    #[serde(default, deserialize_with = "optional_scalar")]
    pub source_tag: Option<String>,
}

/// Branch and tag names like `2.0` arrive as YAML numbers; keep them as text
fn optional_scalar<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Option::<serde_yaml::Value>::deserialize(deserializer)? {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(serde_yaml::Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a branch or tag name, got {:?}",
            other
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    parts: Option<serde_yaml::Mapping>,
}

/// Parsed build manifest; parts keep document order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    name: Option<String>,
    parts: Vec<(String, Part)>,
}

impl Manifest {
    pub fn new(name: Option<String>, parts: Vec<(String, Part)>) -> Self {
        Self { name, parts }
    }

    /// Parses manifest text. Parts whose definition is not a mapping are kept
    /// as empty parts so they are skipped downstream rather than failing the parse.
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }

        let raw: RawManifest = serde_yaml::from_str(text)?;
        let parts = raw
            .parts
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| {
                let name = match key.as_str() {
                    Some(s) => s.to_string(),
                    None => serde_yaml::to_string(&key)
                        .map(|s| s.trim().to_string())
                        .unwrap_or_default(),
                };
                let part = serde_yaml::from_value::<Part>(value).unwrap_or_else(|e| {
                    warn!(part = %name, error = %e, "Ignoring unreadable part definition");
                    Part::default()
                });
                (name, part)
            })
            .collect();

        Ok(Self {
            name: raw.name,
            parts,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn parts(&self) -> &[(String, Part)] {
        &self.parts
    }
}

/// Extracts the pollable dependency repositories from a manifest
#[derive(Debug, Clone)]
pub struct ManifestResolver {
    prefix: String,
}

impl ManifestResolver {
    /// `prefix` is the hosting root, e.g. `https://github.com/`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn resolve(&self, manifest: &Manifest) -> Vec<RepoRef> {
        resolve_dependencies(manifest, &self.prefix)
    }
}

/// Unique dependency references in first-seen order.
///
/// Parts without a source, with a source outside `prefix`, or pinned to a
/// tag contribute nothing.
pub fn resolve_dependencies(manifest: &Manifest, prefix: &str) -> Vec<RepoRef> {
    let mut seen = HashSet::new();
    let mut refs = Vec::new();

    for (part_name, part) in manifest.parts() {
        let Some(source) = part.source.as_deref() else {
            debug!(part = %part_name, "Part has no source, skipping");
            continue;
        };

        if !source.starts_with(prefix) {
            debug!(part = %part_name, source, "Source is not hosted on {}, skipping", prefix);
            continue;
        }

        let kind = RefKind::from_part(part.source_branch.as_deref(), part.source_tag.as_deref());
        if let RefKind::Tag(tag) = &kind {
            // TODO: poll tag-pinned parts once tags can be compared against a watermark
            debug!(part = %part_name, source, tag = %tag, "Tag-pinned part, skipping");
            continue;
        }

        match RepoRef::parse(source, prefix, kind) {
            Ok(repo) => {
                if seen.insert(repo.clone()) {
                    refs.push(repo);
                }
            }
            Err(e) => warn!(part = %part_name, error = %e, "Cannot poll part source"),
        }
    }

    refs
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "https://github.com/";

    fn resolve(yaml: &str) -> Vec<String> {
        let manifest = Manifest::from_yaml(yaml).unwrap();
        ManifestResolver::new(PREFIX)
            .resolve(&manifest)
            .into_iter()
            .map(|r| r.url().to_string())
            .collect()
    }

    #[test]
    fn test_missing_parts() {
        assert!(resolve("name: foo\n").is_empty());
        assert!(resolve("").is_empty());
        assert!(resolve("parts:\n").is_empty());
    }

    #[test]
    fn test_missing_source_type() {
        let yaml = "parts:\n  simple:\n    source: https://github.com/foo/bar.git\n";
        assert_eq!(resolve(yaml), vec!["https://github.com/foo/bar.git"]);
    }

    #[test]
    fn test_only_github_sources() {
        let yaml = r#"
parts:
  gh:
    source: https://github.com/foo/bar.git
  non-gh:
    source: https://code.launchpad.net/foo/bar.git
  non-git:
    source: https://code.launchpad.net/foo/bar
  local:
    source: .
  gh-2:
    source: https://github.com/foo/zoing.git
"#;
        assert_eq!(
            resolve(yaml),
            vec!["https://github.com/foo/bar.git", "https://github.com/foo/zoing.git"]
        );
    }

    #[test]
    fn test_unique_repos() {
        let yaml = r#"
parts:
  gh:
    source: https://github.com/foo/bar.git
  gh-2:
    source: https://github.com/foo/bar.git
"#;
        assert_eq!(resolve(yaml), vec!["https://github.com/foo/bar.git"]);
    }

    #[test]
    fn test_unique_repos_across_url_spellings() {
        let yaml = r#"
parts:
  gh:
    source: https://github.com/foo/bar
  gh-git:
    source: https://github.com/foo/bar.git
"#;
        let manifest = Manifest::from_yaml(yaml).unwrap();
        let refs = resolve_dependencies(&manifest, PREFIX);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].url(), "https://github.com/foo/bar");
    }

    #[test]
    fn test_same_source_different_branches_are_distinct() {
        let yaml = r#"
parts:
  a:
    source: https://github.com/foo/bar.git
  b:
    source: https://github.com/foo/bar.git
    source-branch: devel
  c:
    source: https://github.com/foo/bar.git
    source-branch: devel
"#;
        let manifest = Manifest::from_yaml(yaml).unwrap();
        let refs = ManifestResolver::new(PREFIX).resolve(&manifest);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].kind(), &RefKind::DefaultBranch);
        assert_eq!(refs[1].kind(), &RefKind::NamedBranch("devel".to_string()));
    }

    #[test]
    fn test_primary_branch_by_name_is_the_default_branch() {
        let yaml = r#"
parts:
  a:
    source: https://github.com/foo/bar.git
  b:
    source: https://github.com/foo/bar
    source-branch: master
"#;
        let manifest = Manifest::from_yaml(yaml).unwrap();
        let refs = resolve_dependencies(&manifest, PREFIX);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind(), &RefKind::DefaultBranch);
    }

    #[test]
    fn test_tagged_parts_excluded() {
        let yaml = r#"
parts:
  tagged:
    source: https://github.com/foo/tagged.git
    source-tag: v1.0
  tagged-branch:
    source: https://github.com/foo/both.git
    source-branch: stable
    source-tag: v2.0
  plain:
    source: https://github.com/foo/plain.git
"#;
        assert_eq!(resolve(yaml), vec!["https://github.com/foo/plain.git"]);
    }

    #[test]
    fn test_parts_without_source_skipped() {
        let yaml = r#"
parts:
  nil:
    plugin: nil
  empty:
  gh:
    source: https://github.com/foo/bar
"#;
        assert_eq!(resolve(yaml), vec!["https://github.com/foo/bar"]);
    }

    #[test]
    fn test_malformed_github_source_skipped() {
        let yaml = "parts:\n  deep:\n    source: https://github.com/foo/bar/archive/v1.tar.gz\n";
        assert!(resolve(yaml).is_empty());
    }

    #[test]
    fn test_document_order_preserved() {
        let yaml = r#"
parts:
  zeta:
    source: https://github.com/z/z
  alpha:
    source: https://github.com/a/a
"#;
        assert_eq!(resolve(yaml), vec!["https://github.com/z/z", "https://github.com/a/a"]);
    }

    #[test]
    fn test_manifest_name_and_branch() {
        let yaml = r#"
name: my-snap
parts:
  lib:
    source-type: git
    source: https://github.com/foo/lib.git
    source-branch: release
"#;
        let manifest = Manifest::from_yaml(yaml).unwrap();
        assert_eq!(manifest.name(), Some("my-snap"));
        let (name, part) = &manifest.parts()[0];
        assert_eq!(name, "lib");
        assert_eq!(part.source_branch.as_deref(), Some("release"));
    }

    #[test]
    fn test_numeric_branch_is_polled() {
        let yaml = r#"
parts:
  lib:
    source: https://github.com/o/lib
    source-branch: 2.0
  tool:
    source: https://github.com/o/tool
    source-branch: 7
"#;
        let manifest = Manifest::from_yaml(yaml).unwrap();
        let refs = resolve_dependencies(&manifest, PREFIX);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].kind(), &RefKind::NamedBranch("2.0".to_string()));
        assert_eq!(refs[1].kind(), &RefKind::NamedBranch("7".to_string()));
    }

    #[test]
    fn test_numeric_tag_is_excluded() {
        let yaml = r#"
parts:
  pinned:
    source: https://github.com/o/pinned
    source-tag: 1.5
  plain:
    source: https://github.com/o/plain
"#;
        let manifest = Manifest::from_yaml(yaml).unwrap();
        assert_eq!(manifest.parts()[0].1.source_tag.as_deref(), Some("1.5"));
        assert_eq!(resolve(yaml), vec!["https://github.com/o/plain"]);
    }

    #[test]
    fn test_non_scalar_branch_drops_the_part() {
        let yaml = r#"
parts:
  odd:
    source: https://github.com/o/odd
    source-branch: [a, b]
  plain:
    source: https://github.com/o/plain
"#;
        assert_eq!(resolve(yaml), vec!["https://github.com/o/plain"]);
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        assert!(Manifest::from_yaml("parts: [unclosed").is_err());
    }
}

//! Available artifacts per name, ordered newest and highest precedence first.

use log::{debug, warn};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::artifact::{Artifact, compatible_platforms};
use crate::config::Config;
use crate::error::Result;
use crate::finder::Finder;
use crate::registry::{ActiveRegistry, Installer};
use crate::runtime::Runtime;
use crate::version::Specifier;

#[derive(Debug, Clone, Default)]
pub struct CandidateIndex {
    artifacts: BTreeMap<String, Vec<Arc<Artifact>>>,
    platform: Option<String>,
    runtime_version: Option<String>,
}

impl CandidateIndex {
    /// An empty index accepting artifacts for `platform` and `runtime_version`.
    /// `None` accepts any.
    pub fn new(platform: Option<&str>, runtime_version: Option<&str>) -> Self {
        Self {
            artifacts: BTreeMap::new(),
            platform: platform.map(str::to_string),
            runtime_version: runtime_version.map(str::to_string),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.platform.as_deref(), config.runtime_version.as_deref())
    }

    /// Add every artifact found on `entries`.
    #[tracing::instrument(skip(self, finder))]
    pub fn scan<R: Runtime>(&mut self, finder: &Finder<'_, R>, entries: &[PathBuf]) {
        for entry in entries {
            match finder.find(entry, false) {
                Ok(found) => {
                    for artifact in found {
                        self.add(Arc::new(artifact));
                    }
                }
                Err(err) => warn!("Skipping unreadable search path entry {:?}: {}", entry, err),
            }
        }
    }

    /// Whether an artifact targets this index's runtime version and platform.
    pub fn can_add(&self, artifact: &Artifact) -> bool {
        let runtime_ok = match (self.runtime_version.as_deref(), artifact.runtime_version()) {
            (Some(wanted), Some(built)) => wanted == built,
            _ => true,
        };
        runtime_ok && compatible_platforms(artifact.platform(), self.platform.as_deref())
    }

    /// Add a compatible, versioned artifact. Returns whether it was added.
    pub fn add(&mut self, artifact: Arc<Artifact>) -> bool {
        if !self.can_add(&artifact) {
            debug!("Ignoring incompatible {}", artifact);
            return false;
        }
        if !artifact.has_version() {
            debug!("Ignoring {} without a version", artifact.name());
            return false;
        }
        let candidates = self
            .artifacts
            .entry(artifact.key().to_string())
            .or_default();
        if candidates.iter().any(|existing| **existing == *artifact) {
            return false;
        }
        candidates.push(artifact);
        candidates.sort_by(|a, b| b.cmp(a));
        true
    }

    /// Remove an artifact. Returns whether it was present.
    pub fn remove(&mut self, artifact: &Artifact) -> bool {
        let Some(candidates) = self.artifacts.get_mut(artifact.key()) else {
            return false;
        };
        let before = candidates.len();
        candidates.retain(|existing| **existing != *artifact);
        let removed = candidates.len() != before;
        if candidates.is_empty() {
            self.artifacts.remove(artifact.key());
        }
        removed
    }

    /// Candidates for a name, best first.
    pub fn candidates(&self, name: &str) -> &[Arc<Artifact>] {
        self.artifacts
            .get(&name.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Keys of every name with at least one candidate.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.artifacts.keys().map(String::as_str)
    }

    /// Add every artifact of `other` this index accepts.
    pub fn merge(&mut self, other: &CandidateIndex) {
        for artifact in other.artifacts.values().flatten() {
            self.add(Arc::clone(artifact));
        }
    }

    /// The best artifact for `spec`.
    ///
    /// An artifact already active in `registry` wins when it satisfies the
    /// specifier, and is a [`crate::Error::VersionConflict`] when it does not.
    /// Otherwise the first satisfying candidate is chosen, falling back to
    /// the installer.
    pub fn best_match<R: Runtime>(
        &self,
        spec: &Specifier,
        registry: &ActiveRegistry<'_, R>,
        installer: Option<&dyn Installer>,
    ) -> Result<Option<Arc<Artifact>>> {
        if let Some(active) = registry.find(spec)? {
            return Ok(Some(active));
        }
        for candidate in self.candidates(spec.key()) {
            if spec.contains_artifact(candidate)? {
                return Ok(Some(Arc::clone(candidate)));
            }
        }
        Ok(self.obtain(spec, installer))
    }

    /// Ask the installer for an artifact, keeping it only if compatible.
    pub fn obtain(&self, spec: &Specifier, installer: Option<&dyn Installer>) -> Option<Arc<Artifact>> {
        let artifact = installer?.install(spec)?;
        if self.can_add(&artifact) {
            debug!("Installer provided {} for {}", artifact, spec);
            Some(artifact)
        } else {
            warn!("Installer provided incompatible {} for {}", artifact, spec);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataProvider;
    use crate::registry::MockInstaller;
    use crate::runtime::MockRuntime;
    use crate::test_utils::test_prefix;

    fn artifact(name: &str, version: &str) -> Arc<Artifact> {
        Arc::new(Artifact::new(name, Some(version), MetadataProvider::Empty))
    }

    fn built_for(name: &str, version: &str, platform: &str) -> Arc<Artifact> {
        Arc::new(
            Artifact::new(name, Some(version), MetadataProvider::Empty)
                .with_platform(Some(platform)),
        )
    }

    #[test]
    fn test_add_keeps_newest_first() {
        let mut index = CandidateIndex::new(None, None);
        assert!(index.add(artifact("demo", "1.0")));
        assert!(index.add(artifact("Demo", "2.0")));
        assert!(index.add(artifact("demo", "1.5")));
        assert!(!index.add(artifact("demo", "1.5")));

        let versions: Vec<_> = index
            .candidates("DEMO")
            .iter()
            .map(|a| a.version().unwrap().to_string())
            .collect();
        assert_eq!(versions, vec!["2.0", "1.5", "1.0"]);
        assert_eq!(index.names().collect::<Vec<_>>(), vec!["demo"]);
    }

    #[test]
    fn test_add_rejects_incompatible_and_unversioned() {
        let mut index = CandidateIndex::new(Some("linux-x86_64"), Some("3.1"));
        assert!(!index.add(built_for("demo", "1.0", "windows-x86_64")));
        assert!(!index.add(Arc::new(
            Artifact::new("demo", Some("1.0"), MetadataProvider::Empty)
                .with_runtime_version(Some("2.7"))
        )));
        assert!(!index.add(Arc::new(Artifact::new("demo", None, MetadataProvider::Empty))));
        assert!(index.add(built_for("demo", "1.0", "linux-x86_64")));
        assert!(index.add(artifact("demo", "1.1")));
    }

    #[test]
    fn test_remove_and_merge() {
        let mut index = CandidateIndex::new(None, None);
        let a = artifact("demo", "1.0");
        index.add(a.clone());
        assert!(index.remove(&a));
        assert!(!index.remove(&a));
        assert!(index.candidates("demo").is_empty());

        let mut other = CandidateIndex::new(None, None);
        other.add(artifact("alpha", "1"));
        other.add(built_for("beta", "1", "macosx-10.9-x86_64"));
        let mut restricted = CandidateIndex::new(Some("linux-x86_64"), None);
        restricted.merge(&other);
        assert_eq!(restricted.names().collect::<Vec<_>>(), vec!["alpha"]);
    }

    #[test]
    fn test_best_match_filters_platform() {
        let runtime = MockRuntime::new();
        let config = Config::with_prefix(test_prefix());
        let registry = ActiveRegistry::new(Finder::new(Arc::new(runtime), &config));

        let mut index = CandidateIndex::new(None, None);
        index.add(built_for("demo", "2.0", "windows-x86_64"));
        index.add(built_for("demo", "1.0", "linux-x86_64"));
        let mut linux = CandidateIndex::new(Some("linux-x86_64"), None);
        linux.merge(&index);

        let spec = Specifier::parse("demo").unwrap();
        let best = linux.best_match(&spec, &registry, None).unwrap().unwrap();
        assert_eq!(best.version().unwrap(), "1.0");

        let newer = Specifier::parse("demo>1.0").unwrap();
        assert!(linux.best_match(&newer, &registry, None).unwrap().is_none());
    }

    #[test]
    fn test_best_match_falls_back_to_installer() {
        let runtime = MockRuntime::new();
        let config = Config::with_prefix(test_prefix());
        let registry = ActiveRegistry::new(Finder::new(Arc::new(runtime), &config));
        let index = CandidateIndex::new(Some("linux-x86_64"), None);

        let mut installer = MockInstaller::new();
        installer
            .expect_install()
            .times(1)
            .returning(|spec| Some(artifact(spec.name(), "3.0")));

        let spec = Specifier::parse("fresh>=2").unwrap();
        let best = index
            .best_match(&spec, &registry, Some(&installer))
            .unwrap()
            .unwrap();
        assert_eq!(best.to_string(), "fresh 3.0");
    }

    #[test]
    fn test_obtain_discards_incompatible_install() {
        let index = CandidateIndex::new(Some("linux-x86_64"), None);
        let installer = |_: &Specifier| Some(built_for("demo", "1.0", "windows-x86_64"));
        let spec = Specifier::parse("demo").unwrap();

        assert!(index.obtain(&spec, Some(&installer)).is_none());
        assert!(index.obtain(&spec, None).is_none());
    }
}

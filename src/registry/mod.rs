//! The set of artifacts active on an ordered search path.

mod resolve;

use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::artifact::Artifact;
use crate::entry_points::EntryPoint;
use crate::error::{Error, Result};
use crate::finder::Finder;
use crate::runtime::Runtime;
use crate::version::Specifier;

/// Source of artifacts that are not available yet, consulted during resolution.
#[cfg_attr(test, mockall::automock)]
pub trait Installer {
    fn install(&self, spec: &Specifier) -> Option<Arc<Artifact>>;
}

impl<F> Installer for F
where
    F: Fn(&Specifier) -> Option<Arc<Artifact>>,
{
    fn install(&self, spec: &Specifier) -> Option<Arc<Artifact>> {
        self(spec)
    }
}

/// Active artifacts, at most one per name, with the search-path entries they
/// were found on. Entries are only ever added.
pub struct ActiveRegistry<'a, R: Runtime> {
    finder: Finder<'a, R>,
    entries: Vec<PathBuf>,
    entry_keys: HashMap<PathBuf, Vec<String>>,
    by_key: HashMap<String, Arc<Artifact>>,
}

impl<'a, R: Runtime> ActiveRegistry<'a, R> {
    /// An empty registry.
    pub fn new(finder: Finder<'a, R>) -> Self {
        Self {
            finder,
            entries: Vec::new(),
            entry_keys: HashMap::new(),
            by_key: HashMap::new(),
        }
    }

    /// A registry built by adding each entry in order.
    pub fn with_entries(finder: Finder<'a, R>, entries: &[PathBuf]) -> Self {
        let mut registry = Self::new(finder);
        for entry in entries {
            registry.add_entry(entry);
        }
        registry
    }

    pub fn finder(&self) -> &Finder<'a, R> {
        &self.finder
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    /// Append a search-path entry and activate the artifacts on it.
    ///
    /// Only installed metadata directly on the entry (or the entry itself when
    /// it is a bundle) is activated, never replacing an active artifact.
    /// Entries listed in the directory's entries file follow it.
    #[tracing::instrument(skip(self))]
    pub fn add_entry(&mut self, entry: &Path) {
        self.entry_keys.entry(entry.to_path_buf()).or_default();
        self.entries.push(entry.to_path_buf());

        match self.finder.find(entry, true) {
            Ok(found) => {
                for artifact in found {
                    self.add(Arc::new(artifact), Some(entry), false, false);
                }
            }
            Err(err) => warn!("Skipping unreadable search path entry {:?}: {}", entry, err),
        }

        let listed = match self.finder.listed_entries(entry) {
            Ok(listed) => listed,
            Err(err) => {
                warn!("Cannot read entries listed in {:?}: {}", entry, err);
                Vec::new()
            }
        };
        for listed_entry in listed {
            if !self.entries.contains(&listed_entry) {
                self.add_entry(&listed_entry);
            }
        }
    }

    /// Whether this exact artifact is the active one for its name.
    pub fn contains(&self, artifact: &Artifact) -> bool {
        self.by_key
            .get(artifact.key())
            .is_some_and(|active| **active == *artifact)
    }

    /// The active artifact for a name.
    pub fn get(&self, name: &str) -> Option<&Arc<Artifact>> {
        self.by_key.get(&name.to_lowercase())
    }

    /// The active artifact for `spec`'s name.
    ///
    /// Fails with [`Error::VersionConflict`] when one is active but does not
    /// satisfy `spec`.
    pub fn find(&self, spec: &Specifier) -> Result<Option<Arc<Artifact>>> {
        let Some(active) = self.by_key.get(spec.key()) else {
            return Ok(None);
        };
        if !spec.contains_artifact(active)? {
            return Err(Error::VersionConflict {
                artifact: Arc::clone(active),
                specifier: spec.clone(),
            });
        }
        Ok(Some(Arc::clone(active)))
    }

    /// Active artifacts in search-path order, each once.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Artifact>> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .filter_map(|entry| self.entry_keys.get(entry))
            .flatten()
            .filter(move |key| seen.insert(key.as_str()))
            .filter_map(|key| self.by_key.get(key))
    }

    /// Activate an artifact.
    ///
    /// It is recorded under `entry` (its own location when `None`). With
    /// `insert`, its location is placed on the search path first. An artifact
    /// already active for the name is kept unless `replace` is set.
    pub fn add(&mut self, artifact: Arc<Artifact>, entry: Option<&Path>, insert: bool, replace: bool) {
        if insert {
            artifact.insert_on(&mut self.entries);
        }
        let entry = entry.or(artifact.location()).map(Path::to_path_buf);
        if let Some(entry) = &entry {
            self.entry_keys.entry(entry.clone()).or_default();
        }
        if let Some(location) = artifact.location() {
            self.entry_keys.entry(location.to_path_buf()).or_default();
        }

        if !replace && self.by_key.contains_key(artifact.key()) {
            debug!("{} already active, not adding {}", artifact.key(), artifact);
            return;
        }

        let key = artifact.key().to_string();
        for path in entry.iter().map(PathBuf::as_path).chain(artifact.location()) {
            if let Some(keys) = self.entry_keys.get_mut(path)
                && !keys.contains(&key)
            {
                keys.push(key.clone());
            }
        }
        debug!("Activated {}", artifact);
        self.by_key.insert(key, artifact);
    }

    /// Resolve `specs` with the default index and activate the result.
    pub fn require(&mut self, specs: &[Specifier]) -> Result<Vec<Arc<Artifact>>> {
        let needed = self.resolve(specs, None, None, false)?;
        for artifact in &needed {
            self.add(Arc::clone(artifact), None, true, false);
        }
        info!("Activated {} artifacts", needed.len());
        Ok(needed)
    }

    /// Entry points of active artifacts in `group`, optionally only `name`.
    pub fn iter_entry_points(
        &self,
        group: &str,
        name: Option<&str>,
    ) -> Result<Vec<(Arc<Artifact>, EntryPoint)>> {
        let mut found = Vec::new();
        for artifact in self.iter() {
            let Some(entries) = artifact.entry_map()?.get(group) else {
                continue;
            };
            for entry_point in entries.values() {
                if name.is_none_or(|n| n == entry_point.name) {
                    found.push((Arc::clone(artifact), entry_point.clone()));
                }
            }
        }
        Ok(found)
    }
}

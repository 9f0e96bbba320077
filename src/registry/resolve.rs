use log::debug;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use super::{ActiveRegistry, Installer};
use crate::artifact::Artifact;
use crate::error::{Error, Result};
use crate::index::CandidateIndex;
use crate::runtime::Runtime;
use crate::version::Specifier;

impl<'a, R: Runtime> ActiveRegistry<'a, R> {
    /// Every artifact needed to satisfy `specs` and their requirements.
    ///
    /// Specifiers are processed first in, first out; the first artifact chosen
    /// for a name is kept for the whole resolution. Artifacts come from the
    /// registry when active, then from `index` (by default, an index scanned
    /// from this registry's entries), then from `installer`.
    ///
    /// With `replace_conflicting`, an active artifact that does not satisfy a
    /// specifier is looked up again as if nothing were active, in `index` or
    /// (without one) through the installer alone.
    ///
    /// The registry itself is never modified.
    #[tracing::instrument(skip(self, index, installer))]
    pub fn resolve(
        &self,
        specs: &[Specifier],
        index: Option<&CandidateIndex>,
        installer: Option<&dyn Installer>,
        replace_conflicting: bool,
    ) -> Result<Vec<Arc<Artifact>>> {
        let mut queue: VecDeque<Specifier> = specs.iter().cloned().collect();
        let mut processed: HashSet<Specifier> = HashSet::new();
        let mut best: HashMap<String, Arc<Artifact>> = HashMap::new();
        let mut result = Vec::new();
        let mut scanned: Option<CandidateIndex> = None;

        while let Some(spec) = queue.pop_front() {
            if processed.contains(&spec) {
                continue;
            }

            let artifact = match best.get(spec.key()) {
                Some(artifact) => Arc::clone(artifact),
                None => {
                    let found = match self.by_key.get(spec.key()) {
                        Some(active) if !replace_conflicting || spec.contains_artifact(active)? => {
                            Some(Arc::clone(active))
                        }
                        Some(active) => {
                            debug!("Looking past conflicting {} for {}", active, spec);
                            let scoped = ActiveRegistry::new(self.finder.clone());
                            let empty = CandidateIndex::from_config(self.finder.config());
                            index
                                .unwrap_or(&empty)
                                .best_match(&spec, &scoped, installer)?
                        }
                        None => {
                            let index: &CandidateIndex = match index {
                                Some(index) => index,
                                None => &*scanned.get_or_insert_with(|| self.scan_entries()),
                            };
                            index.best_match(&spec, self, installer)?
                        }
                    };
                    let artifact = found.ok_or_else(|| Error::ArtifactNotFound(spec.clone()))?;
                    debug!("Selected {} for {}", artifact, spec);
                    best.insert(spec.key().to_string(), Arc::clone(&artifact));
                    result.push(Arc::clone(&artifact));
                    artifact
                }
            };

            if !spec.contains_artifact(&artifact)? {
                return Err(Error::VersionConflict {
                    artifact,
                    specifier: spec,
                });
            }

            queue.extend(artifact.requires(spec.extras())?);
            processed.insert(spec);
        }

        Ok(result)
    }

    fn scan_entries(&self) -> CandidateIndex {
        let mut index = CandidateIndex::from_config(self.finder.config());
        index.scan(&self.finder, &self.entries);
        index
    }
}

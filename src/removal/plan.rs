//! Building a removal plan for an active artifact.

use log::{debug, warn};
use std::path::{Path, PathBuf};

use super::StagedRemoval;
use crate::artifact::{Artifact, FileKind, Precedence, classify};
use crate::config::Config;
use crate::entry_points::CONSOLE_SCRIPTS;
use crate::error::{Error, Result};
use crate::finder::ENTRIES_FILE;
use crate::metadata::{INSTALLED_FILES, MetadataProvider, MetadataSource, TOP_LEVEL};
use crate::registry::ActiveRegistry;
use crate::runtime::{Runtime, normalize_path, resolve_relative_path};

impl<'a, R: Runtime> StagedRemoval<'a, R> {
    /// Plan the removal of the active artifact called `name`.
    ///
    /// Nothing outside `config.install_prefix` is ever planned for removal.
    #[tracing::instrument(skip(runtime, registry, config))]
    pub fn for_artifact(
        runtime: &'a R,
        registry: &ActiveRegistry<'_, R>,
        name: &str,
        config: &Config,
    ) -> Result<Self> {
        let artifact = registry
            .get(name)
            .ok_or_else(|| Error::Uninstallation(name.to_string()))?;
        let mut removal = Self::new(runtime, &config.install_prefix);

        match artifact.precedence() {
            Precedence::Development => removal.plan_link(registry, artifact)?,
            Precedence::Bundle => removal.plan_bundle(artifact)?,
            _ => removal.plan_installed(artifact)?,
        }

        if let Some(scripts) = artifact.entry_map()?.get(CONSOLE_SCRIPTS) {
            for script in scripts.keys() {
                if !is_plain_file_name(script) {
                    warn!("Ignoring console script with unsafe name {:?}", script);
                    continue;
                }
                removal.add(&config.bin_dir.join(script))?;
                if cfg!(windows) {
                    removal.add(&config.bin_dir.join(format!("{script}.exe")))?;
                }
            }
        }

        debug!("Planned removal of {}: {:?}", artifact, removal.plan());
        Ok(removal)
    }

    /// The development link pointing at the artifact and its entries line.
    fn plan_link(&mut self, registry: &ActiveRegistry<'_, R>, artifact: &Artifact) -> Result<()> {
        let Some(location) = artifact.location().map(normalize_path) else {
            warn!("{} has no location, nothing to unlink", artifact);
            return Ok(());
        };
        let finder = registry.finder();

        for entry in registry.entries() {
            if !self.runtime.is_dir(entry) {
                continue;
            }
            for path in self.runtime.read_dir(entry)? {
                if !matches!(classify(&path), Some((FileKind::Link, _))) {
                    continue;
                }
                let targets = finder.read_link(&path)?;
                let links_here = targets
                    .iter()
                    .any(|target| resolve_relative_path(entry, Path::new(target)) == location);
                if links_here {
                    self.add(&path)?;
                    self.add_entry(&entry.join(ENTRIES_FILE), &location.to_string_lossy())?;
                }
            }
        }
        Ok(())
    }

    /// The bundle itself and the entries line activating it.
    fn plan_bundle(&mut self, artifact: &Artifact) -> Result<()> {
        let Some(location) = artifact.location() else {
            warn!("{} has no location, nothing to remove", artifact);
            return Ok(());
        };
        self.add(location)?;
        if let Some(parent) = location.parent() {
            self.add_entry(&parent.join(ENTRIES_FILE), &location.to_string_lossy())?;
        }
        Ok(())
    }

    /// Installed files listed in the metadata, or the top-level names, then
    /// the metadata itself.
    fn plan_installed(&mut self, artifact: &Artifact) -> Result<()> {
        match artifact.provider() {
            MetadataProvider::FlatFile(provider) => self.add(provider.path()),
            MetadataProvider::Directory(provider) => {
                let Some(metadata_dir) = provider.metadata_dir() else {
                    warn!("{} has no metadata directory, nothing to remove", artifact);
                    return Ok(());
                };
                for path in installed_paths(provider, provider.base(), metadata_dir)? {
                    self.add(&path)?;
                }
                self.add(metadata_dir)
            }
            MetadataProvider::Archive(provider) => {
                warn!(
                    "{} lives inside {:?}, remove the archive instead",
                    artifact,
                    provider.archive_path()
                );
                Ok(())
            }
            MetadataProvider::Empty => {
                warn!("{} has no metadata, nothing to remove", artifact);
                Ok(())
            }
        }
    }
}

fn installed_paths(
    metadata: &impl MetadataSource,
    base: &Path,
    metadata_dir: &Path,
) -> Result<Vec<PathBuf>> {
    if metadata.has_metadata(INSTALLED_FILES) {
        return Ok(metadata
            .metadata_lines(INSTALLED_FILES)?
            .iter()
            .map(|line| resolve_relative_path(metadata_dir, Path::new(line)))
            .collect());
    }
    Ok(metadata
        .metadata_lines(TOP_LEVEL)?
        .iter()
        .map(|name| base.join(name))
        .collect())
}

/// A single path component naming a file, not a directory walk.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

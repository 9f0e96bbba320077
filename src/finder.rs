//! Discovery of artifacts on a search-path entry.
//!
//! An entry is either a directory or a zip archive:
//!
//! - a directory named `*.artifact` holding `ARTIFACT-INFO/` is an unpacked bundle
//! - any other directory is scanned for `*.artifact-info` (installed metadata),
//!   `*.artifact` (bundles) and `*.artifact-link` (development links)
//! - an archive holding `ARTIFACT-INFO/` is a bundle; `*.artifact-info`
//!   directories at its root are scanned as well

use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::artifact::{Artifact, FileKind, Precedence, classify};
use crate::config::Config;
use crate::error::Result;
use crate::metadata::{
    ArchiveProvider, BUNDLE_METADATA_DIR, DirectoryProvider, FlatFileProvider, MetadataProvider,
    SharedArchiveIndexCache, new_shared,
};
use crate::runtime::{Runtime, SharedRuntime, resolve_relative_path};
use crate::text::yield_lines;

/// Search-path entries file kept in a search directory, one entry per line.
pub const ENTRIES_FILE: &str = "artifacts.entries";

/// Scans search-path entries. Providers of the artifacts it finds share
/// its runtime.
pub struct Finder<'a, R: Runtime> {
    runtime: Arc<R>,
    providers: SharedRuntime,
    config: &'a Config,
    archives: SharedArchiveIndexCache,
}

impl<R: Runtime> Clone for Finder<'_, R> {
    fn clone(&self) -> Self {
        Self {
            runtime: Arc::clone(&self.runtime),
            providers: Arc::clone(&self.providers),
            config: self.config,
            archives: self.archives.clone(),
        }
    }
}

impl<'a, R: Runtime + 'static> Finder<'a, R> {
    pub fn new(runtime: Arc<R>, config: &'a Config) -> Self {
        Self::with_archive_cache(runtime, config, new_shared())
    }

    /// Finder sharing an existing archive index cache.
    pub fn with_archive_cache(
        runtime: Arc<R>,
        config: &'a Config,
        archives: SharedArchiveIndexCache,
    ) -> Self {
        let providers: SharedRuntime = runtime.clone();
        Self {
            runtime,
            providers,
            config,
            archives,
        }
    }
}

impl<'a, R: Runtime> Finder<'a, R> {
    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn config(&self) -> &'a Config {
        self.config
    }

    pub fn archive_cache(&self) -> &SharedArchiveIndexCache {
        &self.archives
    }

    /// Artifacts available on `entry`.
    ///
    /// With `only`, nested bundles and development links are not followed:
    /// only installed metadata directly in the entry (or the entry itself when
    /// it is a bundle) is reported.
    #[tracing::instrument(skip(self))]
    pub fn find(&self, entry: &Path, only: bool) -> Result<Vec<Artifact>> {
        if !self.runtime.exists(entry) {
            debug!("Search path entry {:?} does not exist", entry);
            return Ok(Vec::new());
        }
        if self.runtime.is_dir(entry) {
            self.find_in_dir(entry, only)
        } else if is_archive(entry) {
            self.find_in_archive(entry, only)
        } else {
            debug!("Ignoring search path entry {:?}", entry);
            Ok(Vec::new())
        }
    }

    fn find_in_dir(&self, dir: &Path, only: bool) -> Result<Vec<Artifact>> {
        if let Some((FileKind::Bundle, stem)) = classify(dir) {
            let metadata_dir = dir.join(BUNDLE_METADATA_DIR);
            if self.runtime.is_dir(&metadata_dir) {
                let provider = MetadataProvider::Directory(DirectoryProvider::new(
                    self.providers.clone(),
                    dir,
                    Some(metadata_dir),
                ));
                return Ok(Artifact::from_filename(dir, &stem, provider, Precedence::Bundle)
                    .into_iter()
                    .collect());
            }
        }

        let mut found = Vec::new();
        for path in self.runtime.read_dir(dir)? {
            let Some((kind, stem)) = classify(&path) else {
                continue;
            };
            match kind {
                FileKind::Info => {
                    let provider = if self.runtime.is_dir(&path) {
                        MetadataProvider::Directory(DirectoryProvider::new(
                            self.providers.clone(),
                            dir,
                            Some(path.clone()),
                        ))
                    } else {
                        MetadataProvider::FlatFile(FlatFileProvider::new(
                            self.providers.clone(),
                            &path,
                        ))
                    };
                    match Artifact::from_filename(dir, &stem, provider, Precedence::Binary) {
                        Some(artifact) => found.push(artifact),
                        None => debug!("Unrecognized metadata name {:?}", path),
                    }
                }
                FileKind::Bundle if !only => found.extend(self.find_logged(&path, false)),
                FileKind::Link if !only => found.extend(self.follow_link(&path)?),
                _ => {}
            }
        }
        Ok(found)
    }

    fn find_in_archive(&self, archive: &Path, only: bool) -> Result<Vec<Artifact>> {
        let index = self
            .archives
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get_or_load(self.runtime.as_ref(), archive)?;
        let cache_dir = &self.config.cache_dir;

        let mut found = Vec::new();
        if index.is_dir(BUNDLE_METADATA_DIR)
            && let Some((FileKind::Bundle, stem)) = classify(archive)
        {
            let provider = MetadataProvider::Archive(ArchiveProvider::bundle(
                self.providers.clone(),
                index.clone(),
                cache_dir,
            ));
            found.extend(Artifact::from_filename(
                archive,
                &stem,
                provider,
                Precedence::Bundle,
            ));
        }
        if only {
            return Ok(found);
        }

        for child in index.children("") {
            if !index.is_dir(&child) {
                continue;
            }
            if let Some((FileKind::Info, stem)) = classify(Path::new(&child)) {
                let provider = MetadataProvider::Archive(ArchiveProvider::new(
                    self.providers.clone(),
                    index.clone(),
                    "",
                    Some(&child),
                    cache_dir,
                ));
                found.extend(Artifact::from_filename(
                    archive,
                    &stem,
                    provider,
                    Precedence::Binary,
                ));
            }
        }
        Ok(found)
    }

    /// Artifacts found through a development link, one target path per line.
    fn follow_link(&self, link: &Path) -> Result<Vec<Artifact>> {
        let base = link.parent().unwrap_or(Path::new(""));
        let mut found = Vec::new();
        for target in self.read_link(link)? {
            debug!("Following development link {:?} to {:?}", link, target);
            let target = resolve_relative_path(base, Path::new(&target));
            found.extend(
                self.find_logged(&target, false)
                    .into_iter()
                    .map(|artifact| artifact.with_precedence(Precedence::Development)),
            );
        }
        Ok(found)
    }

    /// Target lines of a development link file.
    pub fn read_link(&self, link: &Path) -> Result<Vec<String>> {
        let text = self.runtime.read_to_string(link)?;
        Ok(yield_lines(&text).map(str::to_string).collect())
    }

    /// Search-path entries listed in `dir`'s entries file, resolved against `dir`.
    pub fn listed_entries(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let file = dir.join(ENTRIES_FILE);
        if !self.runtime.exists(&file) {
            return Ok(Vec::new());
        }
        let text = self.runtime.read_to_string(&file)?;
        Ok(yield_lines(&text)
            .map(|line| resolve_relative_path(dir, Path::new(line)))
            .collect())
    }

    fn find_logged(&self, entry: &Path, only: bool) -> Vec<Artifact> {
        self.find(entry, only).unwrap_or_else(|err| {
            warn!("Skipping unreadable search path entry {:?}: {}", entry, err);
            Vec::new()
        })
    }
}

fn is_archive(path: &Path) -> bool {
    matches!(classify(path), Some((FileKind::Bundle, _)))
        || path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

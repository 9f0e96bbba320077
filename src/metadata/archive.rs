use log::debug;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::archive_index::{ArchiveEntry, ArchiveIndex};
use super::{BUNDLE_METADATA_DIR, MetadataSource, join_resource, not_found};
use crate::error::{Error, Result};
use crate::runtime::{Runtime, SharedRuntime};

/// Metadata and resources read from inside a zip archive.
///
/// Reads go straight to the archive. Callers needing a real path get the
/// resource extracted below `<cache>/<archive name>-<digest prefix>/`.
#[derive(Clone)]
pub struct ArchiveProvider {
    runtime: SharedRuntime,
    index: Arc<ArchiveIndex>,
    prefix: String,
    metadata_prefix: Option<String>,
    cache_dir: PathBuf,
}

impl fmt::Debug for ArchiveProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveProvider")
            .field("archive", &self.index.path())
            .field("prefix", &self.prefix)
            .field("metadata_prefix", &self.metadata_prefix)
            .field("cache_dir", &self.cache_dir)
            .finish_non_exhaustive()
    }
}

impl ArchiveProvider {
    /// Provider whose resources live under `prefix` and whose metadata lives
    /// under `metadata_prefix` inside the archive.
    pub fn new(
        runtime: SharedRuntime,
        index: Arc<ArchiveIndex>,
        prefix: &str,
        metadata_prefix: Option<&str>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runtime,
            index,
            prefix: member_name("", prefix),
            metadata_prefix: metadata_prefix.map(|p| member_name("", p)),
            cache_dir: cache_dir.into(),
        }
    }

    /// Provider for a bundle: resources at the archive root, metadata in
    /// `ARTIFACT-INFO/`.
    pub fn bundle(
        runtime: SharedRuntime,
        index: Arc<ArchiveIndex>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self::new(runtime, index, "", Some(BUNDLE_METADATA_DIR), cache_dir)
    }

    pub fn archive_path(&self) -> &Path {
        self.index.path()
    }

    /// Directory extracted resources of this archive are written below.
    pub fn extraction_root(&self) -> PathBuf {
        let archive_name = self
            .index
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());
        let digest = self.index.digest();
        let short = &digest[..digest.len().min(16)];
        self.cache_dir.join(format!("{archive_name}-{short}"))
    }

    fn location(&self) -> String {
        self.index.path().display().to_string()
    }

    fn metadata_member(&self, name: &str) -> Option<String> {
        self.metadata_prefix
            .as_deref()
            .map(|prefix| member_name(prefix, name))
    }

    fn read_text(&self, member: &str) -> Result<String> {
        let bytes = self.index.read(member)?;
        String::from_utf8(bytes)
            .map_err(|err| Error::Io(io::Error::new(io::ErrorKind::InvalidData, err)))
    }

    #[tracing::instrument(skip(self, entry))]
    fn extract_file(&self, member: &str, entry: &ArchiveEntry) -> Result<PathBuf> {
        let target = join_resource(&self.extraction_root(), member);
        let fail = |err: anyhow::Error| Error::Extraction {
            resource: member.to_string(),
            cache_path: target.clone(),
            source: io::Error::other(err),
        };

        let bytes = self.index.read(member)?;
        if is_current(self.runtime.as_ref(), &target, entry, &bytes) {
            debug!("Reusing extracted {:?}", target);
            return Ok(target);
        }

        let parent = target.parent().unwrap_or(&self.cache_dir);
        self.runtime.create_dir_all(parent).map_err(fail)?;
        let mode = entry.unix_mode.unwrap_or(0o644) & 0o7777;
        match self
            .runtime
            .write_atomic(&target, &bytes, entry.modified, Some(mode))
        {
            Ok(()) => {
                debug!("Extracted {} to {:?}", member, target);
                Ok(target)
            }
            // another process may have won the race with identical content
            Err(err) if is_current(self.runtime.as_ref(), &target, entry, &bytes) => {
                debug!("Lost extraction race for {:?}: {}", target, err);
                Ok(target)
            }
            Err(err) => Err(fail(err)),
        }
    }

    #[tracing::instrument(skip(self))]
    fn extract_dir(&self, member: &str) -> Result<PathBuf> {
        let target = join_resource(&self.extraction_root(), member);
        for (name, entry) in self.index.files_under(member) {
            self.extract_file(name, entry)?;
        }
        self.runtime
            .create_dir_all(&target)
            .map_err(|err| Error::Extraction {
                resource: member.to_string(),
                cache_path: target.clone(),
                source: io::Error::other(err),
            })?;
        Ok(target)
    }
}

/// Join a `/`-separated name onto an archive member prefix.
fn member_name(prefix: &str, name: &str) -> String {
    prefix
        .split('/')
        .chain(name.split('/'))
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether an already extracted file matches the archive member.
fn is_current(runtime: &dyn Runtime, target: &Path, entry: &ArchiveEntry, bytes: &[u8]) -> bool {
    if !runtime.exists(target) || runtime.is_dir(target) {
        return false;
    }
    if let Some(expected) = entry.modified
        && runtime.modified(target).ok() != Some(expected)
    {
        return false;
    }
    runtime.read(target).is_ok_and(|existing| existing == bytes)
}

impl MetadataSource for ArchiveProvider {
    fn has_metadata(&self, name: &str) -> bool {
        self.metadata_member(name)
            .is_some_and(|member| self.index.contains(&member))
    }

    fn get_metadata(&self, name: &str) -> Result<String> {
        match self.metadata_member(name) {
            Some(member) if self.index.file(&member).is_some() => self.read_text(&member),
            _ => Err(not_found(name, self.location())),
        }
    }

    fn list_metadata(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .metadata_member(name)
            .map(|member| self.index.children(&member))
            .unwrap_or_default())
    }

    fn metadata_is_dir(&self, name: &str) -> bool {
        self.metadata_member(name)
            .is_some_and(|member| self.index.is_dir(&member))
    }

    fn has_resource(&self, name: &str) -> bool {
        self.index.contains(&member_name(&self.prefix, name))
    }

    fn get_resource(&self, name: &str) -> Result<Vec<u8>> {
        let member = member_name(&self.prefix, name);
        if self.index.file(&member).is_none() {
            return Err(not_found(name, self.location()));
        }
        self.index.read(&member)
    }

    fn resource_is_dir(&self, name: &str) -> bool {
        self.index.is_dir(&member_name(&self.prefix, name))
    }

    fn list_resources(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.index.children(&member_name(&self.prefix, name)))
    }

    fn resource_filename(&self, name: &str) -> Result<PathBuf> {
        let member = member_name(&self.prefix, name);
        if let Some(entry) = self.index.file(&member) {
            let entry = entry.clone();
            return self.extract_file(&member, &entry);
        }
        if self.index.is_dir(&member) {
            return self.extract_dir(&member);
        }
        Err(not_found(name, self.location()))
    }
}

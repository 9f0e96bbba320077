use std::fmt;
use std::path::{Path, PathBuf};

use super::{MetadataSource, join_resource, not_found};
use crate::error::Result;
use crate::runtime::SharedRuntime;

/// Metadata and resources stored as plain files.
///
/// Resources resolve against `base`; metadata against `metadata_dir`. An
/// installed `.artifact-info` directory has its parent as `base`, an unpacked
/// bundle has itself as `base` and `ARTIFACT-INFO/` as metadata directory.
#[derive(Clone)]
pub struct DirectoryProvider {
    runtime: SharedRuntime,
    base: PathBuf,
    metadata_dir: Option<PathBuf>,
}

impl fmt::Debug for DirectoryProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryProvider")
            .field("base", &self.base)
            .field("metadata_dir", &self.metadata_dir)
            .finish_non_exhaustive()
    }
}

impl DirectoryProvider {
    pub fn new(
        runtime: SharedRuntime,
        base: impl Into<PathBuf>,
        metadata_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            runtime,
            base: base.into(),
            metadata_dir,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn metadata_dir(&self) -> Option<&Path> {
        self.metadata_dir.as_deref()
    }

    fn metadata_file(&self, name: &str) -> Option<PathBuf> {
        self.metadata_dir.as_ref().map(|dir| join_resource(dir, name))
    }

    fn is_file(&self, path: &Path) -> bool {
        self.runtime.exists(path) && !self.runtime.is_dir(path)
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        // read_dir returns sorted paths
        Ok(self
            .runtime
            .read_dir(path)?
            .iter()
            .filter_map(|entry| entry.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }
}

impl MetadataSource for DirectoryProvider {
    fn has_metadata(&self, name: &str) -> bool {
        self.metadata_file(name)
            .is_some_and(|path| self.runtime.exists(&path))
    }

    fn get_metadata(&self, name: &str) -> Result<String> {
        match self.metadata_file(name) {
            Some(path) if self.is_file(&path) => Ok(self.runtime.read_to_string(&path)?),
            _ => Err(not_found(name, self.base.display().to_string())),
        }
    }

    fn list_metadata(&self, name: &str) -> Result<Vec<String>> {
        match self.metadata_file(name) {
            Some(path) if self.runtime.is_dir(&path) => self.list_dir(&path),
            _ => Ok(Vec::new()),
        }
    }

    fn metadata_is_dir(&self, name: &str) -> bool {
        self.metadata_file(name)
            .is_some_and(|path| self.runtime.is_dir(&path))
    }

    fn has_resource(&self, name: &str) -> bool {
        self.runtime.exists(&join_resource(&self.base, name))
    }

    fn get_resource(&self, name: &str) -> Result<Vec<u8>> {
        let path = join_resource(&self.base, name);
        if !self.is_file(&path) {
            return Err(not_found(name, self.base.display().to_string()));
        }
        Ok(self.runtime.read(&path)?)
    }

    fn resource_is_dir(&self, name: &str) -> bool {
        self.runtime.is_dir(&join_resource(&self.base, name))
    }

    fn list_resources(&self, name: &str) -> Result<Vec<String>> {
        let path = join_resource(&self.base, name);
        if !self.runtime.is_dir(&path) {
            return Ok(Vec::new());
        }
        self.list_dir(&path)
    }

    fn resource_filename(&self, name: &str) -> Result<PathBuf> {
        Ok(join_resource(&self.base, name))
    }
}

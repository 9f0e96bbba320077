use std::fmt;
use std::path::{Path, PathBuf};

use super::{METADATA, MetadataSource, not_found};
use crate::error::Result;
use crate::runtime::SharedRuntime;

/// A single metadata file standing in for `METADATA`. Has no resources.
#[derive(Clone)]
pub struct FlatFileProvider {
    runtime: SharedRuntime,
    path: PathBuf,
}

impl fmt::Debug for FlatFileProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlatFileProvider")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FlatFileProvider {
    pub fn new(runtime: SharedRuntime, path: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

impl MetadataSource for FlatFileProvider {
    fn has_metadata(&self, name: &str) -> bool {
        name == METADATA && self.runtime.exists(&self.path) && !self.runtime.is_dir(&self.path)
    }

    fn get_metadata(&self, name: &str) -> Result<String> {
        if name != METADATA {
            return Err(not_found(name, self.location()));
        }
        Ok(self.runtime.read_to_string(&self.path)?)
    }

    fn list_metadata(&self, _name: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn metadata_is_dir(&self, _name: &str) -> bool {
        false
    }

    fn has_resource(&self, _name: &str) -> bool {
        false
    }

    fn get_resource(&self, name: &str) -> Result<Vec<u8>> {
        Err(not_found(name, self.location()))
    }

    fn resource_is_dir(&self, _name: &str) -> bool {
        false
    }

    fn list_resources(&self, _name: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn resource_filename(&self, name: &str) -> Result<PathBuf> {
        Err(not_found(name, self.location()))
    }
}

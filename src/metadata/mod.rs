//! Metadata and resource access over the storage formats artifacts come in.
//!
//! # Structure
//!
//! - `directory` - Plain directories on disk (installed metadata, unpacked bundles)
//! - `archive` - Zip bundles, with on-demand extraction into a cache
//! - `archive_index` - Parsed member listing of a zip bundle, cached per archive path
//! - `flat_file` - A single file standing in for `METADATA`

mod archive;
mod archive_index;
mod directory;
mod flat_file;

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::text::yield_lines;

pub use archive::ArchiveProvider;
pub use archive_index::{
    ArchiveEntry, ArchiveIndex, ArchiveIndexCache, SharedArchiveIndexCache, new_shared,
};
pub use directory::DirectoryProvider;
pub use flat_file::FlatFileProvider;

/// Core metadata file carrying the `Version:` header.
pub const METADATA: &str = "METADATA";
/// Dependency declarations, optionally split into `[extra]` sections.
pub const REQUIRES: &str = "requires.txt";
/// Legacy dependency declarations merged into the base requirements.
pub const DEPENDS: &str = "depends.txt";
pub const ENTRY_POINTS: &str = "entry_points.txt";
/// Files installed alongside the metadata, relative to the metadata directory.
pub const INSTALLED_FILES: &str = "installed-files.txt";
pub const TOP_LEVEL: &str = "top_level.txt";
/// Metadata directory inside a bundle.
pub const BUNDLE_METADATA_DIR: &str = "ARTIFACT-INFO";

/// Read access to an artifact's metadata and resources.
///
/// Names are `/`-separated paths relative to the metadata directory (for the
/// `*_metadata` methods) or to the resource root (for the `*_resource` methods).
pub trait MetadataSource {
    fn has_metadata(&self, name: &str) -> bool;

    /// Full text of a metadata file.
    fn get_metadata(&self, name: &str) -> Result<String>;

    /// Meaningful lines of a metadata file; empty when the file does not exist.
    fn metadata_lines(&self, name: &str) -> Result<Vec<String>> {
        if !self.has_metadata(name) {
            return Ok(Vec::new());
        }
        let text = self.get_metadata(name)?;
        Ok(yield_lines(&text).map(str::to_string).collect())
    }

    fn list_metadata(&self, name: &str) -> Result<Vec<String>>;
    fn metadata_is_dir(&self, name: &str) -> bool;

    fn has_resource(&self, name: &str) -> bool;
    fn get_resource(&self, name: &str) -> Result<Vec<u8>>;
    fn resource_is_dir(&self, name: &str) -> bool;
    fn list_resources(&self, name: &str) -> Result<Vec<String>>;

    /// A real filesystem path for the resource, extracting it first when the
    /// storage is not a plain directory.
    fn resource_filename(&self, name: &str) -> Result<PathBuf>;
}

/// The storage backends an artifact's metadata can live in.
#[derive(Debug)]
pub enum MetadataProvider {
    Directory(DirectoryProvider),
    Archive(ArchiveProvider),
    FlatFile(FlatFileProvider),
    Empty,
}

impl MetadataProvider {
    /// Directory holding the metadata files on disk, when there is one.
    pub fn metadata_path(&self) -> Option<&Path> {
        match self {
            Self::Directory(provider) => provider.metadata_dir(),
            Self::FlatFile(provider) => Some(provider.path()),
            Self::Archive(_) | Self::Empty => None,
        }
    }

    fn source(&self) -> Option<&dyn MetadataSource> {
        match self {
            Self::Directory(provider) => Some(provider),
            Self::Archive(provider) => Some(provider),
            Self::FlatFile(provider) => Some(provider),
            Self::Empty => None,
        }
    }
}

impl MetadataSource for MetadataProvider {
    fn has_metadata(&self, name: &str) -> bool {
        self.source().is_some_and(|s| s.has_metadata(name))
    }

    fn get_metadata(&self, name: &str) -> Result<String> {
        match self.source() {
            Some(source) => source.get_metadata(name),
            None => Err(not_found(name, "empty provider")),
        }
    }

    fn list_metadata(&self, name: &str) -> Result<Vec<String>> {
        match self.source() {
            Some(source) => source.list_metadata(name),
            None => Ok(Vec::new()),
        }
    }

    fn metadata_is_dir(&self, name: &str) -> bool {
        self.source().is_some_and(|s| s.metadata_is_dir(name))
    }

    fn has_resource(&self, name: &str) -> bool {
        self.source().is_some_and(|s| s.has_resource(name))
    }

    fn get_resource(&self, name: &str) -> Result<Vec<u8>> {
        match self.source() {
            Some(source) => source.get_resource(name),
            None => Err(not_found(name, "empty provider")),
        }
    }

    fn resource_is_dir(&self, name: &str) -> bool {
        self.source().is_some_and(|s| s.resource_is_dir(name))
    }

    fn list_resources(&self, name: &str) -> Result<Vec<String>> {
        match self.source() {
            Some(source) => source.list_resources(name),
            None => Ok(Vec::new()),
        }
    }

    fn resource_filename(&self, name: &str) -> Result<PathBuf> {
        match self.source() {
            Some(source) => source.resource_filename(name),
            None => Err(not_found(name, "empty provider")),
        }
    }
}

/// Join a `/`-separated resource name onto a base path.
pub(crate) fn join_resource(base: &Path, name: &str) -> PathBuf {
    name.split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .fold(base.to_path_buf(), |path, part| path.join(part))
}

pub(crate) fn not_found(name: &str, location: impl Into<String>) -> Error {
    Error::ResourceNotFound {
        name: name.to_string(),
        location: location.into(),
    }
}

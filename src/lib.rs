//! Discovery, resolution and activation of versioned artifacts on a search path.
//!
//! Artifacts are found as installed metadata, bundles (zip files or unpacked
//! directories) and development links. Requirements are resolved against the
//! active set plus an index of candidates, and installed artifacts can be
//! removed with rollback.

pub mod artifact;
pub mod config;
pub mod entry_points;
pub mod error;
pub mod finder;
pub mod index;
pub mod metadata;
pub mod registry;
pub mod removal;
pub mod runtime;
pub mod text;
pub mod version;

pub use artifact::{Artifact, Precedence};
pub use config::Config;
pub use entry_points::{EntryMap, EntryPoint};
pub use error::{Error, Result};
pub use finder::Finder;
pub use index::CandidateIndex;
pub use metadata::{MetadataProvider, MetadataSource};
pub use registry::{ActiveRegistry, Installer};
pub use removal::{RemovalPlan, RemovalState, StagedRemoval};
pub use runtime::{RealRuntime, Runtime, SharedRuntime};
pub use version::{Specifier, VersionKey, parse_specifiers, parse_version};

/// Test utilities for cross-platform path handling.
#[cfg(test)]
pub mod test_utils {
    use crate::runtime::MockRuntime;
    use std::fs::File;
    use std::io::Write;
    use std::path::{Path, PathBuf};

    /// Returns a test home directory path based on the platform.
    /// - Unix: `/home/user`
    /// - Windows: `C:\Users\user`
    pub fn test_home() -> PathBuf {
        #[cfg(not(windows))]
        {
            PathBuf::from("/home/user")
        }
        #[cfg(windows)]
        {
            PathBuf::from(r"C:\Users\user")
        }
    }

    /// Returns the default install prefix under [`test_home`].
    /// - Unix: `/home/user/.local`
    /// - Windows: `C:\Users\user\.local`
    pub fn test_prefix() -> PathBuf {
        test_home().join(".local")
    }

    /// Configure a mock runtime with common defaults for tests.
    /// - home dir set to [`test_home`]
    /// - cache dir set to `.cache` under [`test_home`]
    /// - canonicalize is a no-op passthrough
    pub fn configure_mock_runtime_basics(runtime: &mut MockRuntime) {
        runtime.expect_home_dir().returning(|| Some(test_home()));
        runtime
            .expect_cache_dir()
            .returning(|| Some(test_home().join(".cache")));
        runtime
            .expect_canonicalize()
            .returning(|path| Ok(path.to_path_buf()));
    }

    /// Write a zip archive with the given members. Names ending in `/` become
    /// directory entries. Every member is stamped 2024-03-14 15:09:26.
    pub fn write_zip(path: &Path, members: &[(&str, &str)]) {
        use zip::write::FileOptions;
        use zip::{CompressionMethod, DateTime, ZipWriter};

        let file = File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        let stamp = DateTime::from_date_and_time(2024, 3, 14, 15, 9, 26).unwrap();
        let options: FileOptions<()> = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(stamp)
            .unix_permissions(0o644);

        for (name, content) in members {
            if name.ends_with('/') {
                zip.add_directory(*name, options).unwrap();
            } else {
                zip.start_file(*name, options).unwrap();
                zip.write_all(content.as_bytes()).unwrap();
            }
        }
        zip.finish().unwrap();
    }
}

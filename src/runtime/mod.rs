//! Runtime abstraction for system operations.
//!
//! Scanning search paths, loading configuration, prompting for confirmation
//! and staging removals all go through the [`Runtime`] trait so they can be
//! exercised against [`MockRuntime`] in tests.
//!
//! # Structure
//!
//! - `path` - Path utility functions (normalize, is_path_under, relative paths)
//! - `env` - Environment variables and well-known directories
//! - `fs` - File system operations (read, write, move, directory, atomic replace)
//! - `user` - User interaction (confirmation prompts)

mod env;
mod fs;
pub mod path;
mod user;

use anyhow::Result;
use std::env as std_env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

pub use path::{is_path_under, normalize_path, relative_path_from_dir, resolve_relative_path};

#[cfg_attr(test, mockall::automock)]
pub trait Runtime: Send + Sync {
    // Environment
    fn env_var(&self, key: &str) -> Result<String, std_env::VarError>;

    // File System
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
    fn read(&self, path: &Path) -> Result<Vec<u8>>;
    fn read_to_string(&self, path: &Path) -> Result<String>;
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
    fn create_dir_all(&self, path: &Path) -> Result<()>;
    fn remove_dir_all(&self, path: &Path) -> Result<()>;
    fn exists(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;
    fn canonicalize(&self, path: &Path) -> Result<PathBuf>;
    fn modified(&self, path: &Path) -> Result<SystemTime>;

    /// Replace `path` with `contents` through a temporary file in the same
    /// directory, so readers see either the old or the new file.
    /// `modified` and `mode` are applied before the file becomes visible.
    fn write_atomic(
        &self,
        path: &Path,
        contents: &[u8],
        modified: Option<SystemTime>,
        mode: Option<u32>,
    ) -> Result<()>;

    /// Create a fresh, uniquely named directory inside `parent` and return its path.
    /// The directory is not removed automatically.
    fn create_staging_dir(&self, parent: &Path, prefix: &str) -> Result<PathBuf>;

    // Directories
    fn home_dir(&self) -> Option<PathBuf>;
    fn cache_dir(&self) -> Option<PathBuf>;

    // User interaction
    /// Prompt user for confirmation. Returns true if user confirms (y/yes), false otherwise.
    fn confirm(&self, prompt: &str) -> Result<bool>;
}

/// Runtime handle owned by metadata providers.
pub type SharedRuntime = Arc<dyn Runtime>;

#[derive(Debug, Clone, Copy, Default)]
pub struct RealRuntime;

impl Runtime for RealRuntime {
    fn env_var(&self, key: &str) -> Result<String, std_env::VarError> {
        self.env_var_impl(key)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.write_impl(path, contents)
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.read_impl(path)
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        self.read_to_string_impl(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.rename_impl(from, to)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.create_dir_all_impl(path)
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        self.remove_dir_all_impl(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.exists_impl(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.is_dir_impl(path)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        self.read_dir_impl(path)
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        self.canonicalize_impl(path)
    }

    fn modified(&self, path: &Path) -> Result<SystemTime> {
        self.modified_impl(path)
    }

    fn write_atomic(
        &self,
        path: &Path,
        contents: &[u8],
        modified: Option<SystemTime>,
        mode: Option<u32>,
    ) -> Result<()> {
        self.write_atomic_impl(path, contents, modified, mode)
    }

    fn create_staging_dir(&self, parent: &Path, prefix: &str) -> Result<PathBuf> {
        self.create_staging_dir_impl(parent, prefix)
    }

    fn home_dir(&self) -> Option<PathBuf> {
        self.home_dir_impl()
    }

    fn cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir_impl()
    }

    fn confirm(&self, prompt: &str) -> Result<bool> {
        self.confirm_impl(prompt)
    }
}

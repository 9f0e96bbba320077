//! Session configuration.
//!
//! Values come from the environment (through [`Runtime`]) with defaults
//! derived from the user's home and cache directories:
//!
//! | variable                 | default                       |
//! |--------------------------|-------------------------------|
//! | `PKGRES_PREFIX`          | `<home>/.local`               |
//! | `PKGRES_CACHE`           | `<cache dir>/pkgres`          |
//! | `PKGRES_BIN_DIR`         | `<prefix>/bin`                |
//! | `PKGRES_PLATFORM`        | detected `<os>-<arch>`        |
//! | `PKGRES_RUNTIME_VERSION` | unset (any runtime version)   |

use log::debug;
use serde::Serialize;
use std::path::PathBuf;

use crate::artifact::supported_platform;
use crate::error::{Error, Result};
use crate::runtime::Runtime;

pub const PREFIX_VAR: &str = "PKGRES_PREFIX";
pub const CACHE_VAR: &str = "PKGRES_CACHE";
pub const BIN_DIR_VAR: &str = "PKGRES_BIN_DIR";
pub const PLATFORM_VAR: &str = "PKGRES_PLATFORM";
pub const RUNTIME_VERSION_VAR: &str = "PKGRES_RUNTIME_VERSION";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    /// Local installation prefix. Removals never touch anything outside it.
    pub install_prefix: PathBuf,
    /// Root of the extraction cache for archive resources.
    pub cache_dir: PathBuf,
    /// Where console scripts of installed artifacts live.
    pub bin_dir: PathBuf,
    /// Platform artifacts must be compatible with; `None` accepts all.
    pub platform: Option<String>,
    /// Runtime version artifacts must target; `None` accepts all.
    pub runtime_version: Option<String>,
}

impl Config {
    /// Configuration rooted at `install_prefix` with all other values defaulted
    /// relative to it.
    pub fn with_prefix(install_prefix: impl Into<PathBuf>) -> Self {
        let install_prefix = install_prefix.into();
        Self {
            cache_dir: install_prefix.join(".cache").join("pkgres"),
            bin_dir: install_prefix.join("bin"),
            install_prefix,
            platform: Some(supported_platform()),
            runtime_version: None,
        }
    }

    /// Load configuration from the environment.
    pub fn from_env<R: Runtime>(runtime: &R) -> Result<Self> {
        let var = |key: &str| runtime.env_var(key).ok().filter(|v| !v.trim().is_empty());

        let install_prefix = match var(PREFIX_VAR) {
            Some(prefix) => PathBuf::from(prefix),
            None => runtime
                .home_dir()
                .map(|home| home.join(".local"))
                .ok_or_else(|| {
                    Error::Config(format!(
                        "cannot determine home directory; set {PREFIX_VAR}"
                    ))
                })?,
        };

        let cache_dir = match var(CACHE_VAR) {
            Some(dir) => PathBuf::from(dir),
            None => runtime
                .cache_dir()
                .map(|dir| dir.join("pkgres"))
                .unwrap_or_else(|| install_prefix.join(".cache").join("pkgres")),
        };

        let bin_dir = var(BIN_DIR_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| install_prefix.join("bin"));

        let config = Self {
            install_prefix,
            cache_dir,
            bin_dir,
            platform: Some(var(PLATFORM_VAR).unwrap_or_else(supported_platform)),
            runtime_version: var(RUNTIME_VERSION_VAR),
        };
        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }
}

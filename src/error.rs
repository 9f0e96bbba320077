//! Library error type.

use std::path::PathBuf;
use std::sync::Arc;

use crate::artifact::Artifact;
use crate::removal::RemovalState;
use crate::version::Specifier;

/// Result type for pkgres operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while parsing, resolving, reading metadata or removing artifacts.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Specifier text could not be parsed
    #[error("malformed specifier {input:?}: {reason}")]
    MalformedSpecifier { input: String, reason: String },

    /// Entry point declaration could not be parsed
    #[error("malformed entry point {input:?}: {reason}")]
    MalformedEntryPoint { input: String, reason: String },

    /// No available or installable artifact satisfies the specifier
    #[error("no artifact found for {0}")]
    ArtifactNotFound(Specifier),

    /// The artifact chosen for a name does not satisfy a specifier for that name
    #[error("{artifact} is selected but {specifier} is required")]
    VersionConflict {
        artifact: Arc<Artifact>,
        specifier: Specifier,
    },

    /// A specifier asked for an extra the artifact does not declare
    #[error("{artifact} has no such extra feature {extra:?}")]
    UnknownExtra { artifact: String, extra: String },

    /// The artifact has a name but no readable version
    #[error("missing 'Version:' header and/or METADATA resource for {0}")]
    MissingVersion(String),

    /// A metadata or resource name does not exist in the provider
    #[error("resource {name:?} not found in {location}")]
    ResourceNotFound { name: String, location: String },

    /// A resource could not be extracted into the cache
    #[error("can't extract {resource:?} to {}: {source}", cache_path.display())]
    Extraction {
        resource: String,
        cache_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Removal requested for a name that is not active
    #[error("cannot remove {0}: not active")]
    Uninstallation(String),

    /// A removal step was invoked from the wrong state
    #[error("removal is {actual}, {operation} requires {expected}")]
    RemovalState {
        operation: &'static str,
        expected: RemovalState,
        actual: RemovalState,
    },

    /// Configuration could not be determined
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Archive(#[from] zip::result::ZipError),

    /// Failure reported by the runtime abstraction
    #[error(transparent)]
    Runtime(#[from] anyhow::Error),
}

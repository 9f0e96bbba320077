//! Artifact file naming: `<name>-<version>[-rt<runtime>[-<platform>]]<ext>`.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use crate::text::{safe_name, safe_version, to_filename};

/// Zip bundle or unpacked bundle directory.
pub const BUNDLE_EXT: &str = ".artifact";
/// Installed metadata, a directory or a single file.
pub const INFO_EXT: &str = ".artifact-info";
/// Development link listing checkout paths.
pub const LINK_EXT: &str = ".artifact-link";

static ARTIFACT_STEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<name>[^-]+)(-(?P<ver>[^-]+)(-rt(?P<rt>[^-]+)(-(?P<plat>.+))?)?)?$")
        .expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Bundle,
    Info,
    Link,
}

/// Classify a search-path item by extension, returning the file stem.
pub fn classify(path: &Path) -> Option<(FileKind, String)> {
    let file_name = path.file_name()?.to_string_lossy();
    // longest extensions first: ".artifact" is a prefix of the others
    for (ext, kind) in [
        (INFO_EXT, FileKind::Info),
        (LINK_EXT, FileKind::Link),
        (BUNDLE_EXT, FileKind::Bundle),
    ] {
        let Some(split) = file_name.len().checked_sub(ext.len()) else {
            continue;
        };
        if split > 0
            && file_name.is_char_boundary(split)
            && file_name[split..].eq_ignore_ascii_case(ext)
        {
            return Some((kind, file_name[..split].to_string()));
        }
    }
    None
}

/// Identity fields encoded in an artifact file stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFilename {
    pub name: String,
    pub version: Option<String>,
    pub runtime_version: Option<String>,
    pub platform: Option<String>,
}

impl ArtifactFilename {
    /// Parse a file stem. Underscores in the name and version stand for `-`.
    pub fn parse(stem: &str) -> Option<Self> {
        let caps = ARTIFACT_STEM.captures(stem)?;
        let unescape = |s: &str| s.replace('_', "-");
        Some(Self {
            name: unescape(&caps["name"]),
            version: caps.name("ver").map(|m| unescape(m.as_str())),
            runtime_version: caps.name("rt").map(|m| m.as_str().to_string()),
            platform: caps.name("plat").map(|m| m.as_str().to_string()),
        })
    }

    /// File stem for these fields; the inverse of [`ArtifactFilename::parse`].
    pub fn to_stem(&self) -> String {
        let mut stem = to_filename(&safe_name(&self.name));
        if let Some(version) = &self.version {
            stem.push('-');
            stem.push_str(&to_filename(&safe_version(version)));
            if let Some(runtime) = &self.runtime_version {
                stem.push_str("-rt");
                stem.push_str(runtime);
                if let Some(platform) = &self.platform {
                    stem.push('-');
                    stem.push_str(platform);
                }
            }
        }
        stem
    }
}

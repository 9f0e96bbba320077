//! Installable artifacts: identity, version, precedence and declared metadata.

mod filename;
mod platform;

use log::debug;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::entry_points::{EntryMap, EntryPoint, parse_map};
use crate::error::{Error, Result};
use crate::metadata::{DEPENDS, ENTRY_POINTS, METADATA, MetadataProvider, MetadataSource, REQUIRES};
use crate::runtime::normalize_path;
use crate::text::{safe_extra, safe_name, safe_version, split_sections};
use crate::version::{Operator, Specifier, VersionKey, parse_version, parse_specifiers};

pub use filename::{ArtifactFilename, BUNDLE_EXT, FileKind, INFO_EXT, LINK_EXT, classify};
pub use platform::{compatible_platforms, supported_platform};

/// How an artifact is stored. Breaks ties between equal versions, higher first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Precedence {
    Development,
    Checkout,
    Source,
    Binary,
    Bundle,
}

/// Requirements keyed by extra; `None` holds the unconditional ones.
type DependencyMap = BTreeMap<Option<String>, Vec<Specifier>>;

/// One installable artifact.
///
/// Immutable apart from the memoized fields, which are filled from the
/// metadata provider on first use.
pub struct Artifact {
    name: String,
    key: String,
    declared_version: Option<String>,
    precedence: Precedence,
    platform: Option<String>,
    runtime_version: Option<String>,
    location: Option<PathBuf>,
    provider: MetadataProvider,

    version: OnceLock<String>,
    parsed_version: OnceLock<VersionKey>,
    dependencies: OnceLock<DependencyMap>,
    entry_map: OnceLock<EntryMap>,
}

impl Artifact {
    pub fn new(name: &str, version: Option<&str>, provider: MetadataProvider) -> Self {
        let name = if name.trim().is_empty() {
            "Unknown".to_string()
        } else {
            safe_name(name)
        };
        Self {
            key: name.to_lowercase(),
            name,
            declared_version: version.map(safe_version),
            precedence: Precedence::Bundle,
            platform: None,
            runtime_version: None,
            location: None,
            provider,
            version: OnceLock::new(),
            parsed_version: OnceLock::new(),
            dependencies: OnceLock::new(),
            entry_map: OnceLock::new(),
        }
    }

    /// Artifact described by a file stem found at `location`.
    pub fn from_filename(
        location: &Path,
        stem: &str,
        provider: MetadataProvider,
        precedence: Precedence,
    ) -> Option<Self> {
        let parsed = ArtifactFilename::parse(stem)?;
        Some(
            Self::new(&parsed.name, parsed.version.as_deref(), provider)
                .with_location(location)
                .with_precedence(precedence)
                .with_runtime_version(parsed.runtime_version.as_deref())
                .with_platform(parsed.platform.as_deref()),
        )
    }

    pub fn with_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_precedence(mut self, precedence: Precedence) -> Self {
        self.precedence = precedence;
        self
    }

    pub fn with_platform(mut self, platform: Option<&str>) -> Self {
        self.platform = platform.map(str::to_string);
        self
    }

    pub fn with_runtime_version(mut self, runtime_version: Option<&str>) -> Self {
        self.runtime_version = runtime_version.map(str::to_string);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lower-cased name used for lookups.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn precedence(&self) -> Precedence {
        self.precedence
    }

    pub fn platform(&self) -> Option<&str> {
        self.platform.as_deref()
    }

    pub fn runtime_version(&self) -> Option<&str> {
        self.runtime_version.as_deref()
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    pub fn provider(&self) -> &MetadataProvider {
        &self.provider
    }

    /// The declared version, or the `Version:` header of `METADATA`.
    ///
    /// Only a version that was found is remembered; a missing one is looked
    /// up again on the next call.
    pub fn version(&self) -> Result<&str> {
        if let Some(version) = &self.declared_version {
            return Ok(version.as_str());
        }
        if let Some(version) = self.version.get() {
            return Ok(version.as_str());
        }
        match self.read_version() {
            Some(version) => Ok(self.version.get_or_init(|| version).as_str()),
            None => Err(Error::MissingVersion(self.describe())),
        }
    }

    pub fn has_version(&self) -> bool {
        self.version().is_ok()
    }

    pub fn parsed_version(&self) -> Result<&VersionKey> {
        if let Some(key) = self.parsed_version.get() {
            return Ok(key);
        }
        let key = parse_version(self.version()?);
        Ok(self.parsed_version.get_or_init(|| key))
    }

    fn read_version(&self) -> Option<String> {
        let lines = match self.provider.metadata_lines(METADATA) {
            Ok(lines) => lines,
            Err(err) => {
                debug!("Cannot read {} of {}: {}", METADATA, self.describe(), err);
                return None;
            }
        };
        lines.iter().find_map(|line| {
            let (header, value) = line.split_once(':')?;
            header
                .trim()
                .eq_ignore_ascii_case("version")
                .then(|| safe_version(value.trim()))
        })
    }

    fn describe(&self) -> String {
        match &self.location {
            Some(location) => format!("{} ({})", self.name, location.display()),
            None => self.name.clone(),
        }
    }

    fn dependency_map(&self) -> Result<&DependencyMap> {
        if let Some(map) = self.dependencies.get() {
            return Ok(map);
        }
        let mut map = DependencyMap::new();
        for resource in [REQUIRES, DEPENDS] {
            if !self.provider.has_metadata(resource) {
                continue;
            }
            let text = self.provider.get_metadata(resource)?;
            let sections = split_sections(&text).map_err(|reason| Error::MalformedSpecifier {
                input: resource.to_string(),
                reason,
            })?;
            for section in sections {
                let extra = section
                    .name
                    .filter(|name| !name.is_empty())
                    .map(|name| safe_extra(&name));
                let specs = parse_specifiers(&section.lines.join("\n"))?;
                map.entry(extra).or_default().extend(specs);
            }
        }
        Ok(self.dependencies.get_or_init(|| map))
    }

    /// Requirements for the base artifact plus the named extras.
    pub fn requires<I, S>(&self, extras: I) -> Result<Vec<Specifier>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let map = self.dependency_map()?;
        let mut deps: Vec<Specifier> = map.get(&None).cloned().unwrap_or_default();
        for extra in extras {
            let extra = safe_extra(extra.as_ref());
            let extra_deps = map.get(&Some(extra.clone())).ok_or_else(|| Error::UnknownExtra {
                artifact: self.to_string(),
                extra,
            })?;
            deps.extend(extra_deps.iter().cloned());
        }
        Ok(deps)
    }

    /// Requirements without any extras.
    pub fn base_requires(&self) -> Result<Vec<Specifier>> {
        self.requires(std::iter::empty::<&str>())
    }

    /// Names of the declared extras.
    pub fn extras(&self) -> Result<Vec<String>> {
        Ok(self.dependency_map()?.keys().flatten().cloned().collect())
    }

    pub fn entry_map(&self) -> Result<&EntryMap> {
        if let Some(map) = self.entry_map.get() {
            return Ok(map);
        }
        let map = if self.provider.has_metadata(ENTRY_POINTS) {
            parse_map(&self.provider.get_metadata(ENTRY_POINTS)?)?
        } else {
            EntryMap::new()
        };
        Ok(self.entry_map.get_or_init(|| map))
    }

    pub fn entry_point(&self, group: &str, name: &str) -> Result<Option<&EntryPoint>> {
        Ok(self.entry_map()?.get(group).and_then(|entries| entries.get(name)))
    }

    /// `name==version` for this artifact.
    pub fn as_specifier(&self) -> Result<Specifier> {
        let version = self.version()?;
        Ok(Specifier::new(
            &self.name,
            &[(Operator::Eq, version)],
            &[] as &[&str],
        ))
    }

    /// Place this artifact's location on an ordered search path.
    ///
    /// A location already present keeps its place. A bundle goes right before
    /// the directory containing it; anything else is appended. Later
    /// duplicates of the location are dropped.
    pub fn insert_on(&self, entries: &mut Vec<PathBuf>) {
        let Some(location) = &self.location else {
            return;
        };
        let target = normalize_path(location);
        let container = target.parent().map(Path::to_path_buf);

        let found = entries.iter().enumerate().find_map(|(i, entry)| {
            let entry = normalize_path(entry);
            if entry == target {
                Some((i, false))
            } else if self.precedence == Precedence::Bundle
                && container.as_deref() == Some(entry.as_path())
            {
                Some((i, true))
            } else {
                None
            }
        });
        let position = match found {
            Some((i, false)) => i,
            Some((i, true)) => {
                entries.insert(i, location.clone());
                i
            }
            None => {
                entries.push(location.clone());
                entries.len() - 1
            }
        };

        let mut i = position + 1;
        while i < entries.len() {
            if normalize_path(&entries[i]) == target {
                entries.remove(i);
            } else {
                i += 1;
            }
        }
    }

    fn sort_key(&self) -> (Option<&VersionKey>, Precedence, &str, String, &str, &str) {
        let location = self
            .location
            .as_ref()
            .map(|l| {
                let l = l.to_string_lossy();
                l.split('#').next().unwrap_or_default().to_string()
            })
            .unwrap_or_default();
        (
            self.parsed_version().ok(),
            self.precedence,
            self.key.as_str(),
            location,
            self.runtime_version.as_deref().unwrap_or_default(),
            self.platform.as_deref().unwrap_or_default(),
        )
    }
}

impl PartialEq for Artifact {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for Artifact {}

impl PartialOrd for Artifact {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Artifact {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl Hash for Artifact {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sort_key().hash(state);
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version() {
            Ok(version) => write!(f, "{} {}", self.name, version),
            Err(_) => write!(f, "{} [unknown version]", self.name),
        }
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("name", &self.name)
            .field("version", &self.version().ok())
            .field("precedence", &self.precedence)
            .field("platform", &self.platform)
            .field("runtime_version", &self.runtime_version)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

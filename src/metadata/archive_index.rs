//! Parsed member listing of zip bundles.

use chrono::NaiveDate;
use log::debug;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use zip::ZipArchive;

use super::not_found;
use crate::error::Result;
use crate::runtime::Runtime;

/// One file member of an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    index: usize,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub unix_mode: Option<u32>,
}

/// Directory structure of a zip archive, read once.
///
/// Member names are normalized to `/`-separated paths without a trailing
/// slash. Directories are recorded even when the archive only implies them
/// through member paths; the archive root is `""`. The archive bytes are
/// kept, so members read later match the indexed listing.
pub struct ArchiveIndex {
    path: PathBuf,
    digest: String,
    bytes: Vec<u8>,
    files: BTreeMap<String, ArchiveEntry>,
    dirs: BTreeMap<String, BTreeSet<String>>,
}

impl fmt::Debug for ArchiveIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveIndex")
            .field("path", &self.path)
            .field("digest", &self.digest)
            .field("files", &self.files.len())
            .field("dirs", &self.dirs.len())
            .finish_non_exhaustive()
    }
}

impl ArchiveIndex {
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime + ?Sized>(runtime: &R, path: &Path) -> Result<Self> {
        let bytes = runtime.read(path)?;
        let digest = hex::encode(Sha256::digest(&bytes));
        let mut archive = ZipArchive::new(Cursor::new(bytes.as_slice()))?;

        let mut files = BTreeMap::new();
        let mut dirs: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        dirs.insert(String::new(), BTreeSet::new());

        for index in 0..archive.len() {
            let entry = archive.by_index(index)?;
            let Some(name) = normalize_member(entry.name()) else {
                debug!("Skipping archive member with unsafe path {:?}", entry.name());
                continue;
            };
            register_parents(&mut dirs, &name);
            if entry.is_dir() {
                dirs.entry(name).or_default();
            } else {
                files.insert(
                    name,
                    ArchiveEntry {
                        index,
                        size: entry.size(),
                        modified: entry.last_modified().and_then(to_system_time),
                        unix_mode: entry.unix_mode(),
                    },
                );
            }
        }

        debug!(
            "Indexed {:?}: {} files, {} directories",
            path,
            files.len(),
            dirs.len()
        );
        drop(archive);
        Ok(Self {
            path: path.to_path_buf(),
            digest,
            bytes,
            files,
            dirs,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hex sha256 of the archive bytes.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn file(&self, name: &str) -> Option<&ArchiveEntry> {
        self.files.get(name)
    }

    pub fn is_dir(&self, name: &str) -> bool {
        self.dirs.contains_key(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name) || self.is_dir(name)
    }

    /// Immediate children of a directory member.
    pub fn children(&self, name: &str) -> Vec<String> {
        self.dirs
            .get(name)
            .map(|children| children.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every file member at or below a directory member.
    pub fn files_under<'a>(&'a self, dir: &'a str) -> impl Iterator<Item = (&'a str, &'a ArchiveEntry)> {
        self.files
            .iter()
            .filter(move |(name, _)| dir.is_empty() || is_nested(name, dir))
            .map(|(name, entry)| (name.as_str(), entry))
    }

    /// Read the bytes of a file member.
    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .files
            .get(name)
            .ok_or_else(|| not_found(name, self.path.display().to_string()))?;
        let mut archive = ZipArchive::new(Cursor::new(self.bytes.as_slice()))?;
        let member = archive.by_index(entry.index)?;
        // the header size is untrusted; grow the buffer as data arrives
        let mut buffer = Vec::new();
        member.take(entry.size).read_to_end(&mut buffer)?;
        Ok(buffer)
    }
}

fn is_nested(name: &str, dir: &str) -> bool {
    name.strip_prefix(dir)
        .is_some_and(|rest| rest.starts_with('/'))
}

fn normalize_member(raw: &str) -> Option<String> {
    let mut parts = Vec::new();
    for part in raw.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => return None,
            part => parts.push(part),
        }
    }
    if raw.starts_with('/') || parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

fn register_parents(dirs: &mut BTreeMap<String, BTreeSet<String>>, name: &str) {
    let mut child = name;
    while let Some((parent, leaf)) = child.rsplit_once('/') {
        dirs.entry(parent.to_string())
            .or_default()
            .insert(leaf.to_string());
        child = parent;
    }
    dirs.entry(String::new())
        .or_default()
        .insert(child.to_string());
}

/// Zip timestamps carry no zone; they are interpreted as UTC.
fn to_system_time(time: zip::DateTime) -> Option<SystemTime> {
    let date = NaiveDate::from_ymd_opt(time.year().into(), time.month().into(), time.day().into())?;
    let datetime = date
        .and_hms_opt(time.hour().into(), time.minute().into(), time.second().into())?
        .and_utc();
    Some(SystemTime::from(datetime))
}

/// Indexes keyed by archive path. Entries are only ever added.
#[derive(Debug, Default)]
pub struct ArchiveIndexCache {
    indexes: HashMap<PathBuf, Arc<ArchiveIndex>>,
}

impl ArchiveIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached index for `path`, loading it on first use.
    pub fn get_or_load<R: Runtime + ?Sized>(
        &mut self,
        runtime: &R,
        path: &Path,
    ) -> Result<Arc<ArchiveIndex>> {
        if let Some(index) = self.indexes.get(path) {
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(ArchiveIndex::load(runtime, path)?);
        self.indexes.insert(path.to_path_buf(), Arc::clone(&index));
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }
}

/// Type alias for the archive index cache shared by every provider of a session
pub type SharedArchiveIndexCache = Arc<Mutex<ArchiveIndexCache>>;

/// Create a new shared archive index cache
pub fn new_shared() -> SharedArchiveIndexCache {
    Arc::new(Mutex::new(ArchiveIndexCache::new()))
}

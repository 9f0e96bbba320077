//! Editing of search-path entries files.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::runtime::resolve_relative_path;

/// `content` without the lines naming any of `entries`.
///
/// Lines and entries are compared as paths resolved against `dir`, so
/// `./demo.artifact` and an absolute path to the same bundle match. Kept
/// lines are copied byte for byte, line endings and non-UTF-8 names included.
pub(crate) fn without_entries(content: &[u8], dir: &Path, entries: &BTreeSet<String>) -> Vec<u8> {
    if content.is_empty() {
        return Vec::new();
    }
    let targets: Vec<_> = entries
        .iter()
        .map(|entry| resolve_relative_path(dir, Path::new(entry.trim())))
        .collect();

    let body = content.strip_suffix(b"\n").unwrap_or(content);
    let kept: Vec<&[u8]> = body
        .split(|&byte| byte == b'\n')
        .filter(|line| {
            let line = line.trim_ascii();
            if line.is_empty() || line.starts_with(b"#") {
                return true;
            }
            let resolved = resolve_relative_path(dir, &bytes_to_path(line));
            !targets.contains(&resolved)
        })
        .collect();

    let mut out = kept.join(&b'\n');
    if !kept.is_empty() && body.len() < content.len() {
        out.push(b'\n');
    }
    out
}

#[cfg(unix)]
fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

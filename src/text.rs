//! Text helpers shared by metadata readers and parsers.
//!
//! Metadata resources are read line by line: surrounding whitespace is
//! stripped, blank lines and `#` comment lines are ignored.

use regex::Regex;
use std::sync::LazyLock;

static UNSAFE_NAME_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9.]+").expect("valid regex"));

/// Yield the meaningful lines of a text resource.
pub fn yield_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// A `[section]` of a sectioned text resource. Lines before the first header
/// belong to the `None` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: Option<String>,
    pub lines: Vec<String>,
}

/// Split a resource into `[section]` groups.
///
/// Fails on a line that opens a header without closing it.
pub fn split_sections(text: &str) -> Result<Vec<Section>, String> {
    let mut sections = Vec::new();
    let mut current = Section {
        name: None,
        lines: Vec::new(),
    };

    for line in yield_lines(text) {
        if let Some(header) = line.strip_prefix('[') {
            let Some(name) = header.strip_suffix(']') else {
                return Err(format!("invalid section heading {line:?}"));
            };
            if current.name.is_some() || !current.lines.is_empty() {
                sections.push(current);
            }
            current = Section {
                name: Some(name.trim().to_string()),
                lines: Vec::new(),
            };
        } else {
            current.lines.push(line.to_string());
        }
    }

    if current.name.is_some() || !current.lines.is_empty() {
        sections.push(current);
    }
    Ok(sections)
}

/// Convert an arbitrary string to a standard artifact name.
///
/// Any run of characters other than ASCII alphanumerics and `.` becomes a single `-`.
pub fn safe_name(name: &str) -> String {
    UNSAFE_NAME_RUN.replace_all(name, "-").into_owned()
}

/// Convert an arbitrary string to a standard version string.
///
/// Spaces become dots, and any other run of unsafe characters becomes a single `-`.
pub fn safe_version(version: &str) -> String {
    let version = version.replace(' ', ".");
    UNSAFE_NAME_RUN.replace_all(&version, "-").into_owned()
}

/// Convert an arbitrary string to a standard extra name (lower-case, `_` separated).
pub fn safe_extra(extra: &str) -> String {
    UNSAFE_NAME_RUN.replace_all(extra, "_").to_lowercase()
}

/// Escape a name or version for use as a file name component.
pub fn to_filename(name: &str) -> String {
    name.replace('-', "_")
}

//! Named entry points advertised by artifacts.
//!
//! `entry_points.txt` groups declarations under `[group]` headers:
//!
//! ```text
//! [console_scripts]
//! demo = demo.cli:main [color]
//! ```

use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::text::{safe_extra, split_sections, yield_lines};

static ENTRY_POINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<name>.+?)\s*=\s*(?P<module>[\w.]+)\s*(:\s*(?P<attr>[\w.]+))?\s*(?P<extras>\[.*\])?\s*$",
    )
    .expect("valid regex")
});

/// Group of runnable commands installed into the bin directory.
pub const CONSOLE_SCRIPTS: &str = "console_scripts";

/// An object within a module, named and optionally gated on extras.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryPoint {
    pub name: String,
    pub module: String,
    pub attrs: Vec<String>,
    pub extras: BTreeSet<String>,
}

/// Entry points by group, then by name.
pub type EntryMap = BTreeMap<String, BTreeMap<String, EntryPoint>>;

impl EntryPoint {
    /// Parse `name = module:attr.path [extra1,extra2]`.
    pub fn parse(src: &str) -> Result<Self> {
        let malformed = |reason: &str| Error::MalformedEntryPoint {
            input: src.to_string(),
            reason: reason.to_string(),
        };
        let caps = ENTRY_POINT
            .captures(src)
            .ok_or_else(|| malformed("expected 'name = module:attrs [extras]'"))?;

        let attrs = caps
            .name("attr")
            .map(|m| m.as_str().split('.').map(str::to_string).collect())
            .unwrap_or_default();

        let extras = match caps.name("extras") {
            Some(m) => {
                let raw = m.as_str();
                let inner = &raw[1..raw.len() - 1];
                let mut extras = BTreeSet::new();
                for extra in inner.split(',').map(str::trim) {
                    if extra.is_empty() || extra.contains(['[', ']']) {
                        return Err(malformed("invalid extras list"));
                    }
                    extras.insert(safe_extra(extra));
                }
                extras
            }
            None => BTreeSet::new(),
        };

        Ok(Self {
            name: caps["name"].trim().to_string(),
            module: caps["module"].to_string(),
            attrs,
            extras,
        })
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.name, self.module)?;
        if !self.attrs.is_empty() {
            write!(f, ":{}", self.attrs.join("."))?;
        }
        if !self.extras.is_empty() {
            let extras: Vec<_> = self.extras.iter().map(String::as_str).collect();
            write!(f, " [{}]", extras.join(","))?;
        }
        Ok(())
    }
}

/// Parse the declarations of one group. Names must be unique.
pub fn parse_group<'a>(
    group: &str,
    lines: impl IntoIterator<Item = &'a str>,
) -> Result<BTreeMap<String, EntryPoint>> {
    if group.trim().is_empty() || group.contains(char::is_whitespace) {
        return Err(Error::MalformedEntryPoint {
            input: group.to_string(),
            reason: "invalid group name".to_string(),
        });
    }
    let mut entries = BTreeMap::new();
    for line in lines {
        let entry = EntryPoint::parse(line)?;
        if entries.contains_key(&entry.name) {
            return Err(Error::MalformedEntryPoint {
                input: line.to_string(),
                reason: format!("duplicate entry point name in group {group:?}"),
            });
        }
        entries.insert(entry.name.clone(), entry);
    }
    Ok(entries)
}

/// Parse a whole `entry_points.txt`.
pub fn parse_map(text: &str) -> Result<EntryMap> {
    let sections = split_sections(text).map_err(|reason| Error::MalformedEntryPoint {
        input: text.lines().next().unwrap_or_default().to_string(),
        reason,
    })?;
    let mut map = EntryMap::new();
    for section in sections {
        let Some(group) = section.name else {
            if let Some(line) = section.lines.first() {
                return Err(Error::MalformedEntryPoint {
                    input: line.clone(),
                    reason: "entry points must be listed in groups".to_string(),
                });
            }
            continue;
        };
        if map.contains_key(&group) {
            return Err(Error::MalformedEntryPoint {
                input: group,
                reason: "duplicate group name".to_string(),
            });
        }
        let entries = parse_group(&group, section.lines.iter().map(String::as_str))?;
        map.insert(group, entries);
    }
    Ok(map)
}

/// Parse loose `name = module:attr` lines with no group headers.
pub fn parse_lines(group: &str, text: &str) -> Result<BTreeMap<String, EntryPoint>> {
    parse_group(group, yield_lines(text))
}

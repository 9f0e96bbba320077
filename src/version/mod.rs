//! Version keys and dependency specifiers.
//!
//! Version strings are never rejected: any input is turned into a [`VersionKey`]
//! whose ordering follows the usual chronology of release schemes, so that
//! `1.0.dev1 < 1.0a1 < 1.0rc1 < 1.0 < 1.0-1 < 1.0.1`.

mod specifier;

pub use specifier::{Action, Operator, Specifier, parse_specifiers};

use regex::Regex;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static COMPONENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+|[a-z]+|\.|-").expect("valid regex"));

/// Width numeric tokens are padded to, so lexical order matches numeric order.
const NUMERIC_WIDTH: usize = 8;

/// Tag appended to every key. Pre-release tags sort below it.
const FINAL: &str = "*final";
/// Separator tag marking a post-release (`1.0-1`). Sorts above [`FINAL`].
const FINAL_DASH: &str = "*final-";
const ZERO: &str = "00000000";

/// Totally ordered comparison key for a version string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VersionKey(Vec<String>);

impl VersionKey {
    /// The normalized tokens of the key.
    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// Whether the version carries a pre-release tag (anything sorting below a final release).
    pub fn is_prerelease(&self) -> bool {
        self.0
            .iter()
            .any(|part| part.starts_with('*') && part.as_str() < FINAL)
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

impl FromStr for VersionKey {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(parse_version(s))
    }
}

/// Split a lower-cased version string into raw tokens.
///
/// Digit runs, letter runs, `.` and `-` are tokens; whatever lies between two
/// of them is a token of its own.
fn split_components(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut last = 0;
    for m in COMPONENT.find_iter(s) {
        if m.start() > last {
            parts.push(&s[last..m.start()]);
        }
        parts.push(m.as_str());
        last = m.end();
    }
    if last < s.len() {
        parts.push(&s[last..]);
    }
    parts
}

fn normalize_component(part: &str) -> Option<String> {
    let part = match part {
        "pre" | "preview" | "rc" => "c",
        "dev" => "@",
        "-" => "final-",
        "." | "" => return None,
        other => other,
    };

    if part.starts_with(|c: char| c.is_ascii_digit()) {
        Some(format!("{part:0>NUMERIC_WIDTH$}"))
    } else {
        Some(format!("*{part}"))
    }
}

/// Convert a version string to a chronologically sortable key.
///
/// Never fails. Trailing zero components are dropped (`1.0 == 1.0.0`) and a
/// `-` directly followed by a pre-release tag is ignored (`1.0-rc1 == 1.0rc1`).
pub fn parse_version(s: &str) -> VersionKey {
    let lowered = s.trim().to_lowercase();
    let tokens = split_components(&lowered)
        .into_iter()
        .filter_map(normalize_component)
        .chain(std::iter::once(FINAL.to_string()));

    let mut parts: Vec<String> = Vec::new();
    for part in tokens {
        if part.starts_with('*') {
            if part.as_str() < FINAL {
                while parts.last().is_some_and(|p| p == FINAL_DASH) {
                    parts.pop();
                }
            }
            while parts.last().is_some_and(|p| p == ZERO) {
                parts.pop();
            }
        }
        parts.push(part);
    }
    VersionKey(parts)
}

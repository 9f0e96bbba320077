//! Dependency specifiers: `name[extra1,extra2]op1 v1,op2 v2`.

use regex::Regex;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::LazyLock;

use super::{VersionKey, parse_version};
use crate::artifact::Artifact;
use crate::error::{Error, Result};
use crate::text::{safe_extra, safe_name, safe_version, yield_lines};

static LINE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(#.*)?$").expect("valid regex"));
static CONTINUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\\\s*(#.*)?$").expect("valid regex"));
static NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([\w.-]+)").expect("valid regex"));
static VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(<=?|>=?|==|!=)\s*([\w.-]+)").expect("valid regex")
});
static COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*,").expect("valid regex"));
static OPEN_BRACKET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[").expect("valid regex"));
static CLOSE_BRACKET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\]").expect("valid regex"));

/// What a single constraint decides about a candidate version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Reject immediately.
    Fail,
    /// Accept immediately.
    Succeed,
    /// Accept unless a later constraint decides otherwise.
    ExtendTrue,
    /// Reject unless a later constraint decides otherwise.
    ExtendFalse,
    /// No opinion, but counts as a rejection when nothing fired yet.
    Neutral,
}

/// Comparison operator of a version constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Eq => "==",
            Operator::Ne => "!=",
        }
    }

    /// Transition table indexed by (equal, greater, less).
    fn transitions(self) -> [Action; 3] {
        use Action::*;
        match self {
            Operator::Lt => [ExtendFalse, ExtendFalse, Succeed],
            Operator::Le => [Succeed, ExtendFalse, Succeed],
            Operator::Gt => [Fail, ExtendTrue, Fail],
            Operator::Ge => [Succeed, ExtendTrue, Fail],
            Operator::Eq => [Succeed, Neutral, Neutral],
            Operator::Ne => [Fail, ExtendTrue, ExtendTrue],
        }
    }

    /// Action for a candidate that compares to the constraint version as `ordering`.
    pub fn action(self, ordering: Ordering) -> Action {
        let table = self.transitions();
        match ordering {
            Ordering::Equal => table[0],
            Ordering::Greater => table[1],
            Ordering::Less => table[2],
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Le),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Ge),
            "==" => Ok(Operator::Eq),
            "!=" => Ok(Operator::Ne),
            other => Err(Error::MalformedSpecifier {
                input: other.to_string(),
                reason: "unknown comparison operator".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
struct Constraint {
    key: VersionKey,
    operator: Operator,
    version: String,
}

/// A named dependency constraint with optional extras.
///
/// Constraints are kept sorted by version so membership can be decided in a
/// single ascending pass.
#[derive(Debug, Clone)]
pub struct Specifier {
    name: String,
    key: String,
    extras: BTreeSet<String>,
    constraints: Vec<Constraint>,
}

impl Specifier {
    /// Build a specifier from already separated parts.
    pub fn new<S: AsRef<str>>(
        name: &str,
        constraints: &[(Operator, &str)],
        extras: &[S],
    ) -> Self {
        let name = safe_name(name);
        let key = name.to_lowercase();
        let mut constraints: Vec<Constraint> = constraints
            .iter()
            .map(|(operator, version)| {
                let version = safe_version(version);
                Constraint {
                    key: parse_version(&version),
                    operator: *operator,
                    version,
                }
            })
            .collect();
        constraints.sort_by(|a, b| {
            a.key
                .cmp(&b.key)
                .then_with(|| a.operator.cmp(&b.operator))
                .then_with(|| a.version.cmp(&b.version))
        });
        let extras = extras.iter().map(|e| safe_extra(e.as_ref())).collect();

        Self {
            name,
            key,
            extras,
            constraints,
        }
    }

    /// Parse exactly one specifier.
    pub fn parse(s: &str) -> Result<Self> {
        let mut specs = parse_specifiers(s)?;
        match specs.len() {
            1 => Ok(specs.remove(0)),
            0 => Err(malformed(s, "no specifier found")),
            _ => Err(malformed(s, "expected only one specifier")),
        }
    }

    /// Normalized artifact name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lower-cased name used for lookups.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn extras(&self) -> &BTreeSet<String> {
        &self.extras
    }

    /// `(operator, version)` pairs in ascending version order.
    pub fn constraints(&self) -> impl Iterator<Item = (Operator, &str)> {
        self.constraints
            .iter()
            .map(|c| (c.operator, c.version.as_str()))
    }

    /// Whether a parsed version satisfies every constraint.
    pub fn contains_key(&self, candidate: &VersionKey) -> bool {
        let mut last = None;
        for constraint in &self.constraints {
            match constraint.operator.action(candidate.cmp(&constraint.key)) {
                Action::Fail => return false,
                Action::Succeed => return true,
                Action::ExtendTrue => last = Some(true),
                Action::ExtendFalse => last = Some(false),
                Action::Neutral => {
                    if last.is_none() {
                        last = Some(false);
                    }
                }
            }
        }
        last.unwrap_or(true)
    }

    /// Whether a version string satisfies every constraint.
    pub fn contains_version(&self, version: &str) -> bool {
        self.contains_key(&parse_version(version))
    }

    /// Whether an artifact has this name and a satisfying version.
    ///
    /// The artifact's version is only consulted when constraints exist; an
    /// artifact without a readable version then raises [`Error::MissingVersion`].
    pub fn contains_artifact(&self, artifact: &Artifact) -> Result<bool> {
        if artifact.key() != self.key {
            return Ok(false);
        }
        if self.constraints.is_empty() {
            return Ok(true);
        }
        Ok(self.contains_key(artifact.parsed_version()?))
    }

    fn hash_fields(&self) -> (&str, Vec<(Operator, &VersionKey)>, &BTreeSet<String>) {
        (
            &self.key,
            self.constraints
                .iter()
                .map(|c| (c.operator, &c.key))
                .collect(),
            &self.extras,
        )
    }
}

impl PartialEq for Specifier {
    fn eq(&self, other: &Self) -> bool {
        self.hash_fields() == other.hash_fields()
    }
}

impl Eq for Specifier {}

impl Hash for Specifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash_fields().hash(state);
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.extras.is_empty() {
            let extras: Vec<&str> = self.extras.iter().map(String::as_str).collect();
            write!(f, "[{}]", extras.join(","))?;
        }
        let constraints: Vec<String> = self
            .constraints
            .iter()
            .map(|c| format!("{}{}", c.operator, c.version))
            .collect();
        f.write_str(&constraints.join(","))
    }
}

impl FromStr for Specifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Specifier::parse(s)
    }
}

fn malformed(input: &str, reason: impl Into<String>) -> Error {
    Error::MalformedSpecifier {
        input: input.to_string(),
        reason: reason.into(),
    }
}

/// Cursor over the logical lines of a specifier list.
struct Scanner<'a, I: Iterator<Item = &'a str>> {
    lines: I,
    line: &'a str,
    pos: usize,
}

impl<'a, I: Iterator<Item = &'a str>> Scanner<'a, I> {
    fn rest(&self) -> &'a str {
        &self.line[self.pos..]
    }

    /// Try `re` at the cursor, advancing past the match on success.
    fn eat(&mut self, re: &Regex) -> Option<regex::Captures<'a>> {
        let rest = self.rest();
        let caps = re.captures(rest)?;
        self.pos += caps.get(0).map_or(0, |m| m.end());
        Some(caps)
    }

    fn at(&self, re: &Regex) -> bool {
        re.is_match(self.rest())
    }

    /// Scan a comma separated list of `item` up to `terminator`.
    fn scan_list(
        &mut self,
        item: &Regex,
        terminator: &Regex,
        item_name: &str,
    ) -> Result<Vec<regex::Captures<'a>>> {
        let mut items = Vec::new();
        while !self.at(terminator) {
            if self.at(&CONTINUE) {
                self.line = self.lines.next().ok_or_else(|| {
                    malformed(self.line, "\\ must not appear on the last nonblank line")
                })?;
                self.pos = 0;
            }
            let caps = self.eat(item).ok_or_else(|| {
                malformed(self.line, format!("expected {item_name} at {:?}", self.rest()))
            })?;
            items.push(caps);
            if self.eat(&COMMA).is_none() && !self.at(terminator) {
                return Err(malformed(
                    self.line,
                    format!("expected ',' or end-of-list at {:?}", self.rest()),
                ));
            }
        }
        self.eat(terminator);
        Ok(items)
    }
}

/// Parse every specifier in a multi-line text.
///
/// One specifier per logical line; blank lines and `#` comments are skipped and
/// a trailing `\` continues the list on the next line.
pub fn parse_specifiers(text: &str) -> Result<Vec<Specifier>> {
    let mut lines = yield_lines(text);
    let mut specs = Vec::new();

    while let Some(line) = lines.next() {
        let mut scanner = Scanner {
            lines: &mut lines,
            line,
            pos: 0,
        };
        let name = scanner
            .eat(&NAME)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .ok_or_else(|| malformed(line, "missing artifact name"))?;

        let mut extras = Vec::new();
        if scanner.eat(&OPEN_BRACKET).is_some() {
            for caps in scanner.scan_list(&NAME, &CLOSE_BRACKET, "'extra' name")? {
                if let Some(extra) = caps.get(1) {
                    extras.push(extra.as_str());
                }
            }
        }

        let mut constraints = Vec::new();
        for caps in scanner.scan_list(&VERSION, &LINE_END, "version spec")? {
            let (Some(op), Some(version)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            constraints.push((op.as_str().parse::<Operator>()?, version.as_str()));
        }

        specs.push(Specifier::new(name, &constraints, &extras));
    }
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn spec(s: &str) -> Specifier {
        Specifier::parse(s).unwrap()
    }

    #[test]
    fn test_parse_name_extras_and_constraints() {
        let s = spec("Twisted.Web [SSL, docs] >= 1.2, < 2.0");
        assert_eq!(s.name(), "Twisted.Web");
        assert_eq!(s.key(), "twisted.web");
        assert_eq!(
            s.extras().iter().cloned().collect::<Vec<_>>(),
            vec!["docs", "ssl"]
        );
        let constraints: Vec<_> = s.constraints().collect();
        assert_eq!(
            constraints,
            vec![(Operator::Ge, "1.2"), (Operator::Lt, "2.0")]
        );
    }

    #[test]
    fn test_display_is_canonical() {
        assert_eq!(spec("foo [b,a] <2.0 , >=1.0").to_string(), "foo[a,b]>=1.0,<2.0");
        assert_eq!(spec("bar").to_string(), "bar");
        assert_eq!(spec("baz==1.0").to_string(), "baz==1.0");
    }

    #[test]
    fn test_round_trip() {
        for text in ["foo[a,b]>=1.0,<2.0", "bar!=1.5,!=1.6", "baz", "qux[x]"] {
            let parsed = spec(text);
            assert_eq!(parsed.to_string(), text);
            assert_eq!(spec(&parsed.to_string()), parsed);
        }
    }

    #[test]
    fn test_range_membership() {
        let s = spec("foo>=1.0,<2.0");
        assert!(s.contains_version("1.0"));
        assert!(s.contains_version("1.5"));
        assert!(!s.contains_version("2.0"));
        assert!(!s.contains_version("0.9"));
        // pre-releases of the upper bound still sort below it
        assert!(s.contains_version("2.0a1"));
    }

    #[test]
    fn test_exclusion_runs() {
        let s = spec("foo!=1.5,!=1.6");
        assert!(s.contains_version("1.0"));
        assert!(!s.contains_version("1.5"));
        assert!(!s.contains_version("1.6"));
        assert!(s.contains_version("1.7"));
    }

    #[test]
    fn test_exact_pins() {
        let s = spec("foo==1.0,==2.0");
        assert!(s.contains_version("1.0"));
        assert!(s.contains_version("2.0"));
        assert!(!s.contains_version("1.5"));
        assert!(!s.contains_version("3.0"));
    }

    #[test]
    fn test_strict_bounds() {
        let s = spec("foo>1.0");
        assert!(!s.contains_version("1.0"));
        assert!(s.contains_version("1.0.1"));
        let s = spec("foo<=1.0");
        assert!(s.contains_version("1.0.0"));
        assert!(!s.contains_version("1.0-1"));
    }

    #[test]
    fn test_no_constraints_accepts_everything() {
        let s = spec("foo");
        assert!(s.contains_version("0"));
        assert!(s.contains_version("99.dev"));
    }

    #[test]
    fn test_missing_name_fails() {
        let err = Specifier::parse(">=1.0").unwrap_err();
        assert!(matches!(err, Error::MalformedSpecifier { .. }));
    }

    #[test]
    fn test_unbalanced_extras_fail() {
        assert!(Specifier::parse("foo[bar").is_err());
        assert!(Specifier::parse("foo[bar,").is_err());
        assert!(Specifier::parse("foo bar]").is_err());
    }

    #[test]
    fn test_unknown_operator_fails() {
        assert!(Specifier::parse("foo ~= 1.0").is_err());
        assert!(Specifier::parse("foo => 1.0").is_err());
        assert!("~=".parse::<Operator>().is_err());
    }

    #[test]
    fn test_missing_version_after_operator_fails() {
        assert!(Specifier::parse("foo >=").is_err());
    }

    #[test]
    fn test_parse_exactly_one() {
        assert!(Specifier::parse("").is_err());
        assert!(Specifier::parse("foo\nbar").is_err());
    }

    #[test]
    fn test_parse_list_with_comments_and_continuation() {
        let text = "# deps\nfoo>=1.0, \\\n   <2.0\n\nbar[ssl] # trailing\n";
        let specs = parse_specifiers(text).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].to_string(), "foo>=1.0,<2.0");
        assert_eq!(specs[1].to_string(), "bar[ssl]");
    }

    #[test]
    fn test_continuation_on_last_line_fails() {
        assert!(parse_specifiers("foo>=1.0, \\\n").is_err());
    }

    #[test]
    fn test_equality_ignores_spelling() {
        let a = spec("Foo>=1.0,<2");
        let b = spec("foo <2.0.0 , >= 1.0");
        assert_eq!(a, b);
        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
        assert_ne!(spec("foo[x]"), spec("foo"));
    }

    #[test]
    fn test_action_table() {
        assert_eq!(Operator::Ne.action(Ordering::Equal), Action::Fail);
        assert_eq!(Operator::Ge.action(Ordering::Greater), Action::ExtendTrue);
        assert_eq!(Operator::Lt.action(Ordering::Less), Action::Succeed);
        assert_eq!(Operator::Eq.action(Ordering::Less), Action::Neutral);
    }
}

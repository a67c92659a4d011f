//! Wildcard group-name matching.
//!
//! A selector is a case-insensitive pattern where `*` matches zero or more
//! characters. Every shape (exact, prefix, suffix, containment, interior) is
//! handled by one compilation step: literal text is escaped and each `*`
//! becomes a non-greedy `.*?`, anchored at both ends.
//!
//! The interior wildcard may match the empty string, so `Dept-*-Employees`
//! matches `Dept--Employees` but not `Dept-Employees` (both literal hyphens
//! are still required).

use regex::Regex;

const WILDCARD: char = '*';

/// A compiled selector pattern.
///
/// Compile once and reuse when the same selector is evaluated against many
/// candidates (e.g. a directory listing).
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    kind: PatternKind,
}

#[derive(Debug, Clone)]
enum PatternKind {
    /// No wildcard: case-insensitive equality.
    Exact(String),
    /// At least one wildcard: anchored regex.
    Wildcard(Regex),
    /// The regex engine refused the pattern (size limits); matches nothing.
    Unmatchable,
}

impl Pattern {
    pub fn compile(pattern: &str) -> Self {
        let kind = if pattern.contains(WILDCARD) {
            match Regex::new(&to_regex(pattern)) {
                Ok(re) => PatternKind::Wildcard(re),
                Err(_) => PatternKind::Unmatchable,
            }
        } else {
            PatternKind::Exact(pattern.to_lowercase())
        };

        Self {
            raw: pattern.to_string(),
            kind,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        match &self.kind {
            PatternKind::Exact(lowered) => candidate.to_lowercase() == *lowered,
            PatternKind::Wildcard(re) => re.is_match(candidate),
            PatternKind::Unmatchable => false,
        }
    }
}

/// Does `candidate` match the selector `pattern`?
///
/// Pure and total: any pair of strings yields a boolean.
pub fn matches(candidate: &str, pattern: &str) -> bool {
    Pattern::compile(pattern).is_match(candidate)
}

fn to_regex(pattern: &str) -> String {
    let body = pattern
        .split(WILDCARD)
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*?");

    // s: `*` spans newlines too; i: selectors are case-insensitive.
    format!("(?si)^{body}$")
}

// src/listing.rs
//
// Prefix and glob matching over flat blob keys, plus the derived directory view.
//
// Everything here is a pure function of the key set; the backend only supplies
// keys. Matching is anchored to path segments: a prefix `a` covers `a` itself and
// `a/...`, never `ab.txt`, and a glob `*` never crosses `/`.

use glob::{MatchOptions, Pattern};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

use crate::constants::KEY_SEPARATOR;
use crate::error::{Result, StorageError};

/// `{sample}` or `{sample,[a-z]+}` style workflow wildcards
static WORKFLOW_WILDCARD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[A-Za-z_][A-Za-z0-9_]*(,[^{}]*)?\}").expect("static regex"));

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// One immediate child of a listed prefix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirectoryEntry {
    pub relative_key: String,
    /// Synthesized: some key continues below this name
    pub is_directory: bool,
}

/// Replace workflow wildcards with single-segment `*`.
pub fn normalize_workflow_wildcards(prefix: &str) -> String {
    WORKFLOW_WILDCARD_RE.replace_all(prefix, "*").into_owned()
}

pub fn has_glob_chars(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

#[derive(Debug, Clone)]
enum Matcher {
    Literal,
    Glob(Pattern),
}

/// How to enumerate and filter keys for one listing prefix.
#[derive(Debug, Clone)]
pub struct ListingPlan {
    /// Text stripped from matching keys
    base: String,
    /// Directory handed to the backend's segment-based listing
    root: Option<String>,
    matcher: Matcher,
}

impl ListingPlan {
    /// Build a plan for `prefix` (relative to the container).
    pub fn new(prefix: &str) -> Result<Self> {
        let normalized = normalize_workflow_wildcards(prefix);

        if !has_glob_chars(&normalized) {
            let base = normalized.clone();
            let root = trimmed_dir(&base);
            return Ok(Self {
                base,
                root,
                matcher: Matcher::Literal,
            });
        }

        let pattern = Pattern::new(normalized.trim_end_matches(KEY_SEPARATOR))
            .map_err(|e| StorageError::malformed(prefix, format!("invalid glob: {}", e)))?;
        let first_wild = normalized.find(['*', '?', '[']).unwrap_or(normalized.len());
        let base = match normalized[..first_wild].rfind(KEY_SEPARATOR) {
            Some(idx) => normalized[..=idx].to_string(),
            None => String::new(),
        };
        let root = trimmed_dir(&base);
        Ok(Self {
            base,
            root,
            matcher: Matcher::Glob(pattern),
        })
    }

    /// Backend listing root (no trailing separator), `None` for the container root.
    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn is_glob(&self) -> bool {
        matches!(self.matcher, Matcher::Glob(_))
    }

    /// Relative key for `key` if it matches; `None` otherwise. The key equal to
    /// the prefix itself never matches.
    pub fn relative(&self, key: &str) -> Option<String> {
        match &self.matcher {
            Matcher::Literal => literal_relative(&self.base, key),
            Matcher::Glob(pattern) => {
                if !glob_covers(pattern, key) {
                    return None;
                }
                key.strip_prefix(self.base.as_str())
                    .filter(|rel| !rel.is_empty())
                    .map(str::to_string)
            }
        }
    }

    /// Apply the plan to an already enumerated key set.
    pub fn filter<'a, I>(&self, keys: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        keys.into_iter().filter_map(|k| self.relative(k)).collect()
    }
}

fn trimmed_dir(base: &str) -> Option<String> {
    let dir = base.trim_end_matches(KEY_SEPARATOR);
    (!dir.is_empty()).then(|| dir.to_string())
}

fn literal_relative(prefix: &str, key: &str) -> Option<String> {
    if prefix.is_empty() {
        return (!key.is_empty()).then(|| key.to_string());
    }
    let rest = key.strip_prefix(prefix)?;
    let rel = if prefix.ends_with(KEY_SEPARATOR) {
        rest
    } else {
        // `a` covers `a/...` only; `ab.txt` merely shares text.
        rest.strip_prefix(KEY_SEPARATOR)?
    };
    (!rel.is_empty()).then(|| rel.to_string())
}

/// The pattern matches the whole key or one of its segment-aligned ancestors.
fn glob_covers(pattern: &Pattern, key: &str) -> bool {
    if pattern.matches_with(key, GLOB_OPTIONS) {
        return true;
    }
    key.match_indices(KEY_SEPARATOR)
        .any(|(idx, _)| pattern.matches_with(&key[..idx], GLOB_OPTIONS))
}

/// Immediate children of a set of relative keys, sorted by name.
pub fn directory_entries<'a, I>(relative_keys: I) -> Vec<DirectoryEntry>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut children: BTreeMap<&str, bool> = BTreeMap::new();
    for key in relative_keys {
        let (name, below) = match key.split_once(KEY_SEPARATOR) {
            Some((head, tail)) => (head, !tail.is_empty()),
            None => (key, false),
        };
        if name.is_empty() {
            continue;
        }
        *children.entry(name).or_insert(false) |= below;
    }
    children
        .into_iter()
        .map(|(name, is_directory)| DirectoryEntry {
            relative_key: name.to_string(),
            is_directory,
        })
        .collect()
}

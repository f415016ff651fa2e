//! Glob and brace matching over namespace segments
//!
//! Metric paths and queries are dot-delimited. Each segment of a query may use
//! `*`, `?`, `[...]` and `{a,b,c}` alternation (alternations may nest).
//! Matching one segment against directory entries expands the alternations
//! first, then applies a filename glob to every concrete variant.
//!
//! # Example
//!
//! ```rust
//! use kuba_finder::pattern::{expand_braces, match_entries};
//!
//! let mut variants = expand_braces("a{b,{c,d}}e");
//! variants.sort();
//! assert_eq!(variants, vec!["abe", "ace", "ade"]);
//!
//! let entries = vec!["web01".to_string(), "db01".to_string(), "app01".to_string()];
//! let mut hits = match_entries(&entries, "{web,db}01");
//! hits.sort();
//! assert_eq!(hits, vec!["db01", "web01"]);
//! ```

use glob::Pattern;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

lazy_static! {
    /// Innermost brace group: `{` then a run without braces then `}`
    static ref EXPAND_BRACES_RE: Regex = Regex::new(r"\{([^\{\}]*)\}").unwrap();
}

/// Characters that make a query segment a pattern
pub const WILDCARDS: [char; 4] = ['*', '?', '[', '{'];

/// True when `query` contains any wildcard character
pub fn is_pattern(query: &str) -> bool {
    query.chars().any(|c| WILDCARDS.contains(&c))
}

/// True when a wildcard in `segment` is escaped with a backslash
///
/// Only the first occurrence of each wildcard character is inspected, and it
/// must not be the first character of the segment.
pub fn is_escaped_pattern(segment: &str) -> bool {
    WILDCARDS.iter().any(|&symbol| match segment.find(symbol) {
        Some(i) if i > 0 => segment[..i].ends_with('\\'),
        _ => false,
    })
}

/// Indexes of the dot-delimited segments of `pattern` that carry escapes
pub fn escaped_pattern_fields(pattern: &str) -> Vec<usize> {
    pattern
        .split('.')
        .enumerate()
        .filter(|(_, segment)| is_escaped_pattern(segment))
        .map(|(index, _)| index)
        .collect()
}

/// Remove every backslash from `pattern`
pub fn strip_escapes(pattern: &str) -> String {
    pattern.replace('\\', "")
}

/// Expand `{a,b}` alternations into concrete patterns
///
/// The result is de-duplicated and carries no ordering guarantee. Unbalanced
/// braces are left in place; `{}` expands to the empty string.
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let mut expanded = HashSet::new();
    expand_into(pattern, &mut expanded);
    expanded.into_iter().collect()
}

fn expand_into(pattern: &str, out: &mut HashSet<String>) {
    let group = EXPAND_BRACES_RE
        .captures(pattern)
        .and_then(|caps| Some((caps.get(0)?, caps.get(1)?)));

    match group {
        Some((whole, alternatives)) => {
            let prefix = &pattern[..whole.start()];
            let suffix = &pattern[whole.end()..];
            for alternative in alternatives.as_str().split(',') {
                expand_into(&format!("{}{}{}", prefix, alternative, suffix), out);
            }
        },
        None => {
            out.insert(pattern.to_string());
        },
    }
}

/// Match `entries` against `pattern` after brace expansion
///
/// Returns the union of hits over all variants, de-duplicated, in first-seen
/// order.
pub fn match_entries<S: AsRef<str>>(entries: &[S], pattern: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut matching = Vec::new();

    for variant in expand_braces(pattern) {
        let Some(glob) = compile_glob(&variant) else {
            continue;
        };

        for entry in entries {
            let entry = entry.as_ref();
            if glob.matches(entry) && seen.insert(entry) {
                matching.push(entry.to_string());
            }
        }
    }

    matching
}

/// Single-name convenience wrapper around [`match_entries`]
pub fn matches(name: &str, pattern: &str) -> bool {
    !match_entries(&[name], pattern).is_empty()
}

/// Compile one brace-free variant as a filename glob
///
/// Runs of `*` are collapsed since a segment glob has no recursive wildcard.
/// A variant that is not a valid glob is matched literally.
fn compile_glob(variant: &str) -> Option<Pattern> {
    let mut normalized = String::with_capacity(variant.len());
    for c in variant.chars() {
        if c == '*' && normalized.ends_with('*') {
            continue;
        }
        normalized.push(c);
    }

    Pattern::new(&normalized)
        .or_else(|_| Pattern::new(&Pattern::escape(&normalized)))
        .ok()
}

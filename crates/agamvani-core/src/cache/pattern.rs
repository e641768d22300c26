//! Key patterns for cache invalidation.
//!
//! Supported syntax: `*` matches any run of characters (including none),
//! anywhere in the pattern and any number of times. Everything else is
//! literal. Matching is anchored over the whole key, so `a*` matches `abc`
//! but not `xabc`. A pattern without `*` matches exactly one key.

use regex::Regex;

const WILDCARD: char = '*';

#[derive(Debug, Clone)]
pub enum KeyPattern {
    Exact(String),
    Glob(Regex),
}

impl KeyPattern {
    pub fn parse(pattern: &str) -> Self {
        if !pattern.contains(WILDCARD) {
            return KeyPattern::Exact(pattern.to_string());
        }

        let body = pattern
            .split(WILDCARD)
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");

        // Escaped literals joined by `.*` always form a valid expression
        match Regex::new(&format!("^{}$", body)) {
            Ok(re) => KeyPattern::Glob(re),
            Err(_) => KeyPattern::Exact(pattern.to_string()),
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::Exact(exact) => exact == key,
            KeyPattern::Glob(re) => re.is_match(key),
        }
    }
}

//! Contains-pattern matching for repository identifiers
//!
//! Providers that cannot enumerate repositories report depot-style patterns
//! instead: `%` matches any run of characters and `[^/]+` matches one path
//! segment. Everything else is literal. A pattern must match the whole
//! identifier; providers append `%` to turn a path into a prefix.

use permsync_domain::{PermsSyncError, Result};
use regex::Regex;

const MATCH_ALL: &str = "%";
const MATCH_SEGMENT: &str = "[^/]+";

/// Compile a contains pattern into an anchored regular expression.
///
/// # Errors
///
/// Returns `PermsSyncError::InvalidInput` if the translated expression does
/// not compile, which only happens for pathologically large patterns.
pub fn contains_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push_str("^(?:");

    let mut rest = pattern;
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix(MATCH_ALL) {
            expr.push_str(".*");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix(MATCH_SEGMENT) {
            expr.push_str(MATCH_SEGMENT);
            rest = tail;
        } else {
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                expr.push_str(&regex::escape(c.encode_utf8(&mut [0; 4])));
            }
            rest = chars.as_str();
        }
    }

    expr.push_str(")$");
    Regex::new(&expr).map_err(|e| {
        PermsSyncError::InvalidInput(format!("invalid contains pattern {pattern:?}: {e}"))
    })
}

/// A compiled pattern scoped to one code host.
#[derive(Debug, Clone)]
pub struct ContainsMatcher {
    service_id: String,
    regex: Regex,
}

impl ContainsMatcher {
    /// Compile `pattern` for repositories of `service_id`.
    ///
    /// # Errors
    ///
    /// See [`contains_regex`].
    pub fn new(service_id: &str, pattern: &str) -> Result<Self> {
        Ok(Self { service_id: service_id.to_string(), regex: contains_regex(pattern)? })
    }

    /// Whether the repository `external_id` on `service_id` matches.
    pub fn matches(&self, service_id: &str, external_id: &str) -> bool {
        self.service_id == service_id && self.regex.is_match(external_id)
    }
}

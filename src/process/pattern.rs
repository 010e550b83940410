//! Shell-style pattern matching over full store paths.
//!
//! `*` matches any run of characters including `/`, `?` matches one
//! character, `[abc]` / `[a-z]` match a class and `[!abc]` its complement.

use glob::{MatchOptions, Pattern};

use crate::error::{Error, Result};

const PATH_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Whether `pattern` contains any wildcard syntax.
pub fn is_pattern(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

pub fn compile(pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern).map_err(|e| Error::InvalidPath {
        path: pattern.to_string(),
        reason: format!("bad pattern at {}: {}", e.pos, e.msg),
    })
}

/// Match the whole of `path` against a compiled pattern.
pub fn matches(pattern: &Pattern, path: &str) -> bool {
    pattern.matches_with(path, PATH_MATCH)
}

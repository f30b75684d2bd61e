//! Case-insensitive pattern helpers shared by filters and matchers.
//!
//! A pattern that fails to compile does not apply: callers receive `None`
//! and treat the predicate as vacuously satisfied.

use regex_lite::{Regex, RegexBuilder};
use tracing::warn;

/// Compile `pattern` case-insensitively, logging and returning `None` on failure.
pub(crate) fn compile(pattern: &str) -> Option<Regex> {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(pattern = %pattern, "Ignoring invalid filter pattern: {}", e);
            None
        }
    }
}

/// Search `text` for `pattern`. `None` means the pattern is invalid.
pub(crate) fn search(pattern: &str, text: &str) -> Option<bool> {
    compile(pattern).map(|re| re.is_match(text))
}

/// Split a newline-separated pattern list, dropping blank lines.
pub(crate) fn lines(patterns: &str) -> impl Iterator<Item = &str> {
    patterns.lines().map(str::trim).filter(|l| !l.is_empty())
}

//! Word-boundary matching over profile text fields
//!
//! A list's terms compile into one case-insensitive alternation; a profile
//! matches when any term occurs bounded by non-word characters (or a string
//! edge) in its description, handle, or display name. A profile without a
//! description is exempt for that field only.
//!
//! Terms are spliced into the pattern verbatim: a term containing regex
//! metacharacters behaves as a regex fragment. Curated lists may rely on
//! this, so terms are deliberately not escaped.

use regex::Regex;

use crate::types::{Error, Profile, Result};

pub struct WordMatcher {
    re: Regex,
}

impl WordMatcher {
    /// Compile a matcher for a term list. Returns `None` for an empty list
    /// (a matcher that can never fire has no business existing).
    pub fn compile(words: &[String]) -> Result<Option<Self>> {
        if words.is_empty() {
            return Ok(None);
        }
        let pattern = format!("(?i)(?:^|\\W)(?:{})(?:\\W|$)", words.join("|"));
        let re = Regex::new(&pattern)
            .map_err(|e| Error::Config(format!("bad word-list pattern: {}", e)))?;
        Ok(Some(Self { re }))
    }

    /// True iff any term matches the profile's description, handle, or
    /// display name.
    pub fn matches(&self, profile: &Profile) -> bool {
        if let Some(description) = profile.description.as_deref() {
            if self.re.is_match(description) {
                return true;
            }
        }
        if let Some(handle) = profile.handle.as_deref() {
            if self.re.is_match(handle) {
                return true;
            }
        }
        if let Some(name) = profile.display_name.as_deref() {
            if self.re.is_match(name) {
                return true;
            }
        }
        false
    }
}

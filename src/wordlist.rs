//! Word-list and exception-file loading
//!
//! Both formats are plain text, one entry per line, surrounding whitespace
//! stripped, blank lines skipped. A missing file is not an error: it yields
//! an empty list (no matches) or an empty exception set.

use std::collections::HashSet;
use std::path::Path;

use tracing::{info, warn};

use crate::types::Did;

/// Load a word list. Lines are regex fragments (see `matcher`).
pub fn load_words(path: impl AsRef<Path>) -> Vec<String> {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            let words: Vec<String> = raw
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            info!(file = %path.display(), terms = words.len(), "loaded word list");
            words
        }
        Err(_) => {
            warn!(file = %path.display(), "word list missing, treating as empty");
            Vec::new()
        }
    }
}

/// Load an exception file: DIDs that are never listed regardless of rules.
pub fn load_exceptions(path: impl AsRef<Path>) -> HashSet<Did> {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            let dids: HashSet<Did> = raw
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            info!(file = %path.display(), dids = dids.len(), "loaded exceptions");
            dids
        }
        Err(_) => HashSet::new(),
    }
}

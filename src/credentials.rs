//! Account credentials file
//!
//! YAML with two keys: `id` (the account identifier) and `pass` (an
//! app-specific password). Read once at process start and re-read whenever a
//! session has to be re-created, so a rotated password is picked up without
//! a restart.

use std::path::Path;

use serde::Deserialize;

use crate::types::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub id: String,
    pub pass: String,
}

impl Credentials {
    /// Load credentials from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Credentials(format!("cannot read {}: {}", path.display(), e))
        })?;
        let creds: Credentials = serde_yaml::from_str(&raw)
            .map_err(|e| Error::Credentials(format!("cannot parse {}: {}", path.display(), e)))?;
        if creds.id.is_empty() || creds.pass.is_empty() {
            return Err(Error::Credentials(format!(
                "{}: id and pass must both be non-empty",
                path.display()
            )));
        }
        Ok(creds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_id_and_pass() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "id: someone.bsky.social\npass: abcd-efgh-ijkl-mnop").unwrap();
        let creds = Credentials::load(f.path()).unwrap();
        assert_eq!(creds.id, "someone.bsky.social");
        assert_eq!(creds.pass, "abcd-efgh-ijkl-mnop");
    }

    #[test]
    fn empty_fields_are_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "id: someone.bsky.social\npass: \"\"").unwrap();
        assert!(Credentials::load(f.path()).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Credentials::load("/nonexistent/creds.yaml").is_err());
    }
}

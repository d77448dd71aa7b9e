//! Core types shared across the daemon
//!
//! The profile snapshot is the unit of work for the whole pipeline: the
//! resolver writes it to the cache and forwards it, the reconciler
//! classifies it. Wire names are camelCase to stay byte-compatible with
//! the network's profile endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::ApiError;

/// Opaque decentralized identifier of an account. Primary key everywhere.
pub type Did = String;

/// Profile snapshot as stored in the cache and carried on the Listadd queue.
///
/// `cached_at` is stamped by the resolver when the profile is written to the
/// cache; it is never taken from the remote response. Unknown remote fields
/// are dropped on deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub did: Did,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub follows_count: u64,
    #[serde(default)]
    pub followers_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
}

impl Profile {
    /// Stamp the snapshot with the current wall-clock time before a cache
    /// write.
    pub fn stamp(&mut self) {
        self.cached_at = Some(Utc::now());
    }

    /// Whether the account's handle sits under the network's default domain
    /// (i.e. the account has not verified a custom domain handle).
    pub fn has_default_domain_handle(&self, suffix: &str) -> bool {
        self.handle
            .as_deref()
            .map(|h| h.ends_with(suffix))
            .unwrap_or(false)
    }
}

/// Crate-level error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("api error: {0}")]
    Api(#[from] ApiError),

    #[error("cache error: {0}")]
    Cache(#[from] sled::Error),

    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("credentials error: {0}")]
    Credentials(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("list not found: {0}")]
    ListNotFound(String),

    #[error("user not found: {0}")]
    UserNotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_wire_names_are_camel_case() {
        let json = r#"{
            "did": "did:plc:abc",
            "handle": "someone.bsky.social",
            "displayName": "Someone",
            "description": "hi",
            "followsCount": 12,
            "followersCount": 3
        }"#;
        let p: Profile = serde_json::from_str(json).unwrap();
        assert_eq!(p.did, "did:plc:abc");
        assert_eq!(p.display_name.as_deref(), Some("Someone"));
        assert_eq!(p.follows_count, 12);
        assert_eq!(p.followers_count, 3);
        assert!(p.cached_at.is_none());

        let out = serde_json::to_value(&p).unwrap();
        assert!(out.get("displayName").is_some());
        assert!(out.get("cachedAt").is_none());
    }

    #[test]
    fn missing_counts_default_to_zero() {
        let p: Profile = serde_json::from_str(r#"{"did":"did:plc:x"}"#).unwrap();
        assert_eq!(p.follows_count, 0);
        assert_eq!(p.followers_count, 0);
        assert!(p.handle.is_none());
    }

    #[test]
    fn unknown_remote_fields_are_ignored() {
        let p: Profile = serde_json::from_str(
            r#"{"did":"did:plc:x","handle":"a.bsky.social","avatar":"https://cdn/x.jpg","viewer":{}}"#,
        )
        .unwrap();
        assert_eq!(p.handle.as_deref(), Some("a.bsky.social"));
    }

    #[test]
    fn default_domain_handle_predicate() {
        let mut p: Profile = serde_json::from_str(r#"{"did":"did:plc:x"}"#).unwrap();
        assert!(!p.has_default_domain_handle(".bsky.social"));
        p.handle = Some("a.bsky.social".into());
        assert!(p.has_default_domain_handle(".bsky.social"));
        p.handle = Some("journalist.example.com".into());
        assert!(!p.has_default_domain_handle(".bsky.social"));
        // A custom domain that merely ends in the bare words is verified.
        p.handle = Some("notreallybsky.social".into());
        assert!(!p.has_default_domain_handle(".bsky.social"));
    }
}

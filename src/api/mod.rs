//! Remote API facade
//!
//! JSON-over-HTTPS client for the network's profile and list endpoints.
//! Two modes: an authenticated client for writes (list records) and an
//! anonymous client for public reads (profile hydration). Retry policy
//! lives here, not at the call sites.

mod client;
mod session;

pub use client::{ApiClient, ListRef, MemberRef};
pub use session::Session;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::types::Profile;

/// Structured error taxonomy for remote calls.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Write-path token rejected; the caller re-authenticates and retries
    /// once.
    #[error("auth token expired")]
    AuthExpired,

    /// 4xx with the network's structured error body.
    #[error("client error {status}: {code}: {message}")]
    Client {
        status: u16,
        code: String,
        message: String,
    },

    /// 5xx; transient, retried with backoff.
    #[error("server error {status}")]
    Server { status: u16 },

    /// Timeout, DNS failure, connection reset.
    #[error("network error: {0}")]
    Network(String),

    /// A profile batch larger than the endpoint allows.
    #[error("profile batch too large: {0} > 25")]
    BatchTooLarge(usize),
}

/// Largest batch `app.bsky.actor.getProfiles` accepts.
pub const MAX_PROFILE_BATCH: usize = 25;

impl ApiError {
    /// 4xx responses that mean the account itself is gone: the DID should
    /// be dropped from every list and from the cache.
    pub fn is_terminal_account(&self) -> bool {
        match self {
            ApiError::Client { code, message, .. } => {
                code == "AccountDeactivated"
                    || code == "AccountTakedown"
                    || (code == "InvalidRequest" && message.contains("Profile not found"))
            }
            _ => false,
        }
    }

    /// Errors worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Server { .. } | ApiError::Network(_))
    }
}

/// Seam between the list registry and the remote write path. The production
/// implementation is [`ApiClient`]; tests substitute a recorder.
#[async_trait]
pub trait ListWriter: Send + Sync {
    /// Create a membership record; returns the record URI.
    async fn create_member(&self, list_uri: &str, did: &str) -> Result<String, ApiError>;

    /// Delete a membership record by rkey.
    async fn delete_member(&self, rkey: &str) -> Result<(), ApiError>;
}

/// Seam between the resolver and the remote read path, mirroring
/// [`ListWriter`] on the write side.
#[async_trait]
pub trait ProfileReader: Send + Sync {
    /// Fetch a single profile; `actor` may be a DID or a handle.
    async fn get_profile(&self, actor: &str) -> Result<Profile, ApiError>;

    /// Fetch up to 25 profiles in one call. The batch must already be
    /// de-duplicated; the size bound is enforced by the implementation.
    async fn get_profiles(&self, dids: &[String]) -> Result<Vec<Profile>, ApiError>;
}

/// The full remote surface a resolver worker needs: batched reads plus the
/// write path for terminal-account cleanup.
pub trait ProfileApi: ProfileReader + ListWriter {}

impl<T: ProfileReader + ListWriter> ProfileApi for T {}

/// Record key of a record URI: the final path segment.
pub fn rkey_from_uri(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}

/// Run an operation, retrying transient failures with capped exponential
/// backoff. Non-transient errors propagate immediately.
pub async fn retry<T, F, Fut>(what: &str, attempts: u32, mut op: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut delay = Duration::from_millis(500);
    let max_delay = Duration::from_secs(30);

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!(what, attempt, error = %e, "transient failure, backing off {:?}", delay);
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(max_delay);
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("retry loop always returns")
}

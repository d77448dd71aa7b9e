//! Session establishment against the authenticated API host

use serde::Deserialize;

use super::ApiError;
use crate::credentials::Credentials;

/// An authenticated session: the tokens plus the account's own DID, which
/// is the repo every list record is written into.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub did: String,
    pub handle: String,
    pub access_jwt: String,
    pub refresh_jwt: String,
}

/// Create a session from the credentials file's identifier and app password.
pub async fn create_session(
    http: &reqwest::Client,
    host: &str,
    creds: &Credentials,
) -> Result<Session, ApiError> {
    let url = format!("https://{}/xrpc/com.atproto.server.createSession", host);
    let resp = http
        .post(&url)
        .json(&serde_json::json!({
            "identifier": creds.id,
            "password": creds.pass,
        }))
        .send()
        .await
        .map_err(|e| ApiError::Network(e.to_string()))?;

    let resp = super::client::check_status(resp).await?;
    resp.json::<Session>()
        .await
        .map_err(|e| ApiError::Network(e.to_string()))
}

/// Exchange the refresh token for a new session.
pub async fn refresh_session(
    http: &reqwest::Client,
    host: &str,
    refresh_jwt: &str,
) -> Result<Session, ApiError> {
    let url = format!("https://{}/xrpc/com.atproto.server.refreshSession", host);
    let resp = http
        .post(&url)
        .bearer_auth(refresh_jwt)
        .send()
        .await
        .map_err(|e| ApiError::Network(e.to_string()))?;

    let resp = super::client::check_status(resp).await?;
    resp.json::<Session>()
        .await
        .map_err(|e| ApiError::Network(e.to_string()))
}

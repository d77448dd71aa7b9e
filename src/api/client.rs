//! XRPC client for the network's profile and list endpoints
//!
//! Reads (profile hydration) go unauthenticated to the public API host;
//! writes (list records) carry the session token against the authenticated
//! host. On a rejected token the client re-establishes its session and
//! retries the call once; anything else is classified and handed back to
//! the caller's retry policy.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::session::{create_session, refresh_session, Session};
use super::{ApiError, ListWriter, ProfileReader, MAX_PROFILE_BATCH};
use crate::credentials::Credentials;
use crate::types::Profile;

const LIST_COLLECTION: &str = "app.bsky.graph.list";
const LISTITEM_COLLECTION: &str = "app.bsky.graph.listitem";
const MODLIST_PURPOSE: &str = "app.bsky.graph.defs#modlist";
const PAGE_LIMIT: u32 = 100;

/// A list as returned by `app.bsky.graph.getLists`.
#[derive(Debug, Clone, Deserialize)]
pub struct ListRef {
    pub uri: String,
    pub name: String,
}

/// A membership as returned by `app.bsky.graph.getList`: the member's DID
/// and the URI of the membership record (whose rkey deletes it).
#[derive(Debug, Clone)]
pub struct MemberRef {
    pub did: String,
    pub uri: String,
}

pub struct ApiClient {
    http: reqwest::Client,
    auth_host: String,
    public_host: String,
    credentials_path: PathBuf,
    session: RwLock<Session>,
}

impl ApiClient {
    /// Build a client and establish a session from the credentials file.
    pub async fn login(
        auth_host: &str,
        public_host: &str,
        credentials_path: impl Into<PathBuf>,
    ) -> Result<Self, ApiError> {
        let credentials_path = credentials_path.into();
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent(concat!("warden/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let creds = load_credentials(&credentials_path)?;
        let session = create_session(&http, auth_host, &creds).await?;
        info!(did = %session.did, handle = %session.handle, "session established");

        Ok(Self {
            http,
            auth_host: auth_host.to_string(),
            public_host: public_host.to_string(),
            credentials_path,
            session: RwLock::new(session),
        })
    }

    /// The session account's DID: the repo all list records live in.
    pub async fn session_did(&self) -> String {
        self.session.read().await.did.clone()
    }

    /// Re-establish the session: refresh token first, full login from the
    /// (re-read) credentials file if the refresh itself is rejected.
    async fn reauthenticate(&self) -> Result<(), ApiError> {
        let refresh_jwt = self.session.read().await.refresh_jwt.clone();
        let session = match refresh_session(&self.http, &self.auth_host, &refresh_jwt).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, "refresh failed, re-creating session from credentials");
                let creds = load_credentials(&self.credentials_path)?;
                create_session(&self.http, &self.auth_host, &creds).await?
            }
        };
        info!(did = %session.did, "session refreshed");
        *self.session.write().await = session;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Authenticated operations (auth host)
    // ------------------------------------------------------------------

    /// All lists owned by the session account.
    pub async fn list_my_lists(&self) -> Result<Vec<ListRef>, ApiError> {
        self.with_reauth(|| self.list_my_lists_once()).await
    }

    async fn list_my_lists_once(&self) -> Result<Vec<ListRef>, ApiError> {
        #[derive(Deserialize)]
        struct Page {
            cursor: Option<String>,
            lists: Vec<ListRef>,
        }

        let actor = self.session_did().await;
        let url = format!("https://{}/xrpc/app.bsky.graph.getLists", self.auth_host);
        let mut lists = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut req = self
                .authed(self.http.get(&url))
                .await
                .query(&[("actor", actor.as_str())])
                .query(&[("limit", PAGE_LIMIT)]);
            if let Some(ref c) = cursor {
                req = req.query(&[("cursor", c.as_str())]);
            }
            let resp = req.send().await.map_err(classify_reqwest)?;
            let resp = check_status(resp).await?;
            let page: Page = resp.json().await.map_err(classify_reqwest)?;
            lists.extend(page.lists);
            match page.cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }
        Ok(lists)
    }

    /// Every membership of a list, materialized across pages.
    pub async fn list_members(&self, list_uri: &str) -> Result<Vec<MemberRef>, ApiError> {
        self.with_reauth(|| self.list_members_once(list_uri)).await
    }

    async fn list_members_once(&self, list_uri: &str) -> Result<Vec<MemberRef>, ApiError> {
        #[derive(Deserialize)]
        struct Subject {
            did: String,
        }
        #[derive(Deserialize)]
        struct Item {
            uri: String,
            subject: Subject,
        }
        #[derive(Deserialize)]
        struct Page {
            cursor: Option<String>,
            items: Vec<Item>,
        }

        let url = format!("https://{}/xrpc/app.bsky.graph.getList", self.auth_host);
        let mut members = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut req = self
                .authed(self.http.get(&url))
                .await
                .query(&[("list", list_uri)])
                .query(&[("limit", PAGE_LIMIT)]);
            if let Some(ref c) = cursor {
                req = req.query(&[("cursor", c.as_str())]);
            }
            let resp = req.send().await.map_err(classify_reqwest)?;
            let resp = check_status(resp).await?;
            let page: Page = resp.json().await.map_err(classify_reqwest)?;
            members.extend(page.items.into_iter().map(|i| MemberRef {
                did: i.subject.did,
                uri: i.uri,
            }));
            match page.cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }
        Ok(members)
    }

    /// Create a moderation list record; returns its URI.
    pub async fn create_list(&self, name: &str, description: &str) -> Result<String, ApiError> {
        self.with_reauth(|| self.create_list_once(name, description))
            .await
    }

    async fn create_list_once(&self, name: &str, description: &str) -> Result<String, ApiError> {
        let record = json!({
            "$type": LIST_COLLECTION,
            "purpose": MODLIST_PURPOSE,
            "name": name,
            "description": description,
            "createdAt": iso_now(),
        });
        self.create_record(LIST_COLLECTION, record).await
    }

    /// Delete a list record itself (not a membership) by rkey.
    pub async fn delete_list(&self, rkey: &str) -> Result<(), ApiError> {
        self.with_reauth(|| self.delete_record(LIST_COLLECTION, rkey))
            .await
    }

    async fn create_member_once(&self, list_uri: &str, did: &str) -> Result<String, ApiError> {
        let record = json!({
            "$type": LISTITEM_COLLECTION,
            "subject": did,
            "list": list_uri,
            "createdAt": iso_now(),
        });
        self.create_record(LISTITEM_COLLECTION, record).await
    }

    async fn create_record(
        &self,
        collection: &str,
        record: serde_json::Value,
    ) -> Result<String, ApiError> {
        #[derive(Deserialize)]
        struct Created {
            uri: String,
        }

        let url = format!(
            "https://{}/xrpc/com.atproto.repo.createRecord",
            self.auth_host
        );
        let body = json!({
            "repo": self.session_did().await,
            "collection": collection,
            "record": record,
        });
        let resp = self
            .authed(self.http.post(&url))
            .await
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest)?;
        let resp = check_status(resp).await?;
        let created: Created = resp.json().await.map_err(classify_reqwest)?;
        Ok(created.uri)
    }

    async fn delete_record(&self, collection: &str, rkey: &str) -> Result<(), ApiError> {
        let url = format!(
            "https://{}/xrpc/com.atproto.repo.deleteRecord",
            self.auth_host
        );
        let body = json!({
            "repo": self.session_did().await,
            "collection": collection,
            "rkey": rkey,
        });
        let resp = self
            .authed(self.http.post(&url))
            .await
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest)?;
        check_status(resp).await?;
        Ok(())
    }

    async fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let token = self.session.read().await.access_jwt.clone();
        req.bearer_auth(token)
    }

    /// Run an authenticated call; on a rejected token, re-authenticate and
    /// retry exactly once.
    async fn with_reauth<T, F, Fut>(&self, mut op: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ApiError>>,
    {
        match op().await {
            Err(ApiError::AuthExpired) => {
                self.reauthenticate().await?;
                op().await
            }
            other => other,
        }
    }
}

/// Public reads go anonymously to the public API host.
#[async_trait]
impl ProfileReader for ApiClient {
    async fn get_profile(&self, actor: &str) -> Result<Profile, ApiError> {
        let url = format!(
            "https://{}/xrpc/app.bsky.actor.getProfile",
            self.public_host
        );
        let resp = self
            .http
            .get(&url)
            .query(&[("actor", actor)])
            .send()
            .await
            .map_err(classify_reqwest)?;
        let resp = check_status(resp).await?;
        resp.json::<Profile>().await.map_err(classify_reqwest)
    }

    async fn get_profiles(&self, dids: &[String]) -> Result<Vec<Profile>, ApiError> {
        if dids.len() > MAX_PROFILE_BATCH {
            return Err(ApiError::BatchTooLarge(dids.len()));
        }

        #[derive(Deserialize)]
        struct Profiles {
            profiles: Vec<Profile>,
        }

        let url = format!(
            "https://{}/xrpc/app.bsky.actor.getProfiles",
            self.public_host
        );
        let query: Vec<(&str, &str)> = dids.iter().map(|d| ("actors", d.as_str())).collect();
        let resp = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(classify_reqwest)?;
        let resp = check_status(resp).await?;
        let body: Profiles = resp.json().await.map_err(classify_reqwest)?;
        Ok(body.profiles)
    }
}

#[async_trait]
impl ListWriter for ApiClient {
    async fn create_member(&self, list_uri: &str, did: &str) -> Result<String, ApiError> {
        self.with_reauth(|| self.create_member_once(list_uri, did))
            .await
    }

    async fn delete_member(&self, rkey: &str) -> Result<(), ApiError> {
        self.with_reauth(|| self.delete_record(LISTITEM_COLLECTION, rkey))
            .await
    }
}

fn iso_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn load_credentials(path: &std::path::Path) -> Result<Credentials, ApiError> {
    Credentials::load(path).map_err(|e| ApiError::Network(e.to_string()))
}

fn classify_reqwest(e: reqwest::Error) -> ApiError {
    ApiError::Network(e.to_string())
}

/// Map a response onto the error taxonomy. Success passes through; 5xx is
/// transient; 4xx is decoded into the network's `{error, message}` body,
/// with `ExpiredToken` singled out for the re-auth path.
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    #[derive(Default, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        error: String,
        #[serde(default)]
        message: String,
    }

    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status.is_server_error() {
        return Err(ApiError::Server {
            status: status.as_u16(),
        });
    }

    let body: ErrorBody = resp.json().await.unwrap_or_default();
    if body.error == "ExpiredToken" {
        return Err(ApiError::AuthExpired);
    }
    Err(ApiError::Client {
        status: status.as_u16(),
        code: body.error,
        message: body.message,
    })
}

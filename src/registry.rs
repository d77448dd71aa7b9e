//! List registry
//!
//! The in-memory authoritative mirror of remote list memberships. Each list
//! pairs an immutable spec (name, rule, threshold, word/exception files)
//! with runtime state (remote URI, did → rkey entries, exception set)
//! behind its own mutex, so mutations on one list serialize without
//! blocking the others.
//!
//! All adds and removes are idempotent against local state: the remote is
//! only touched when the membership actually changes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::info;

use crate::api::{rkey_from_uri, ApiError, ListWriter};
use crate::matcher::WordMatcher;
use crate::types::Did;

/// Which classification rule drives a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// follows-count threshold
    Follows,
    /// follows-count threshold, default-domain handles only
    FollowsUnverified,
    /// followers-count threshold
    Followers,
    /// word-list match over profile text
    Words,
}

/// Static list descriptor. The shipped catalog lives in
/// [`default_catalog`]; file names resolve relative to the data directory.
#[derive(Debug, Clone)]
pub struct ListSpec {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub kind: RuleKind,
    pub threshold: Option<u64>,
    pub word_file: Option<&'static str>,
    pub exception_file: Option<&'static str>,
}

/// Runtime state mirroring the remote list.
#[derive(Debug, Default)]
pub struct ListState {
    pub uri: String,
    pub entries: HashMap<Did, String>,
    pub exceptions: HashSet<Did>,
}

/// One moderation list: spec, compiled matcher (word lists only), state.
pub struct ModList {
    pub spec: ListSpec,
    pub matcher: Option<WordMatcher>,
    state: Mutex<ListState>,
}

impl ModList {
    pub fn new(spec: ListSpec, matcher: Option<WordMatcher>, state: ListState) -> Self {
        Self {
            spec,
            matcher,
            state: Mutex::new(state),
        }
    }

    pub async fn uri(&self) -> String {
        self.state.lock().await.uri.clone()
    }

    pub async fn contains(&self, did: &str) -> bool {
        self.state.lock().await.entries.contains_key(did)
    }

    pub async fn is_exception(&self, did: &str) -> bool {
        self.state.lock().await.exceptions.contains(did)
    }

    pub async fn member_count(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// DIDs currently mirrored as members.
    pub async fn member_dids(&self) -> Vec<Did> {
        self.state.lock().await.entries.keys().cloned().collect()
    }

    /// Ensure the DID is a member. No-op when already present; otherwise
    /// creates the remote record and mirrors it. The state lock is held
    /// across the remote call so per-list mutation serializes.
    pub async fn add(&self, api: &dyn ListWriter, did: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;
        if state.entries.contains_key(did) {
            return Ok(());
        }
        let entry_uri = api.create_member(&state.uri, did).await?;
        let rkey = rkey_from_uri(&entry_uri).to_string();
        state.entries.insert(did.to_string(), rkey);
        info!(list = self.spec.key, did, "added to list");
        Ok(())
    }

    /// Ensure the DID is not a member. No-op when absent; otherwise deletes
    /// the remote record by its stored rkey and drops the mirror entry.
    pub async fn remove(&self, api: &dyn ListWriter, did: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;
        let Some(rkey) = state.entries.get(did).cloned() else {
            return Ok(());
        };
        api.delete_member(&rkey).await?;
        state.entries.remove(did);
        info!(list = self.spec.key, did, "removed from list");
        Ok(())
    }
}

/// Registry of every list, keyed by list key.
pub struct ListRegistry {
    lists: DashMap<&'static str, Arc<ModList>>,
}

impl ListRegistry {
    pub fn new() -> Self {
        Self {
            lists: DashMap::new(),
        }
    }

    pub fn insert(&self, list: ModList) {
        self.lists.insert(list.spec.key, Arc::new(list));
    }

    pub fn get(&self, key: &str) -> Option<Arc<ModList>> {
        self.lists.get(key).map(|l| Arc::clone(&l))
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    /// Lists of one rule kind, ascending by threshold (word lists keep
    /// catalog-key order, which is stable enough for logging).
    pub fn lists_of_kind(&self, kind: RuleKind) -> Vec<Arc<ModList>> {
        let mut lists: Vec<Arc<ModList>> = self
            .lists
            .iter()
            .filter(|e| e.value().spec.kind == kind)
            .map(|e| Arc::clone(e.value()))
            .collect();
        lists.sort_by_key(|l| (l.spec.threshold.unwrap_or(0), l.spec.key));
        lists
    }

    /// Every list, for iteration that does not care about rule kind.
    pub fn all(&self) -> Vec<Arc<ModList>> {
        let mut lists: Vec<Arc<ModList>> = self.lists.iter().map(|e| Arc::clone(e.value())).collect();
        lists.sort_by_key(|l| l.spec.key);
        lists
    }

    /// Remove a DID from every list it appears in.
    pub async fn remove_from_all(&self, api: &dyn ListWriter, did: &str) -> Result<(), ApiError> {
        for list in self.all() {
            list.remove(api, did).await?;
        }
        Ok(())
    }

    /// Union of every list's member DIDs, for bootstrap re-evaluation.
    pub async fn seed_dids(&self) -> Vec<Did> {
        let mut seen = HashSet::new();
        let mut dids = Vec::new();
        for list in self.all() {
            for did in list.member_dids().await {
                if seen.insert(did.clone()) {
                    dids.push(did);
                }
            }
        }
        dids
    }
}

impl Default for ListRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The shipped list catalog.
pub fn default_catalog() -> Vec<ListSpec> {
    fn follows(key: &'static str, name: &'static str, threshold: u64) -> ListSpec {
        ListSpec {
            key,
            name,
            description: "Accounts following an unusually large number of others",
            kind: RuleKind::Follows,
            threshold: Some(threshold),
            word_file: None,
            exception_file: Some("follows_exceptions.txt"),
        }
    }

    fn unverified(key: &'static str, name: &'static str, threshold: u64) -> ListSpec {
        ListSpec {
            key,
            name,
            description: "Unverified-handle accounts following an unusually large number of others",
            kind: RuleKind::FollowsUnverified,
            threshold: Some(threshold),
            word_file: None,
            exception_file: Some("follows_exceptions.txt"),
        }
    }

    fn words(
        key: &'static str,
        name: &'static str,
        description: &'static str,
        file: &'static str,
        exception_file: &'static str,
    ) -> ListSpec {
        ListSpec {
            key,
            name,
            description,
            kind: RuleKind::Words,
            threshold: None,
            word_file: Some(file),
            exception_file: Some(exception_file),
        }
    }

    vec![
        follows("over5k", "Following 5k+", 5_000),
        follows("over7k", "Following 7k+", 7_000),
        follows("over10k", "Following 10k+", 10_000),
        follows("over20k", "Following 20k+", 20_000),
        follows("over50k", "Following 50k+", 50_000),
        follows("over100k", "Following 100k+", 100_000),
        unverified("unverified5k", "Unverified Following 5k+", 5_000),
        unverified("unverified10k", "Unverified Following 10k+", 10_000),
        ListSpec {
            key: "followersover100k",
            name: "100k+ Followers",
            description: "Accounts with an unusually large follower count",
            kind: RuleKind::Followers,
            threshold: Some(100_000),
            word_file: None,
            exception_file: Some("followers_exceptions.txt"),
        },
        words(
            "mw",
            "MAGA Words",
            "Profiles matching curated MAGA terms",
            "maga_words.txt",
            "mw_exceptions.txt",
        ),
        words(
            "hate",
            "Hate Words",
            "Profiles matching curated hate terms",
            "hate_words.txt",
            "hate_exceptions.txt",
        ),
        words(
            "porn",
            "Porn Words",
            "Profiles matching curated porn terms",
            "porn_words.txt",
            "porn_exceptions.txt",
        ),
    ]
}

#[cfg(test)]
pub(crate) mod test_support {
    //! A recording [`ListWriter`] used by registry and pipeline tests.

    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum RemoteCall {
        Create { list_uri: String, did: String },
        Delete { rkey: String },
    }

    #[derive(Default)]
    pub struct RecordingWriter {
        pub calls: StdMutex<Vec<RemoteCall>>,
        next_rkey: AtomicU64,
        pub fail_with: StdMutex<Option<fn() -> ApiError>>,
    }

    impl RecordingWriter {
        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn calls(&self) -> Vec<RemoteCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl ListWriter for RecordingWriter {
        async fn create_member(&self, list_uri: &str, did: &str) -> Result<String, ApiError> {
            if let Some(f) = *self.fail_with.lock().unwrap() {
                return Err(f());
            }
            self.calls.lock().unwrap().push(RemoteCall::Create {
                list_uri: list_uri.to_string(),
                did: did.to_string(),
            });
            let n = self.next_rkey.fetch_add(1, Ordering::SeqCst);
            Ok(format!(
                "at://did:plc:owner/app.bsky.graph.listitem/rkey{}",
                n
            ))
        }

        async fn delete_member(&self, rkey: &str) -> Result<(), ApiError> {
            if let Some(f) = *self.fail_with.lock().unwrap() {
                return Err(f());
            }
            self.calls.lock().unwrap().push(RemoteCall::Delete {
                rkey: rkey.to_string(),
            });
            Ok(())
        }
    }

    pub fn list_with_entries(spec: ListSpec, entries: &[(&str, &str)]) -> ModList {
        let state = ListState {
            uri: format!("at://did:plc:owner/app.bsky.graph.list/{}", spec.key),
            entries: entries
                .iter()
                .map(|(d, r)| (d.to_string(), r.to_string()))
                .collect(),
            exceptions: HashSet::new(),
        };
        ModList::new(spec, None, state)
    }

    pub fn follows_spec(key: &'static str, threshold: u64) -> ListSpec {
        ListSpec {
            key,
            name: key,
            description: "",
            kind: RuleKind::Follows,
            threshold: Some(threshold),
            word_file: None,
            exception_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn add_creates_once_and_mirrors_rkey() {
        let writer = RecordingWriter::default();
        let list = list_with_entries(follows_spec("over5k", 5_000), &[]);

        list.add(&writer, "did:plc:a").await.unwrap();
        assert!(list.contains("did:plc:a").await);
        assert_eq!(writer.call_count(), 1);

        // Second add is a local no-op: at most one membership per (list, DID).
        list.add(&writer, "did:plc:a").await.unwrap();
        assert_eq!(writer.call_count(), 1);
    }

    #[tokio::test]
    async fn remove_deletes_stored_rkey() {
        let writer = RecordingWriter::default();
        let list = list_with_entries(follows_spec("over5k", 5_000), &[("did:plc:a", "rkey77")]);

        list.remove(&writer, "did:plc:a").await.unwrap();
        assert!(!list.contains("did:plc:a").await);
        assert_eq!(
            writer.calls(),
            vec![RemoteCall::Delete {
                rkey: "rkey77".into()
            }]
        );

        // Removing again touches nothing.
        list.remove(&writer, "did:plc:a").await.unwrap();
        assert_eq!(writer.call_count(), 1);
    }

    #[tokio::test]
    async fn failed_remote_add_leaves_mirror_unchanged() {
        let writer = RecordingWriter::default();
        *writer.fail_with.lock().unwrap() = Some(|| ApiError::Server { status: 503 });
        let list = list_with_entries(follows_spec("over5k", 5_000), &[]);

        assert!(list.add(&writer, "did:plc:a").await.is_err());
        assert!(!list.contains("did:plc:a").await);
    }

    #[tokio::test]
    async fn remove_from_all_sweeps_every_list() {
        let writer = RecordingWriter::default();
        let registry = ListRegistry::new();
        registry.insert(list_with_entries(
            follows_spec("over5k", 5_000),
            &[("did:plc:a", "r1")],
        ));
        registry.insert(list_with_entries(
            follows_spec("over10k", 10_000),
            &[("did:plc:a", "r2"), ("did:plc:b", "r3")],
        ));

        registry.remove_from_all(&writer, "did:plc:a").await.unwrap();
        assert_eq!(writer.call_count(), 2);
        assert!(!registry.get("over5k").unwrap().contains("did:plc:a").await);
        assert!(!registry.get("over10k").unwrap().contains("did:plc:a").await);
        assert!(registry.get("over10k").unwrap().contains("did:plc:b").await);
    }

    #[tokio::test]
    async fn lists_of_kind_sorts_by_threshold() {
        let registry = ListRegistry::new();
        registry.insert(list_with_entries(follows_spec("over10k", 10_000), &[]));
        registry.insert(list_with_entries(follows_spec("over5k", 5_000), &[]));
        registry.insert(list_with_entries(follows_spec("over100k", 100_000), &[]));

        let keys: Vec<&str> = registry
            .lists_of_kind(RuleKind::Follows)
            .iter()
            .map(|l| l.spec.key)
            .collect();
        assert_eq!(keys, vec!["over5k", "over10k", "over100k"]);
    }

    #[tokio::test]
    async fn seed_dids_unions_without_duplicates() {
        let registry = ListRegistry::new();
        registry.insert(list_with_entries(
            follows_spec("over5k", 5_000),
            &[("did:plc:a", "r1"), ("did:plc:b", "r2")],
        ));
        registry.insert(list_with_entries(
            follows_spec("over10k", 10_000),
            &[("did:plc:b", "r3"), ("did:plc:c", "r4")],
        ));

        let mut dids = registry.seed_dids().await;
        dids.sort();
        assert_eq!(dids, vec!["did:plc:a", "did:plc:b", "did:plc:c"]);
    }

    #[test]
    fn catalog_covers_every_rule_kind() {
        let catalog = default_catalog();
        assert!(catalog.iter().any(|s| s.kind == RuleKind::Follows));
        assert!(catalog.iter().any(|s| s.kind == RuleKind::FollowsUnverified));
        assert!(catalog.iter().any(|s| s.kind == RuleKind::Followers));
        assert!(catalog.iter().any(|s| s.kind == RuleKind::Words));
        // Keys are unique.
        let mut keys: Vec<&str> = catalog.iter().map(|s| s.key).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), catalog.len());
    }
}

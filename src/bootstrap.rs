//! Startup reconciliation
//!
//! Brings the in-memory registry in line with the network's authoritative
//! state: find or create each catalog list by name, materialize its
//! memberships, load its exception file, and compile its word matcher.
//! Then the Schedule queue is seeded with every known member (forcing
//! re-evaluation of accounts that may no longer qualify) and, on request,
//! with every cached DID.

use std::collections::HashMap;
use std::path::Path;

use futures_util::future::try_join_all;
use tracing::info;

use crate::api::{rkey_from_uri, ApiClient};
use crate::cache::ProfileCache;
use crate::matcher::WordMatcher;
use crate::queue::WorkQueue;
use crate::registry::{ListRegistry, ListSpec, ListState, ModList};
use crate::types::{Did, Result};
use crate::wordlist;

/// Build the registry from the remote side and the on-disk word/exception
/// files. Lists are prepared concurrently.
pub async fn bootstrap_registry(
    api: &ApiClient,
    data_dir: &Path,
    catalog: Vec<ListSpec>,
) -> Result<ListRegistry> {
    let existing: HashMap<String, String> = api
        .list_my_lists()
        .await?
        .into_iter()
        .map(|l| (l.name, l.uri))
        .collect();
    info!(existing = existing.len(), "fetched remote lists");

    let lists = try_join_all(
        catalog
            .into_iter()
            .map(|spec| build_list(api, data_dir, &existing, spec)),
    )
    .await?;

    let registry = ListRegistry::new();
    for list in lists {
        registry.insert(list);
    }
    Ok(registry)
}

async fn build_list(
    api: &ApiClient,
    data_dir: &Path,
    existing: &HashMap<String, String>,
    spec: ListSpec,
) -> Result<ModList> {
    let uri = match existing.get(spec.name) {
        Some(uri) => uri.clone(),
        None => {
            info!(list = spec.key, name = spec.name, "creating remote list");
            api.create_list(spec.name, spec.description).await?
        }
    };

    let members = api.list_members(&uri).await?;
    let entries: HashMap<Did, String> = members
        .into_iter()
        .map(|m| (m.did, rkey_from_uri(&m.uri).to_string()))
        .collect();

    let exceptions = spec
        .exception_file
        .map(|f| wordlist::load_exceptions(data_dir.join(f)))
        .unwrap_or_default();

    let matcher = match spec.word_file {
        Some(f) => WordMatcher::compile(&wordlist::load_words(data_dir.join(f)))?,
        None => None,
    };

    info!(
        list = spec.key,
        members = entries.len(),
        exceptions = exceptions.len(),
        "list ready"
    );

    Ok(ModList::new(
        spec,
        matcher,
        ListState {
            uri,
            entries,
            exceptions,
        },
    ))
}

/// Seed the Schedule queue: every current list member, then (optionally)
/// every cached DID.
pub async fn seed_schedule(
    registry: &ListRegistry,
    cache: &ProfileCache,
    schedule: &WorkQueue<Did>,
    rescan_cache: bool,
) {
    let members = registry.seed_dids().await;
    let seeded = members.len();
    schedule.push_all(members);
    info!(seeded, "seeded schedule queue from list members");

    if rescan_cache {
        let mut rescanned = 0usize;
        for did in cache.scan() {
            schedule.push(did);
            rescanned += 1;
        }
        info!(rescanned, "seeded schedule queue from cache");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::test_support::{follows_spec, list_with_entries};
    use crate::types::Profile;

    #[tokio::test]
    async fn seeding_pushes_members_then_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ProfileCache::open(dir.path().join("cache.db"), 1, true).unwrap();
        let profile = Profile {
            did: "did:plc:cached".into(),
            handle: Some("c.bsky.social".into()),
            display_name: None,
            description: None,
            follows_count: 0,
            followers_count: 0,
            cached_at: None,
        };
        cache.put("did:plc:cached", &profile).unwrap();

        let registry = ListRegistry::new();
        registry.insert(list_with_entries(
            follows_spec("over5k", 5_000),
            &[("did:plc:member", "r1")],
        ));

        let schedule: WorkQueue<Did> = WorkQueue::new("schedule");
        seed_schedule(&registry, &cache, &schedule, true).await;

        let mut dids = schedule.drain();
        dids.sort();
        assert_eq!(dids, vec!["did:plc:cached", "did:plc:member"]);
    }

    #[tokio::test]
    async fn seeding_without_rescan_skips_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ProfileCache::open(dir.path().join("cache.db"), 1, true).unwrap();
        let profile = Profile {
            did: "did:plc:cached".into(),
            handle: None,
            display_name: None,
            description: None,
            follows_count: 0,
            followers_count: 0,
            cached_at: None,
        };
        cache.put("did:plc:cached", &profile).unwrap();

        let registry = ListRegistry::new();
        let schedule: WorkQueue<Did> = WorkQueue::new("schedule");
        seed_schedule(&registry, &cache, &schedule, false).await;
        assert!(schedule.is_empty());
    }
}

//! Resolver stage
//!
//! Drains the Query queue in batches of up to 25 unique DIDs, hydrates them
//! through the batched profile endpoint, writes the snapshots to the cache
//! (stamping `cachedAt`), and forwards them to the reconcilers.
//!
//! A DID the batch endpoint silently omits is probed individually so that
//! terminal-account responses (deactivated, taken down, not found) surface
//! per DID; those accounts are purged from every list and from the cache.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::PipelineContext;
use crate::api::{retry, ListWriter, ProfileApi, MAX_PROFILE_BATCH};
use crate::types::{Did, Result};

const BATCH_RETRIES: u32 = 5;

pub async fn resolver_worker<A: ProfileApi>(
    ctx: Arc<PipelineContext>,
    api: Arc<A>,
    id: usize,
    cancel: CancellationToken,
) -> Result<()> {
    info!(worker = id, "resolver started");
    while let Some(first) = ctx.query.pop(&cancel).await {
        let batch = collect_batch(&ctx, first);
        if batch.is_empty() {
            continue;
        }
        resolve_batch(&ctx, api.as_ref(), &batch).await?;
    }
    info!(worker = id, "resolver stopped");
    Ok(())
}

/// Starting from one blocking pop, drain the Query queue non-blockingly up
/// to the batch cap. Duplicates are folded and every DID is re-checked
/// against the cache: a sibling resolver may have populated it since it was
/// enqueued, in which case the profile skips straight to the Listadd queue.
pub fn collect_batch(ctx: &PipelineContext, first: Did) -> Vec<Did> {
    let mut seen: HashSet<Did> = HashSet::new();
    let mut batch: Vec<Did> = Vec::new();

    consider(ctx, &mut seen, &mut batch, first);
    while batch.len() < MAX_PROFILE_BATCH {
        match ctx.query.try_pop() {
            Some(did) => consider(ctx, &mut seen, &mut batch, did),
            None => break,
        }
    }
    batch
}

fn consider(ctx: &PipelineContext, seen: &mut HashSet<Did>, batch: &mut Vec<Did>, did: Did) {
    if !seen.insert(did.clone()) {
        return;
    }
    match ctx.cache.skip_fetch(&did) {
        Some(profile) => ctx.listadd.push(profile),
        None => batch.push(did),
    }
}

async fn resolve_batch<A: ProfileApi>(
    ctx: &PipelineContext,
    api: &A,
    batch: &[Did],
) -> Result<()> {
    match retry("getProfiles", BATCH_RETRIES, || api.get_profiles(batch)).await {
        Ok(profiles) => {
            let returned: HashSet<Did> = profiles.iter().map(|p| p.did.clone()).collect();
            for mut profile in profiles {
                profile.stamp();
                ctx.cache.put(&profile.did, &profile)?;
                ctx.listadd.push(profile);
            }
            for did in batch.iter().filter(|d| !returned.contains(*d)) {
                probe_missing(ctx, api, did).await?;
            }
            Ok(())
        }
        Err(e) if e.is_terminal_account() => {
            // The batch endpoint rejected the whole call over one account;
            // probe each member to find out which.
            warn!(error = %e, "terminal-account error on batch, probing members");
            for did in batch {
                probe_missing(ctx, api, did).await?;
            }
            Ok(())
        }
        Err(e) => {
            error!(error = %e, size = batch.len(), "profile batch failed, dropping");
            Ok(())
        }
    }
}

/// Resolve one DID individually after the batch endpoint left it out.
async fn probe_missing<A: ProfileApi>(ctx: &PipelineContext, api: &A, did: &str) -> Result<()> {
    match api.get_profile(did).await {
        Ok(mut profile) => {
            profile.stamp();
            ctx.cache.put(did, &profile)?;
            ctx.listadd.push(profile);
        }
        Err(e) if e.is_terminal_account() => {
            info!(did, reason = %e, "account gone, purging");
            purge_account(ctx, api, did).await;
        }
        Err(e) => {
            warn!(did, error = %e, "probe failed, will retry on next observation");
        }
    }
    Ok(())
}

/// Terminal-account cleanup: the DID leaves every list and the cache.
pub async fn purge_account(ctx: &PipelineContext, api: &dyn ListWriter, did: &str) {
    if let Err(e) = ctx.registry.remove_from_all(api, did).await {
        warn!(did, error = %e, "failed to remove purged account from all lists");
    }
    if let Err(e) = ctx.cache.delete(did) {
        warn!(did, error = %e, "failed to delete purged account from cache");
    }
}

//! Reconciler stage
//!
//! Runs the classification pipeline over a resolved profile and converges
//! each list toward the computed decision: exception accounts are never
//! members, threshold lists hold exactly the accounts at or above their
//! limit, word lists hold the accounts whose profile text matches.
//!
//! Every membership change goes through the list's own idempotency check,
//! so re-reconciling a profile is free. A failed rule logs and moves on;
//! the next observation of the DID re-runs the whole pipeline.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::PipelineContext;
use crate::api::{retry, ListWriter};
use crate::registry::{ModList, RuleKind};
use crate::types::Profile;

const WRITE_RETRIES: u32 = 3;

pub async fn reconciler_worker(
    ctx: Arc<PipelineContext>,
    api: Arc<dyn ListWriter>,
    id: usize,
    cancel: CancellationToken,
) {
    info!(worker = id, "reconciler started");
    while let Some(profile) = ctx.listadd.pop(&cancel).await {
        reconcile(&ctx, api.as_ref(), &profile).await;
    }
    info!(worker = id, "reconciler stopped");
}

/// Classify one profile against every list.
pub async fn reconcile(ctx: &PipelineContext, api: &dyn ListWriter, profile: &Profile) {
    reconcile_thresholds(ctx, api, profile, RuleKind::Follows).await;
    if profile.has_default_domain_handle(&ctx.default_domain) {
        reconcile_thresholds(ctx, api, profile, RuleKind::FollowsUnverified).await;
    }
    reconcile_thresholds(ctx, api, profile, RuleKind::Followers).await;
    reconcile_words(ctx, api, profile).await;
}

/// Threshold lists of one kind, ascending by threshold.
async fn reconcile_thresholds(
    ctx: &PipelineContext,
    api: &dyn ListWriter,
    profile: &Profile,
    kind: RuleKind,
) {
    let count = match kind {
        RuleKind::Followers => profile.followers_count,
        _ => profile.follows_count,
    };

    for list in ctx.registry.lists_of_kind(kind) {
        let limit = list.spec.threshold.unwrap_or(u64::MAX);
        let qualifies = count >= limit;
        if qualifies && kind == RuleKind::Followers {
            debug!(
                did = %profile.did,
                followers_count = count,
                followers_limit = limit,
                "follower threshold met"
            );
        }
        apply(api, &list, &profile.did, qualifies).await;
    }
}

/// Word lists: membership requires a description and a boundary match.
async fn reconcile_words(ctx: &PipelineContext, api: &dyn ListWriter, profile: &Profile) {
    for list in ctx.registry.lists_of_kind(RuleKind::Words) {
        let qualifies = profile.description.is_some()
            && list
                .matcher
                .as_ref()
                .map(|m| m.matches(profile))
                .unwrap_or(false);
        apply(api, &list, &profile.did, qualifies).await;
    }
}

/// Converge one list toward the decision. Exceptions dominate: an excepted
/// DID is removed even when the rule fires.
async fn apply(api: &dyn ListWriter, list: &Arc<ModList>, did: &str, qualifies: bool) {
    let wanted = qualifies && !list.is_exception(did).await;
    let result = if wanted {
        retry("list add", WRITE_RETRIES, || list.add(api, did)).await
    } else {
        retry("list remove", WRITE_RETRIES, || list.remove(api, did)).await
    };
    if let Err(e) = result {
        warn!(list = list.spec.key, did, error = %e, "reconcile step failed, continuing");
    }
}

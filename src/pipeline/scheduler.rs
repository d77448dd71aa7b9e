//! Scheduler stage
//!
//! Decides, per observed DID, whether the cached profile is good enough to
//! classify directly or the DID needs a remote resolve. This is the cheap
//! stage that shields the resolvers from firehose volume: within the
//! freshness window a DID costs one cache read, not a remote call.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::PipelineContext;

pub async fn scheduler_worker(ctx: Arc<PipelineContext>, id: usize, cancel: CancellationToken) {
    info!(worker = id, "scheduler started");
    while let Some(did) = ctx.schedule.pop(&cancel).await {
        match ctx.cache.skip_fetch(&did) {
            Some(profile) => {
                if profile.handle.is_some() {
                    ctx.listadd.push(profile);
                } else {
                    // A cached profile without a handle cannot be classified;
                    // something upstream wrote a bad row.
                    error!(did, "fresh cached profile has no handle, dropping");
                }
            }
            None => ctx.query.push(did),
        }
    }
    info!(worker = id, "scheduler stopped");
}

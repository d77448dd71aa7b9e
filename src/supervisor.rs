//! Supervisor & health
//!
//! Owns the three worker pools. Every five seconds it replaces workers
//! that have terminated and logs queue depths; every five minutes it
//! compacts the Query queue if a firehose burst has outrun the resolvers.
//! On interrupt it clears the queues, cancels every worker, and flushes
//! the cache.
//!
//! Workers are stateless apart from a per-worker authenticated client,
//! built inside the task (with retry) so a respawned worker comes up with
//! a fresh session.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::ApiClient;
use crate::pipeline::{reconciler, resolver, scheduler, PipelineContext};
use crate::queue::WorkQueue;
use crate::types::{Did, Result};

const HEALTH_INTERVAL: Duration = Duration::from_secs(5);
const COMPACTION_INTERVAL: Duration = Duration::from_secs(300);
const SCHEDULE_BUSY_FLOOR: usize = 100;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub num_schedulers: usize,
    pub num_resolvers: usize,
    pub num_reconcilers: usize,
    pub compaction_watermark: usize,
    pub auth_host: String,
    pub public_host: String,
    pub credentials_path: PathBuf,
}

/// One worker pool: live slots plus the factory that refills them.
struct Pool {
    name: &'static str,
    slots: Vec<JoinHandle<()>>,
    spawn: Box<dyn Fn(usize) -> JoinHandle<()> + Send>,
}

impl Pool {
    fn start(
        name: &'static str,
        size: usize,
        spawn: Box<dyn Fn(usize) -> JoinHandle<()> + Send>,
    ) -> Self {
        let slots = (0..size).map(|i| spawn(i)).collect();
        info!(pool = name, workers = size, "worker pool started");
        Self { name, slots, spawn }
    }

    /// Replace terminated workers.
    fn supervise(&mut self) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_finished() {
                warn!(pool = self.name, worker = i, "worker terminated, respawning");
                *slot = (self.spawn)(i);
            }
        }
    }

    async fn join(self) {
        for slot in self.slots {
            let _ = slot.await;
        }
    }
}

pub struct Supervisor {
    config: SupervisorConfig,
    ctx: Arc<PipelineContext>,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, ctx: Arc<PipelineContext>, cancel: CancellationToken) -> Self {
        Self { config, ctx, cancel }
    }

    /// Run the pools until interrupt or external cancellation, then tear
    /// everything down.
    pub async fn run(self) -> Result<()> {
        let mut pools = vec![
            self.scheduler_pool(),
            self.resolver_pool(),
            self.reconciler_pool(),
        ];

        let mut health = tokio::time::interval(HEALTH_INTERVAL);
        health.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut compaction = tokio::time::interval(COMPACTION_INTERVAL);
        compaction.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = health.tick() => {
                    for pool in &mut pools {
                        pool.supervise();
                    }
                    info!(
                        schedule = self.ctx.schedule.len(),
                        query = self.ctx.query.len(),
                        listadd = self.ctx.listadd.len(),
                        "queue depth"
                    );
                }
                _ = compaction.tick() => {
                    compact_query(
                        &self.ctx.schedule,
                        &self.ctx.query,
                        self.config.compaction_watermark,
                    );
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received, shutting down");
                    break;
                }
                _ = self.cancel.cancelled() => break,
            }
        }

        self.cancel.cancel();
        self.ctx.schedule.clear();
        self.ctx.query.clear();
        self.ctx.listadd.clear();
        for pool in pools {
            pool.join().await;
        }
        self.ctx.cache.flush()?;
        info!("shutdown complete");
        Ok(())
    }

    fn scheduler_pool(&self) -> Pool {
        let ctx = Arc::clone(&self.ctx);
        let cancel = self.cancel.clone();
        Pool::start(
            "scheduler",
            self.config.num_schedulers,
            Box::new(move |i| {
                let ctx = Arc::clone(&ctx);
                let cancel = cancel.clone();
                tokio::spawn(scheduler::scheduler_worker(ctx, i, cancel))
            }),
        )
    }

    fn resolver_pool(&self) -> Pool {
        let ctx = Arc::clone(&self.ctx);
        let cancel = self.cancel.clone();
        let config = self.config.clone();
        Pool::start(
            "resolver",
            self.config.num_resolvers,
            Box::new(move |i| {
                let ctx = Arc::clone(&ctx);
                let cancel = cancel.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    let Some(api) = build_client(&config, "resolver", i, &cancel).await else {
                        return;
                    };
                    if let Err(e) = resolver::resolver_worker(ctx, api, i, cancel).await {
                        error!(worker = i, error = %e, "resolver worker failed");
                    }
                })
            }),
        )
    }

    fn reconciler_pool(&self) -> Pool {
        let ctx = Arc::clone(&self.ctx);
        let cancel = self.cancel.clone();
        let config = self.config.clone();
        Pool::start(
            "reconciler",
            self.config.num_reconcilers,
            Box::new(move |i| {
                let ctx = Arc::clone(&ctx);
                let cancel = cancel.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    let Some(api) = build_client(&config, "reconciler", i, &cancel).await else {
                        return;
                    };
                    reconciler::reconciler_worker(ctx, api, i, cancel).await;
                })
            }),
        )
    }
}

/// Establish a worker's own authenticated client, retrying until it works
/// or shutdown wins.
async fn build_client(
    config: &SupervisorConfig,
    pool: &str,
    worker: usize,
    cancel: &CancellationToken,
) -> Option<Arc<ApiClient>> {
    let mut delay = Duration::from_secs(1);
    let max_delay = Duration::from_secs(60);

    loop {
        if cancel.is_cancelled() {
            return None;
        }
        match ApiClient::login(
            &config.auth_host,
            &config.public_host,
            &config.credentials_path,
        )
        .await
        {
            Ok(client) => return Some(Arc::new(client)),
            Err(e) => {
                error!(pool, worker, error = %e, "login failed, retrying in {:?}", delay);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return None,
                }
                delay = (delay * 2).min(max_delay);
            }
        }
    }
}

/// Drain, de-duplicate, and re-enqueue the Query queue. Only runs when the
/// Schedule queue is quiet (so schedulers are not racing new pushes in) and
/// the Query depth has crossed the watermark.
pub fn compact_query(schedule: &WorkQueue<Did>, query: &WorkQueue<Did>, watermark: usize) {
    if schedule.len() >= SCHEDULE_BUSY_FLOOR {
        return;
    }
    let depth = query.len();
    if depth <= watermark {
        return;
    }

    let drained = query.drain();
    let before = drained.len();
    let mut seen = HashSet::new();
    let unique: Vec<Did> = drained
        .into_iter()
        .filter(|did| seen.insert(did.clone()))
        .collect();
    info!(before, after = unique.len(), "compacted query queue");
    query.push_all(unique);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compaction_dedups_without_losses() {
        let schedule: WorkQueue<Did> = WorkQueue::new("schedule");
        let query: WorkQueue<Did> = WorkQueue::new("query");
        for i in 0..20 {
            query.push(format!("did:plc:{}", i % 5));
        }

        compact_query(&schedule, &query, 10);

        let mut remaining = query.drain();
        remaining.sort();
        assert_eq!(
            remaining,
            vec!["did:plc:0", "did:plc:1", "did:plc:2", "did:plc:3", "did:plc:4"]
        );
    }

    #[test]
    fn compaction_preserves_first_occurrence_order() {
        let schedule: WorkQueue<Did> = WorkQueue::new("schedule");
        let query: WorkQueue<Did> = WorkQueue::new("query");
        for did in ["b", "a", "b", "c", "a"] {
            query.push(did.to_string());
        }

        compact_query(&schedule, &query, 3);
        assert_eq!(query.drain(), vec!["b", "a", "c"]);
    }

    #[test]
    fn compaction_skips_below_watermark() {
        let schedule: WorkQueue<Did> = WorkQueue::new("schedule");
        let query: WorkQueue<Did> = WorkQueue::new("query");
        for i in 0..6 {
            query.push(format!("did:plc:{}", i % 2));
        }

        compact_query(&schedule, &query, 100);
        assert_eq!(query.len(), 6);
    }

    #[test]
    fn compaction_skips_while_schedule_queue_is_busy() {
        let schedule: WorkQueue<Did> = WorkQueue::new("schedule");
        let query: WorkQueue<Did> = WorkQueue::new("query");
        for i in 0..SCHEDULE_BUSY_FLOOR + 1 {
            schedule.push(format!("did:plc:s{}", i));
        }
        for i in 0..10 {
            query.push(format!("did:plc:{}", i % 2));
        }

        compact_query(&schedule, &query, 3);
        assert_eq!(query.len(), 10);
    }
}

//! The ingestion-to-reconciliation pipeline
//!
//! Three worker-pool stages connected by queues:
//!
//! ```text
//! firehose → Schedule → scheduler → (skip | Query) → resolver → cache
//!                                                      └→ Listadd → reconciler → registry + remote
//! ```
//!
//! Workers share a [`PipelineContext`]; each stage is scaled independently
//! by the supervisor.

pub mod reconciler;
pub mod resolver;
pub mod scheduler;

use std::sync::Arc;

use crate::cache::ProfileCache;
use crate::queue::WorkQueue;
use crate::registry::ListRegistry;
use crate::types::{Did, Profile};

/// Shared state injected into every pipeline worker.
pub struct PipelineContext {
    pub cache: ProfileCache,
    pub registry: Arc<ListRegistry>,
    pub schedule: Arc<WorkQueue<Did>>,
    pub query: Arc<WorkQueue<Did>>,
    pub listadd: Arc<WorkQueue<Profile>>,
    /// Handle suffix marking an account as not having verified a custom
    /// domain (e.g. `bsky.social`).
    pub default_domain: String,
}

impl PipelineContext {
    pub fn new(cache: ProfileCache, registry: Arc<ListRegistry>, default_domain: String) -> Self {
        Self {
            cache,
            registry,
            schedule: Arc::new(WorkQueue::new("schedule")),
            query: Arc::new(WorkQueue::new("query")),
            listadd: Arc::new(WorkQueue::new("listadd")),
            default_domain,
        }
    }
}

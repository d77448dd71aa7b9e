//! Work queues connecting the pipeline stages
//!
//! Schedule and Query carry DIDs, Listadd carries full profiles so the
//! reconciler never re-reads the cache. All three support concurrent push
//! and pop from any number of workers. They are unbounded; the supervisor's
//! compaction pass polices the Query queue when firehose bursts outrun the
//! resolvers.
//!
//! Items may be enqueued more than once; every consumer is idempotent.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub struct WorkQueue<T> {
    name: &'static str,
    inner: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> WorkQueue<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn push(&self, item: T) {
        self.inner.lock().unwrap().push_back(item);
        self.notify.notify_one();
    }

    pub fn push_all(&self, items: impl IntoIterator<Item = T>) {
        let mut queue = self.inner.lock().unwrap();
        for item in items {
            queue.push_back(item);
            self.notify.notify_one();
        }
    }

    /// Pop without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().unwrap().pop_front()
    }

    /// Pop, waiting for an item. Returns `None` once the token is cancelled.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<T> {
        loop {
            // Arm the notification before checking the queue so a push
            // between the check and the await cannot be missed.
            let notified = self.notify.notified();
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if cancel.is_cancelled() {
                return None;
            }
            tokio::select! {
                _ = notified => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Take every queued item at once. Used by compaction and shutdown.
    pub fn drain(&self) -> Vec<T> {
        self.inner.lock().unwrap().drain(..).collect()
    }

    pub fn clear(&self) {
        let dropped = {
            let mut queue = self.inner.lock().unwrap();
            let n = queue.len();
            queue.clear();
            n
        };
        if dropped > 0 {
            tracing::debug!(queue = self.name, dropped, "cleared queue");
        }
    }
}

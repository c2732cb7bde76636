//! Collapses concurrent identical calls into one execution.
//!
//! Each logical operation is keyed by a fingerprint. While an operation with
//! a given key is running, and for a short grace period after it settles,
//! later callers with the same key get the very same outcome instead of
//! starting another round trip.

use crate::client::utils::{sleep, spawn_task};
use crate::error::Result;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T>>>;

struct CacheEntry<T> {
    generation: u64,
    in_flight: SharedOutcome<T>,
}

pub struct DedupCache<T> {
    name: &'static str,
    grace: Duration,
    entries: Arc<Mutex<HashMap<String, CacheEntry<T>>>>,
    next_generation: AtomicU64,
}

impl<T> DedupCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, grace: Duration) -> Self {
        DedupCache {
            name,
            grace,
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Run `factory`'s future under `key`, or join the one already running.
    ///
    /// The stored future is driven to completion by a background task even
    /// if every caller stops waiting, and is forgotten `grace` after it
    /// settles.
    pub async fn run_deduplicated<F, Fut>(&self, key: impl Into<String>, factory: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let key = key.into();
        let in_flight = {
            let mut entries = self.entries.lock();
            match entries.get(&key) {
                Some(entry) => {
                    debug!("[Cache:{}] Reusing request: {}", self.name, key);
                    entry.in_flight.clone()
                }
                None => {
                    debug!("[Cache:{}] New request: {}", self.name, key);
                    let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
                    let in_flight = factory().boxed().shared();
                    entries.insert(
                        key.clone(),
                        CacheEntry {
                            generation,
                            in_flight: in_flight.clone(),
                        },
                    );
                    self.schedule_eviction(key, generation, in_flight.clone());
                    in_flight
                }
            }
        };
        in_flight.await
    }

    fn schedule_eviction(&self, key: String, generation: u64, in_flight: SharedOutcome<T>) {
        let entries = Arc::clone(&self.entries);
        let grace = self.grace;
        let name = self.name;
        spawn_task(async move {
            let _ = in_flight.await;
            sleep(grace).await;
            let mut entries = entries.lock();
            if entries.get(&key).map(|e| e.generation) == Some(generation) {
                entries.remove(&key);
                debug!("[Cache:{}] Evicted: {}", name, key);
            }
        });
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

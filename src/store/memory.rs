use super::{CounterStore, Increment};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Expiry used when `now + ttl` does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// In-process counter store
///
/// Each increment runs under the shard lock of its key for the whole
/// read-check-expire-write sequence, so same-key increments are serialized
/// while unrelated keys land on other shards.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Counter>>,
    ttl: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at: Instant,
}

impl Counter {
    fn fresh(now: Instant, ttl: Duration) -> Self {
        Self {
            count: 1,
            expires_at: now.checked_add(ttl).unwrap_or(now + FAR_FUTURE),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

impl MemoryStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    fn increment_at(&self, key: &str, now: Instant) -> Increment {
        let counter = match self.entries.entry(key.to_owned()) {
            MapEntry::Occupied(mut occupied) => {
                let counter = occupied.get_mut();
                if counter.is_expired(now) {
                    *counter = Counter::fresh(now, self.ttl);
                } else {
                    counter.count += 1;
                }
                *counter
            }
            MapEntry::Vacant(vacant) => *vacant.insert(Counter::fresh(now, self.ttl)),
        };

        Increment {
            count: counter.count,
            expires_in: counter.expires_at.saturating_duration_since(now),
        }
    }

    /// Drop every expired counter, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        purge(&self.entries, Instant::now())
    }

    /// Number of tracked keys, expired ones included until purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Periodically purge expired counters in the background.
    ///
    /// Purging only removes counters that the next increment would reset
    /// anyway. The task ends once every handle to the store is dropped. A zero
    /// interval disables sweeping and spawns nothing.
    pub fn spawn_sweeper(&self, interval: Duration) -> Option<JoinHandle<()>> {
        if interval.is_zero() {
            return None;
        }

        let entries: Weak<DashMap<String, Counter>> = Arc::downgrade(&self.entries);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(entries) = entries.upgrade() else {
                    break;
                };
                let removed = purge(&entries, Instant::now());
                if removed > 0 {
                    debug!(removed, remaining = entries.len(), "Purged expired counters");
                }
            }
        }))
    }
}

fn purge(entries: &DashMap<String, Counter>, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, counter| !counter.is_expired(now));
    before.saturating_sub(entries.len())
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str) -> Result<Increment> {
        Ok(self.increment_at(key, Instant::now()))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

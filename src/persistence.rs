// Debounced write-behind for the workspace documents.
// Each document key has at most one pending write; scheduling again for a
// key cancels the pending one, so only the last state in a burst is written.

use crate::storage::{DocumentKey, KeyValueStore};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::task::AbortHandle;

/// Serializes the captured snapshot. Runs only if the write is not superseded.
pub type Producer = Box<dyn FnOnce() -> Result<Value, anyhow::Error> + Send + 'static>;

#[derive(Debug, Clone, Copy)]
pub struct DebounceDelays {
    pub sessions: Duration,
    pub settings: Duration,
    pub instructions: Duration,
}

impl Default for DebounceDelays {
    fn default() -> Self {
        Self {
            sessions: Duration::from_millis(1000),
            settings: Duration::from_millis(500),
            instructions: Duration::from_millis(500),
        }
    }
}

impl DebounceDelays {
    pub fn for_key(&self, key: DocumentKey) -> Duration {
        match key {
            DocumentKey::Sessions => self.sessions,
            DocumentKey::Settings => self.settings,
            DocumentKey::Instructions => self.instructions,
        }
    }
}

struct PendingWrite {
    generation: u64,
    producer: Producer,
    timer: Option<AbortHandle>,
}

struct Inner {
    delays: DebounceDelays,
    store: OnceLock<Arc<KeyValueStore>>,
    pending: Mutex<HashMap<DocumentKey, PendingWrite>>,
    // One writer per document at a time, even when a new timer fires while
    // the previous write is still running.
    write_locks: HashMap<DocumentKey, tokio::sync::Mutex<()>>,
    next_generation: AtomicU64,
    // Writes from generations below this were cancelled, even if their timer
    // already took them off the pending table.
    cancelled_below: AtomicU64,
}

/// Holds every per-document write lock. Scheduled writes wait until it drops.
pub struct ExclusiveWrites<'a> {
    _guards: Vec<tokio::sync::MutexGuard<'a, ()>>,
}

#[derive(Clone)]
pub struct PersistenceScheduler {
    inner: Arc<Inner>,
}

impl PersistenceScheduler {
    pub fn new(delays: DebounceDelays) -> Self {
        let write_locks = DocumentKey::ALL
            .into_iter()
            .map(|key| (key, tokio::sync::Mutex::new(())))
            .collect();
        Self {
            inner: Arc::new(Inner {
                delays,
                store: OnceLock::new(),
                pending: Mutex::new(HashMap::new()),
                write_locks,
                next_generation: AtomicU64::new(0),
                cancelled_below: AtomicU64::new(0),
            }),
        }
    }

    /// Provides the store once it is initialized. Until then writes are dropped.
    pub fn attach(&self, store: Arc<KeyValueStore>) {
        if self.inner.store.set(store).is_err() {
            log::warn!("Persistence scheduler already has a store attached, ignoring");
        }
    }

    pub fn store(&self) -> Option<Arc<KeyValueStore>> {
        self.inner.store.get().cloned()
    }

    /// Queues a write for `key`, replacing any write still waiting for its delay.
    pub fn schedule<F>(&self, key: DocumentKey, producer: F)
    where
        F: FnOnce() -> Result<Value, anyhow::Error> + Send + 'static,
    {
        if self.inner.store.get().is_none() {
            log::debug!("Store not ready, skipping write of '{}'", key);
            return;
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let replaced = self.lock_pending().insert(
            key,
            PendingWrite {
                generation,
                producer: Box::new(producer),
                timer: None,
            },
        );
        if let Some(old) = replaced {
            if let Some(timer) = old.timer {
                timer.abort();
            }
            log::debug!("Superseded pending write of '{}'", key);
        }

        let inner = self.inner.clone();
        let delay = self.inner.delays.for_key(key);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let due = {
                let mut pending = inner.pending.lock().unwrap_or_else(|e| e.into_inner());
                let current = pending
                    .get(&key)
                    .map_or(false, |entry| entry.generation == generation);
                if current {
                    pending.remove(&key)
                } else {
                    None
                }
            };
            if let Some(entry) = due {
                run_write(&inner, key, entry.generation, entry.producer).await;
            }
        });

        // The timer may already have fired for a zero delay, in which case
        // the entry is gone (or belongs to a newer generation) and this is a no-op.
        if let Some(entry) = self.lock_pending().get_mut(&key) {
            if entry.generation == generation {
                entry.timer = Some(task.abort_handle());
            }
        }
    }

    /// Runs every pending write now instead of waiting for its delay.
    pub async fn flush(&self) {
        let due: Vec<(DocumentKey, PendingWrite)> = self.lock_pending().drain().collect();
        if due.is_empty() {
            return;
        }
        log::info!("Flushing {} pending document writes", due.len());
        for (key, entry) in due {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
            run_write(&self.inner, key, entry.generation, entry.producer).await;
        }
    }

    /// Drops every pending write without running it, including writes whose
    /// timer has fired but which have not reached the store yet. Returns how
    /// many pending writes were dropped.
    pub fn cancel_all(&self) -> usize {
        let horizon = self.inner.next_generation.load(Ordering::SeqCst);
        self.inner.cancelled_below.fetch_max(horizon, Ordering::SeqCst);
        let dropped: Vec<PendingWrite> = self.lock_pending().drain().map(|(_, entry)| entry).collect();
        for entry in &dropped {
            if let Some(timer) = &entry.timer {
                timer.abort();
            }
        }
        if !dropped.is_empty() {
            log::info!("Cancelled {} pending document writes", dropped.len());
        }
        dropped.len()
    }

    /// Cancels pending writes and takes every write lock, so the caller can
    /// write documents directly without a stale write landing on top.
    pub async fn exclusive(&self) -> ExclusiveWrites<'_> {
        self.cancel_all();
        let mut guards = Vec::with_capacity(DocumentKey::ALL.len());
        // Fixed key order; timer tasks only ever hold one lock.
        for key in DocumentKey::ALL {
            if let Some(lock) = self.inner.write_locks.get(&key) {
                guards.push(lock.lock().await);
            }
        }
        ExclusiveWrites { _guards: guards }
    }

    pub fn pending(&self) -> Vec<DocumentKey> {
        self.lock_pending().keys().copied().collect()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<DocumentKey, PendingWrite>> {
        self.inner.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn run_write(inner: &Inner, key: DocumentKey, generation: u64, producer: Producer) {
    let Some(store) = inner.store.get() else {
        return;
    };
    let Some(lock) = inner.write_locks.get(&key) else {
        return;
    };
    let _writing = lock.lock().await;
    if generation < inner.cancelled_below.load(Ordering::SeqCst) {
        log::debug!("Dropping cancelled write of '{}'", key);
        return;
    }

    let value = match producer() {
        Ok(value) => value,
        Err(e) => {
            log::error!("Failed to serialize document '{}': {:#}", key, e);
            return;
        }
    };
    // Failures are already logged by the store; the next mutation retries.
    let _ = store.write(key.name(), &value).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{SqliteBackend, StorageBackend};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    async fn memory_store() -> Arc<KeyValueStore> {
        Arc::new(KeyValueStore::new(StorageBackend::Sqlite(
            SqliteBackend::in_memory().await.unwrap(),
        )))
    }

    fn short_delays() -> DebounceDelays {
        DebounceDelays {
            sessions: Duration::from_millis(80),
            settings: Duration::from_millis(20),
            instructions: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn burst_of_writes_persists_only_the_last() {
        let store = memory_store().await;
        let scheduler = PersistenceScheduler::new(short_delays());
        scheduler.attach(store.clone());

        let produced = Arc::new(AtomicUsize::new(0));
        for n in 0..5 {
            let produced = produced.clone();
            scheduler.schedule(DocumentKey::Sessions, move || {
                produced.fetch_add(1, Ordering::SeqCst);
                Ok(json!([n]))
            });
        }
        assert_eq!(scheduler.pending(), vec![DocumentKey::Sessions]);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(produced.load(Ordering::SeqCst), 1);
        assert_eq!(store.read("sessions").await, Some(json!([4])));
        assert!(scheduler.pending().is_empty());
    }

    #[tokio::test]
    async fn settings_flush_before_sessions() {
        let store = memory_store().await;
        let scheduler = PersistenceScheduler::new(short_delays());
        scheduler.attach(store.clone());

        scheduler.schedule(DocumentKey::Sessions, || Ok(json!([])));
        scheduler.schedule(DocumentKey::Settings, || Ok(json!({"theme": "light"})));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.read("settings").await, Some(json!({"theme": "light"})));
        assert_eq!(store.read("sessions").await, None);
    }

    #[tokio::test]
    async fn writes_are_skipped_until_a_store_is_attached() {
        let scheduler = PersistenceScheduler::new(short_delays());
        scheduler.schedule(DocumentKey::Settings, || Ok(json!({})));
        assert!(scheduler.pending().is_empty());

        let store = memory_store().await;
        scheduler.attach(store.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.read("settings").await, None);
    }

    #[tokio::test]
    async fn flush_runs_pending_writes_immediately() {
        let store = memory_store().await;
        let scheduler = PersistenceScheduler::new(DebounceDelays {
            sessions: Duration::from_secs(60),
            settings: Duration::from_secs(60),
            instructions: Duration::from_secs(60),
        });
        scheduler.attach(store.clone());

        scheduler.schedule(DocumentKey::Instructions, || Ok(json!([{"title": "a"}])));
        scheduler.flush().await;
        assert_eq!(store.read("instructions").await, Some(json!([{"title": "a"}])));
        assert!(scheduler.pending().is_empty());
    }

    #[tokio::test]
    async fn cancel_all_drops_pending_writes() {
        let store = memory_store().await;
        let scheduler = PersistenceScheduler::new(short_delays());
        scheduler.attach(store.clone());

        scheduler.schedule(DocumentKey::Settings, || Ok(json!({"stale": true})));
        assert_eq!(scheduler.cancel_all(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.read("settings").await, None);
    }

    #[tokio::test]
    async fn cancelled_write_waiting_on_its_lock_is_dropped() {
        let store = memory_store().await;
        let scheduler = PersistenceScheduler::new(DebounceDelays {
            sessions: Duration::ZERO,
            ..short_delays()
        });
        scheduler.attach(store.clone());

        // The timer fires and takes the write off the table, then blocks here.
        let held = scheduler.inner.write_locks[&DocumentKey::Sessions].lock().await;
        scheduler.schedule(DocumentKey::Sessions, || Ok(json!(["stale"])));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(scheduler.pending().is_empty());

        scheduler.cancel_all();
        store.write("sessions", &json!(["restored"])).await.unwrap();
        drop(held);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.read("sessions").await, Some(json!(["restored"])));
    }

    #[tokio::test]
    async fn exclusive_holds_back_new_writes_until_released() {
        let store = memory_store().await;
        let scheduler = PersistenceScheduler::new(short_delays());
        scheduler.attach(store.clone());

        scheduler.schedule(DocumentKey::Settings, || Ok(json!({"stale": true})));
        let writes = scheduler.exclusive().await;
        assert!(scheduler.pending().is_empty());

        scheduler.schedule(DocumentKey::Settings, || Ok(json!({"fresh": true})));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.read("settings").await, None);

        drop(writes);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.read("settings").await, Some(json!({"fresh": true})));
    }

    #[tokio::test]
    async fn failing_producer_is_not_fatal() {
        let store = memory_store().await;
        let scheduler = PersistenceScheduler::new(short_delays());
        scheduler.attach(store.clone());

        scheduler.schedule(DocumentKey::Settings, || Err(anyhow::anyhow!("boom")));
        scheduler.flush().await;
        scheduler.schedule(DocumentKey::Settings, || Ok(json!({"ok": true})));
        scheduler.flush().await;
        assert_eq!(store.read("settings").await, Some(json!({"ok": true})));
    }
}

//! In-memory record store for testing.
//!
//! Models the shared, watchable, replicated store: many independent services
//! can hold an `Arc` to the same store and observe each other's writes via
//! watch streams. Creation is atomic under a write lock, so concurrent
//! `create_if_absent` calls have exactly one winner.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use clusterid_core::{
    ClusterIdError, ClusterIdResult, FieldSelector, IdentityRecord, RecordKey, StorageError,
};
use futures_util::{future, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::traits::{RecordLister, RecordWriter, WatchEvent, WatchStream};

/// Buffered events per watcher before it starts lagging.
const WATCH_CHANNEL_CAPACITY: usize = 256;

/// Call counters for the in-memory store.
#[derive(Debug, Default)]
struct StoreCounters {
    list_calls: AtomicU64,
    watch_calls: AtomicU64,
    create_calls: AtomicU64,
    creates_succeeded: AtomicU64,
    creates_conflicted: AtomicU64,
}

/// Snapshot of store call counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub list_calls: u64,
    pub watch_calls: u64,
    pub create_calls: u64,
    pub creates_succeeded: u64,
    pub creates_conflicted: u64,
}

impl StoreStats {
    /// Total number of calls that would have reached storage.
    pub fn total_calls(&self) -> u64 {
        self.list_calls + self.watch_calls + self.create_calls
    }
}

/// In-memory, watchable record store.
#[derive(Debug)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<RecordKey, IdentityRecord>>,
    events: RwLock<broadcast::Sender<WatchEvent>>,
    counters: StoreCounters,
    create_failure: Mutex<Option<StorageError>>,
    /// Last revision handed out. Only advanced under the records write lock.
    revision: AtomicU64,
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            records: RwLock::new(HashMap::new()),
            events: RwLock::new(events),
            counters: StoreCounters::default(),
            create_failure: Mutex::new(None),
            revision: AtomicU64::new(0),
        }
    }
}

impl InMemoryRecordStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record and notify watchers.
    pub fn upsert(&self, record: IdentityRecord) -> ClusterIdResult<()> {
        let mut records = self.records_write()?;
        let record = record.at_revision(self.next_revision());
        let event = if records.contains_key(&record.key) {
            WatchEvent::modified(record.clone())
        } else {
            WatchEvent::added(record.clone())
        };
        records.insert(record.key.clone(), record);
        self.publish(event)
    }

    /// Insert or replace a record without notifying watchers.
    ///
    /// Simulates a record that exists in storage before a watcher has
    /// received its event for it.
    pub fn upsert_silently(&self, record: IdentityRecord) -> ClusterIdResult<()> {
        let mut records = self.records_write()?;
        let record = record.at_revision(self.next_revision());
        records.insert(record.key.clone(), record);
        Ok(())
    }

    /// Set a single data field on an existing record and notify watchers.
    pub fn set_field(
        &self,
        key: &RecordKey,
        field: &str,
        value: impl Into<String>,
    ) -> ClusterIdResult<()> {
        let mut records = self.records_write()?;
        let record = records.get_mut(key).ok_or_else(|| StorageError::Rejected {
            operation: "update".to_string(),
            key: key.to_string(),
            reason: "record does not exist".to_string(),
        })?;
        record.data.insert(field.to_string(), value.into());
        record.revision = self.next_revision();
        let event = WatchEvent::modified(record.clone());
        self.publish(event)
    }

    /// Current value of a record.
    pub fn get(&self, key: &RecordKey) -> ClusterIdResult<Option<IdentityRecord>> {
        Ok(self.records_read()?.get(key).cloned())
    }

    /// Make the next `create_if_absent` call fail with `err`.
    pub fn fail_next_create(&self, err: StorageError) {
        if let Ok(mut slot) = self.create_failure.lock() {
            *slot = Some(err);
        }
    }

    /// End every open watch stream. New watches are unaffected.
    pub fn disconnect_watchers(&self) -> ClusterIdResult<()> {
        let mut events = self
            .events
            .write()
            .map_err(|_| ClusterIdError::Storage(StorageError::LockPoisoned))?;
        let (fresh, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        *events = fresh;
        Ok(())
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            list_calls: self.counters.list_calls.load(Ordering::Relaxed),
            watch_calls: self.counters.watch_calls.load(Ordering::Relaxed),
            create_calls: self.counters.create_calls.load(Ordering::Relaxed),
            creates_succeeded: self.counters.creates_succeeded.load(Ordering::Relaxed),
            creates_conflicted: self.counters.creates_conflicted.load(Ordering::Relaxed),
        }
    }

    fn records_read(
        &self,
    ) -> ClusterIdResult<std::sync::RwLockReadGuard<'_, HashMap<RecordKey, IdentityRecord>>> {
        self.records
            .read()
            .map_err(|_| ClusterIdError::Storage(StorageError::LockPoisoned))
    }

    fn records_write(
        &self,
    ) -> ClusterIdResult<std::sync::RwLockWriteGuard<'_, HashMap<RecordKey, IdentityRecord>>> {
        self.records
            .write()
            .map_err(|_| ClusterIdError::Storage(StorageError::LockPoisoned))
    }

    /// Latest revision written to the store.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Callers must hold the records write lock.
    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Broadcast an event. Called while the records write lock is held so
    /// watchers see changes in commit order.
    fn publish(&self, event: WatchEvent) -> ClusterIdResult<()> {
        let events = self
            .events
            .read()
            .map_err(|_| ClusterIdError::Storage(StorageError::LockPoisoned))?;
        // No subscribers is not an error.
        let _ = events.send(event);
        Ok(())
    }
}

#[async_trait]
impl RecordLister for InMemoryRecordStore {
    async fn list(
        &self,
        namespace: &str,
        selector: &FieldSelector,
    ) -> ClusterIdResult<Vec<IdentityRecord>> {
        self.counters.list_calls.fetch_add(1, Ordering::Relaxed);
        let records = self.records_read()?;
        let mut matched: Vec<IdentityRecord> = records
            .values()
            .filter(|r| r.key.namespace == namespace && selector.matches(r))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(matched)
    }

    async fn watch(
        &self,
        namespace: &str,
        selector: &FieldSelector,
    ) -> ClusterIdResult<WatchStream> {
        self.counters.watch_calls.fetch_add(1, Ordering::Relaxed);
        let receiver = self
            .events
            .read()
            .map_err(|_| ClusterIdError::Storage(StorageError::LockPoisoned))?
            .subscribe();

        let namespace = namespace.to_string();
        let selector = selector.clone();
        let stream = BroadcastStream::new(receiver).filter_map(move |item| {
            let item = match item {
                Ok(event)
                    if event.record.key.namespace == namespace
                        && selector.matches(&event.record) =>
                {
                    Some(Ok(event))
                }
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, namespace = %namespace, "Watch receiver lagged");
                    Some(Err(StorageError::Unavailable {
                        operation: "watch".to_string(),
                        key: String::new(),
                        reason: format!("watcher lagged by {} events", skipped),
                    }
                    .into()))
                }
            };
            future::ready(item)
        });

        Ok(stream.boxed())
    }
}

#[async_trait]
impl RecordWriter for InMemoryRecordStore {
    async fn create_if_absent(&self, record: &IdentityRecord) -> ClusterIdResult<()> {
        self.counters.create_calls.fetch_add(1, Ordering::Relaxed);

        let injected = self
            .create_failure
            .lock()
            .map_err(|_| ClusterIdError::Storage(StorageError::LockPoisoned))?
            .take();
        if let Some(err) = injected {
            return Err(err.into());
        }

        let mut records = self.records_write()?;
        if records.contains_key(&record.key) {
            self.counters
                .creates_conflicted
                .fetch_add(1, Ordering::Relaxed);
            return Err(StorageError::AlreadyExists {
                key: record.key.to_string(),
            }
            .into());
        }

        let record = record.clone().at_revision(self.next_revision());
        records.insert(record.key.clone(), record.clone());
        self.counters
            .creates_succeeded
            .fetch_add(1, Ordering::Relaxed);
        self.publish(WatchEvent::added(record))
    }
}

//! Watch Pump Background Task
//!
//! Keeps the identity cache in sync with the shared record. The pump:
//!
//! 1. Opens the single-key watch
//! 2. Lists the record once and applies it
//! 3. Marks the cache ready
//! 4. Applies every `Added`/`Modified` event that differs from the last one
//!
//! The watch is opened before the list, so events queued behind the listing
//! can be older than it. Events at or below the last applied storage
//! revision are skipped as stale.
//!
//! When the watch stream ends or yields an error, the pump waits
//! `rewatch_backoff`, re-opens the watch and re-lists. The cache is never
//! cleared. The task runs until its shutdown signal fires.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use clusterid_core::{ClusterIdResult, IdentityFields, RecordKey};
use clusterid_storage::{RecordLister, SingleKeyWatchScope, WatchEvent, WatchStream};
use futures_util::StreamExt;
use tokio::sync::watch;

use crate::cache::IdentityCache;

// ============================================================================
// METRICS
// ============================================================================

/// Counters for watch pump activity.
#[derive(Debug, Default)]
pub struct WatchPumpMetrics {
    /// Events (and resync snapshots) that were applied to the cache
    pub events_applied: AtomicU64,

    /// Events identical to the last applied snapshot
    pub duplicates_skipped: AtomicU64,

    /// Events at or below the last applied revision
    pub stale_skipped: AtomicU64,

    /// Events for a record other than the watched one
    pub foreign_ignored: AtomicU64,

    /// Errors yielded by the watch stream or by applying an event
    pub stream_errors: AtomicU64,

    /// Successful watch re-establishments
    pub rewatches: AtomicU64,

    last_applied_at: Mutex<Option<DateTime<Utc>>>,
}

impl WatchPumpMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_applied(&self) {
        self.events_applied.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut at) = self.last_applied_at.lock() {
            *at = Some(Utc::now());
        }
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> WatchPumpSnapshot {
        WatchPumpSnapshot {
            events_applied: self.events_applied.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            stale_skipped: self.stale_skipped.load(Ordering::Relaxed),
            foreign_ignored: self.foreign_ignored.load(Ordering::Relaxed),
            stream_errors: self.stream_errors.load(Ordering::Relaxed),
            rewatches: self.rewatches.load(Ordering::Relaxed),
            last_applied_at: self.last_applied_at.lock().ok().and_then(|at| *at),
        }
    }
}

/// Snapshot of watch pump metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchPumpSnapshot {
    pub events_applied: u64,
    pub duplicates_skipped: u64,
    pub stale_skipped: u64,
    pub foreign_ignored: u64,
    pub stream_errors: u64,
    pub rewatches: u64,
    pub last_applied_at: Option<DateTime<Utc>>,
}

impl WatchPumpSnapshot {
    /// Events and resync snapshots handled, whatever the outcome.
    pub fn events_seen(&self) -> u64 {
        self.events_applied + self.duplicates_skipped + self.stale_skipped + self.foreign_ignored
    }
}

// ============================================================================
// EVENT HANDLING
// ============================================================================

/// The newest state the pump has applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedState {
    /// Storage revision of the applied record; 0 if storage is unversioned.
    pub revision: u64,
    pub fields: IdentityFields,
}

/// What to do with one watch event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDecision {
    /// Apply these fields to the cache.
    Apply(IdentityFields),
    /// Same fields as the last applied event.
    Duplicate,
    /// Written at or before the last applied revision.
    Stale,
    /// The event is for some other record.
    Foreign,
}

/// Decide how to handle `event` for the record at `key`.
///
/// Pure: compares revision and identity fields against the last applied
/// state and never touches the cache.
pub fn decide(
    key: &RecordKey,
    last_applied: Option<&AppliedState>,
    event: &WatchEvent,
) -> EventDecision {
    if event.record.key != *key {
        return EventDecision::Foreign;
    }
    let revision = event.record.revision;
    let fields = IdentityFields::from_data(&event.record.data);
    match last_applied {
        Some(last) if revision != 0 && revision <= last.revision => EventDecision::Stale,
        Some(last) if last.fields == fields => EventDecision::Duplicate,
        _ => EventDecision::Apply(fields),
    }
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Consumes the single-key watch and applies changes to the cache.
pub struct WatchPump<L> {
    cache: Arc<IdentityCache>,
    scope: Arc<SingleKeyWatchScope<L>>,
    rewatch_backoff: Duration,
    metrics: Arc<WatchPumpMetrics>,
    last_applied: Option<AppliedState>,
}

impl<L: RecordLister> WatchPump<L> {
    pub fn new(
        cache: Arc<IdentityCache>,
        scope: Arc<SingleKeyWatchScope<L>>,
        rewatch_backoff: Duration,
        metrics: Arc<WatchPumpMetrics>,
    ) -> Self {
        Self {
            cache,
            scope,
            rewatch_backoff,
            metrics,
            last_applied: None,
        }
    }

    /// Open the watch, apply the initial listing and mark the cache ready.
    ///
    /// The returned stream is handed to [`WatchPump::run`].
    pub async fn prime(&mut self) -> ClusterIdResult<WatchStream> {
        let stream = self.scope.watch_one().await?;
        self.resync().await?;
        self.cache.mark_ready();
        tracing::info!(key = %self.scope.key(), "Cluster id watch started");
        Ok(stream)
    }

    /// Pump events until `shutdown_rx` carries `true`.
    pub async fn run(
        mut self,
        mut stream: WatchStream,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Arc<WatchPumpMetrics> {
        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown_rx) => {
                    tracing::info!(key = %self.scope.key(), "Cluster id watch shutting down");
                    break;
                }

                next = stream.next() => {
                    match next {
                        Some(Ok(event)) => {
                            if let Err(e) = self.handle(&event) {
                                tracing::error!(error = %e, "Failed to apply cluster id event");
                                self.metrics.stream_errors.fetch_add(1, Ordering::Relaxed);
                            }
                            continue;
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "Cluster id watch failed, re-establishing");
                            self.metrics.stream_errors.fetch_add(1, Ordering::Relaxed);
                        }
                        None => {
                            tracing::warn!(key = %self.scope.key(), "Cluster id watch closed, re-establishing");
                        }
                    }

                    match self.reestablish(&mut shutdown_rx).await {
                        Some(next_stream) => stream = next_stream,
                        None => break,
                    }
                }
            }
        }

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            events_applied = snapshot.events_applied,
            duplicates_skipped = snapshot.duplicates_skipped,
            stale_skipped = snapshot.stale_skipped,
            foreign_ignored = snapshot.foreign_ignored,
            rewatches = snapshot.rewatches,
            "Cluster id watch stopped"
        );

        self.metrics
    }

    fn handle(&mut self, event: &WatchEvent) -> ClusterIdResult<()> {
        match decide(self.scope.key(), self.last_applied.as_ref(), event) {
            EventDecision::Apply(fields) => {
                let revision = event.record.revision;
                let changed = self.cache.apply_at(revision, &fields)?;
                tracing::debug!(
                    kind = ?event.kind,
                    revision,
                    changed,
                    cluster_id = ?fields.cluster_id,
                    provider_id = ?fields.provider_id,
                    "Applied cluster id event"
                );
                let revision = self
                    .last_applied
                    .as_ref()
                    .map_or(revision, |last| last.revision.max(revision));
                self.last_applied = Some(AppliedState { revision, fields });
                self.metrics.record_applied();
            }
            EventDecision::Duplicate => {
                tracing::debug!(kind = ?event.kind, "Skipping duplicate cluster id event");
                self.metrics.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
            }
            EventDecision::Stale => {
                tracing::debug!(
                    kind = ?event.kind,
                    revision = event.record.revision,
                    "Skipping stale cluster id event"
                );
                self.metrics.stale_skipped.fetch_add(1, Ordering::Relaxed);
            }
            EventDecision::Foreign => {
                tracing::debug!(record = %event.record.key, "Ignoring event for another record");
                self.metrics.foreign_ignored.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// List the record and apply it if it exists.
    async fn resync(&mut self) -> ClusterIdResult<()> {
        if let Some(record) = self.scope.list_one().await? {
            self.handle(&WatchEvent::added(record))?;
        }
        Ok(())
    }

    /// Re-open the watch and re-list. `None` means shutdown was requested.
    async fn reestablish(
        &mut self,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Option<WatchStream> {
        loop {
            tokio::select! {
                _ = shutdown_requested(shutdown_rx) => return None,
                _ = tokio::time::sleep(self.rewatch_backoff) => {}
            }

            let stream = match self.scope.watch_one().await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = self.rewatch_backoff.as_millis() as u64,
                        "Failed to re-open cluster id watch"
                    );
                    continue;
                }
            };
            if let Err(e) = self.resync().await {
                tracing::warn!(error = %e, "Failed to re-list cluster id record");
                continue;
            }

            self.metrics.rewatches.fetch_add(1, Ordering::Relaxed);
            tracing::info!(key = %self.scope.key(), "Cluster id watch re-established");
            return Some(stream);
        }
    }
}

/// Resolves once shutdown is requested.
///
/// A dropped sender never requests shutdown; the pump then runs for the
/// life of the runtime.
async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

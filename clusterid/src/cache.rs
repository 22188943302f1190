//! Local projection of the identity record.
//!
//! One cache exists per process. The watch pump and the lazy initializer
//! write to it; `GetId` callers read from it. Both fields are guarded by a
//! single reader/writer lock, so readers never see a half-applied update.
//! The lock is only held for the field copy, never across storage I/O.
//!
//! Updates that carry a storage revision older than one already applied
//! are dropped, so a reader never sees a field move back to an older value.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use clusterid_core::{
    ClusterIdError, ClusterIdResult, IdentityFields, IdentityRecord, RecordData, StorageError,
};

#[derive(Debug, Default)]
struct CachedIdentity {
    ids: IdentityFields,
    /// Highest storage revision applied so far; 0 before any.
    revision: u64,
}

/// Cached cluster and provider ids plus the watch readiness flag.
#[derive(Debug, Default)]
pub struct IdentityCache {
    state: RwLock<CachedIdentity>,
    ready: AtomicBool,
}

impl IdentityCache {
    /// Create an empty, not-yet-ready cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the identity fields present in a record's data.
    ///
    /// Fields missing from `data` keep their current value. Returns whether
    /// the cached state changed.
    pub fn set_from_record(&self, data: &RecordData) -> ClusterIdResult<bool> {
        self.apply(&IdentityFields::from_data(data))
    }

    /// Overlay already-projected fields that carry no storage revision.
    pub fn apply(&self, update: &IdentityFields) -> ClusterIdResult<bool> {
        self.apply_at(0, update)
    }

    /// Apply a record read from storage, honoring its revision.
    pub fn apply_record(&self, record: &IdentityRecord) -> ClusterIdResult<bool> {
        self.apply_at(record.revision, &IdentityFields::from_data(&record.data))
    }

    /// Overlay `update` written to storage at `revision`.
    ///
    /// Revisions below the highest one applied are ignored. Revision 0
    /// means unversioned and only merges until a versioned write lands.
    pub fn apply_at(&self, revision: u64, update: &IdentityFields) -> ClusterIdResult<bool> {
        let mut state = self
            .state
            .write()
            .map_err(|_| ClusterIdError::Storage(StorageError::LockPoisoned))?;
        if revision < state.revision {
            return Ok(false);
        }
        let before = state.ids.clone();
        state.ids.merge(update);
        state.revision = state.revision.max(revision);
        Ok(state.ids != before)
    }

    /// Copy both fields under the shared lock.
    pub fn snapshot(&self) -> ClusterIdResult<IdentityFields> {
        let state = self
            .state
            .read()
            .map_err(|_| ClusterIdError::Storage(StorageError::LockPoisoned))?;
        Ok(state.ids.clone())
    }

    /// Highest storage revision applied.
    pub fn revision(&self) -> ClusterIdResult<u64> {
        let state = self
            .state
            .read()
            .map_err(|_| ClusterIdError::Storage(StorageError::LockPoisoned))?;
        Ok(state.revision)
    }

    /// True once a non-empty cluster id is cached.
    pub fn has_cluster_id(&self) -> ClusterIdResult<bool> {
        Ok(self.snapshot()?.has_cluster_id())
    }

    /// Record that the watch scope has been started.
    ///
    /// The exactly-once transition is enforced by the watch start path.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

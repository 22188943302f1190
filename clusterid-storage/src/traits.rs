//! Storage capability traits.
//!
//! The identity protocol consumes two capabilities from shared storage: a
//! list/watch pair scoped by namespace and field selector, and an atomic
//! create-if-absent. Implementations must be safe to share across tasks.

use std::sync::Arc;

use async_trait::async_trait;
use clusterid_core::{ClusterIdResult, FieldSelector, IdentityRecord};
use futures_util::stream::BoxStream;

/// Kind of change delivered by a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    Added,
    Modified,
}

/// A single change to a watched record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub record: IdentityRecord,
}

impl WatchEvent {
    pub fn added(record: IdentityRecord) -> Self {
        Self {
            kind: WatchEventKind::Added,
            record,
        }
    }

    pub fn modified(record: IdentityRecord) -> Self {
        Self {
            kind: WatchEventKind::Modified,
            record,
        }
    }
}

/// Stream of watch events. The stream ending means the watch was closed.
pub type WatchStream = BoxStream<'static, ClusterIdResult<WatchEvent>>;

/// List and watch records by namespace and field selector.
#[async_trait]
pub trait RecordLister: Send + Sync {
    /// List records in `namespace` matching `selector`.
    async fn list(
        &self,
        namespace: &str,
        selector: &FieldSelector,
    ) -> ClusterIdResult<Vec<IdentityRecord>>;

    /// Stream subsequent changes to records in `namespace` matching `selector`.
    async fn watch(&self, namespace: &str, selector: &FieldSelector)
        -> ClusterIdResult<WatchStream>;
}

/// Create records in shared storage.
#[async_trait]
pub trait RecordWriter: Send + Sync {
    /// Create `record` unless a record with the same key already exists.
    ///
    /// Losing writers receive `StorageError::AlreadyExists`; exactly one
    /// concurrent caller per key succeeds.
    async fn create_if_absent(&self, record: &IdentityRecord) -> ClusterIdResult<()>;
}

#[async_trait]
impl<T: RecordLister + ?Sized> RecordLister for Arc<T> {
    async fn list(
        &self,
        namespace: &str,
        selector: &FieldSelector,
    ) -> ClusterIdResult<Vec<IdentityRecord>> {
        (**self).list(namespace, selector).await
    }

    async fn watch(
        &self,
        namespace: &str,
        selector: &FieldSelector,
    ) -> ClusterIdResult<WatchStream> {
        (**self).watch(namespace, selector).await
    }
}

#[async_trait]
impl<T: RecordWriter + ?Sized> RecordWriter for Arc<T> {
    async fn create_if_absent(&self, record: &IdentityRecord) -> ClusterIdResult<()> {
        (**self).create_if_absent(record).await
    }
}

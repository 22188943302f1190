//! Single-record watch scope.
//!
//! Wraps a generic namespace-wide lister and pins every list and watch call
//! to one record name by injecting `metadata.name=<name>` into the field
//! selector. Nothing downstream has to filter by name again.

use async_trait::async_trait;
use clusterid_core::{ClusterIdResult, FieldSelector, IdentityRecord, RecordKey};
use futures_util::StreamExt;

use crate::traits::{RecordLister, WatchStream};

/// A [`RecordLister`] decorator narrowed to a single record.
#[derive(Debug, Clone)]
pub struct SingleKeyWatchScope<L> {
    inner: L,
    key: RecordKey,
}

impl<L: RecordLister> SingleKeyWatchScope<L> {
    pub fn new(inner: L, key: RecordKey) -> Self {
        Self { inner, key }
    }

    /// Key of the record this scope observes.
    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    /// The selector injected into every delegated call.
    pub fn selector(&self) -> FieldSelector {
        FieldSelector::name_equals(self.key.name.clone())
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    /// Read the scoped record, if it exists.
    pub async fn list_one(&self) -> ClusterIdResult<Option<IdentityRecord>> {
        let key = self.key.to_string();
        let records = self
            .inner
            .list(&self.key.namespace, &self.selector())
            .await
            .map_err(|e| e.with_context("list", &key))?;

        Ok(records.into_iter().find(|record| record.key == self.key))
    }

    /// Watch the scoped record.
    pub async fn watch_one(&self) -> ClusterIdResult<WatchStream> {
        let key = self.key.to_string();
        let stream = self
            .inner
            .watch(&self.key.namespace, &self.selector())
            .await
            .map_err(|e| e.with_context("watch", &key))?;

        Ok(stream
            .map(move |item| item.map_err(|e| e.with_context("watch", &key)))
            .boxed())
    }
}

#[async_trait]
impl<L: RecordLister> RecordLister for SingleKeyWatchScope<L> {
    async fn list(
        &self,
        namespace: &str,
        selector: &FieldSelector,
    ) -> ClusterIdResult<Vec<IdentityRecord>> {
        let selector = selector.clone().with_name(self.key.name.clone());
        self.inner.list(namespace, &selector).await
    }

    async fn watch(
        &self,
        namespace: &str,
        selector: &FieldSelector,
    ) -> ClusterIdResult<WatchStream> {
        let selector = selector.clone().with_name(self.key.name.clone());
        self.inner.watch(namespace, &selector).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::WatchEvent;
    use clusterid_core::{ClusterIdError, RecordData, StorageError};
    use std::sync::Mutex;

    /// Lister that records the selectors it was called with.
    #[derive(Default)]
    struct RecordingLister {
        seen: Mutex<Vec<(String, String)>>,
        records: Vec<IdentityRecord>,
        fail: bool,
    }

    #[async_trait]
    impl RecordLister for RecordingLister {
        async fn list(
            &self,
            namespace: &str,
            selector: &FieldSelector,
        ) -> ClusterIdResult<Vec<IdentityRecord>> {
            self.seen
                .lock()
                .unwrap()
                .push((namespace.to_string(), selector.to_string()));
            if self.fail {
                return Err(StorageError::Unavailable {
                    operation: String::new(),
                    key: String::new(),
                    reason: "connection reset".to_string(),
                }
                .into());
            }
            Ok(self.records.clone())
        }

        async fn watch(
            &self,
            namespace: &str,
            selector: &FieldSelector,
        ) -> ClusterIdResult<WatchStream> {
            self.seen
                .lock()
                .unwrap()
                .push((namespace.to_string(), selector.to_string()));
            let events: Vec<ClusterIdResult<WatchEvent>> = self
                .records
                .iter()
                .cloned()
                .map(|r| Ok(WatchEvent::added(r)))
                .collect();
            Ok(futures_util::stream::iter(events).boxed())
        }
    }

    fn key() -> RecordKey {
        RecordKey::new("kube-system", "ingress-uid")
    }

    #[tokio::test]
    async fn test_list_injects_name_selector() {
        let scope = SingleKeyWatchScope::new(RecordingLister::default(), key());
        scope
            .list("kube-system", &FieldSelector::everything())
            .await
            .unwrap();

        let seen = scope.inner().seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![(
                "kube-system".to_string(),
                "metadata.name=ingress-uid".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_watch_overrides_caller_name() {
        let scope = SingleKeyWatchScope::new(RecordingLister::default(), key());
        let _ = scope
            .watch("kube-system", &FieldSelector::name_equals("something-else"))
            .await
            .unwrap();

        let seen = scope.inner().seen.lock().unwrap().clone();
        assert_eq!(seen[0].1, "metadata.name=ingress-uid");
    }

    #[tokio::test]
    async fn test_list_one_returns_only_scoped_key() {
        let lister = RecordingLister {
            records: vec![
                IdentityRecord::new(RecordKey::new("other-ns", "ingress-uid"), RecordData::new()),
                IdentityRecord::provisioned(key(), "00112233aabbccdd"),
            ],
            ..Default::default()
        };
        let scope = SingleKeyWatchScope::new(lister, key());

        let record = scope.list_one().await.unwrap().unwrap();
        assert_eq!(record.key, key());
        assert_eq!(record.cluster_id(), Some("00112233aabbccdd"));
    }

    #[tokio::test]
    async fn test_list_one_missing_is_none() {
        let scope = SingleKeyWatchScope::new(RecordingLister::default(), key());
        assert!(scope.list_one().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_one_error_carries_context() {
        let lister = RecordingLister {
            fail: true,
            ..Default::default()
        };
        let scope = SingleKeyWatchScope::new(lister, key());

        match scope.list_one().await {
            Err(ClusterIdError::Storage(StorageError::Unavailable { operation, key, .. })) => {
                assert_eq!(operation, "list");
                assert_eq!(key, "kube-system/ingress-uid");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_watch_one_yields_events() {
        let lister = RecordingLister {
            records: vec![IdentityRecord::provisioned(key(), "aaaaaaaaaaaaaaaa")],
            ..Default::default()
        };
        let scope = SingleKeyWatchScope::new(lister, key());

        let events: Vec<_> = scope.watch_one().await.unwrap().collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].as_ref().unwrap().record.cluster_id(),
            Some("aaaaaaaaaaaaaaaa")
        );
    }
}

//! Public entry point.
//!
//! `ClusterIdService` owns one identity cache, the single-key watch scope
//! over the identity record, and the resolver. Call `start_watching` once,
//! then `get_id` / `get_federation_id` from any number of tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clusterid_core::{ClusterIdConfig, ClusterIdResult, IdentityError, OsTokenSource, TokenSource};
use clusterid_storage::{RecordLister, RecordWriter, SingleKeyWatchScope};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cache::IdentityCache;
use crate::pump::{WatchPump, WatchPumpMetrics, WatchPumpSnapshot};
use crate::resolver::IdentityResolver;

/// Cluster identity for one process.
pub struct ClusterIdService<L, W> {
    config: ClusterIdConfig,
    cache: Arc<IdentityCache>,
    scope: Arc<SingleKeyWatchScope<L>>,
    resolver: IdentityResolver<L, W>,
    metrics: Arc<WatchPumpMetrics>,
    started: AtomicBool,
}

impl<L, W> ClusterIdService<L, W>
where
    L: RecordLister + 'static,
    W: RecordWriter,
{
    /// Build a service over `lister` and `writer`. Fails if `config` is invalid.
    pub fn new(lister: L, writer: W, config: ClusterIdConfig) -> ClusterIdResult<Self> {
        Self::with_token_source(lister, writer, config, Arc::new(OsTokenSource))
    }

    /// Like [`ClusterIdService::new`] with a custom token source.
    pub fn with_token_source(
        lister: L,
        writer: W,
        config: ClusterIdConfig,
        tokens: Arc<dyn TokenSource>,
    ) -> ClusterIdResult<Self> {
        config.validate()?;

        let cache = Arc::new(IdentityCache::new());
        let scope = Arc::new(SingleKeyWatchScope::new(lister, config.record_key()));
        let resolver = IdentityResolver::with_token_source(
            Arc::clone(&cache),
            Arc::clone(&scope),
            writer,
            config.init_retry.clone(),
            tokens,
        );

        Ok(Self {
            config,
            cache,
            scope,
            resolver,
            metrics: Arc::new(WatchPumpMetrics::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Start the watch pump. Must be called once before reading the id.
    ///
    /// Returns after the initial listing has been applied and the cache is
    /// ready; the pump then keeps running in a background task. A second
    /// call fails with `AlreadyWatching`.
    pub async fn start_watching(&self) -> ClusterIdResult<WatchHandle> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(IdentityError::AlreadyWatching.into());
        }

        let mut pump = WatchPump::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.scope),
            self.config.rewatch_backoff,
            Arc::clone(&self.metrics),
        );
        let stream = match pump.prime().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(key = %self.scope.key(), error = %e, "Failed to start cluster id watch");
                self.started.store(false, Ordering::Release);
                return Err(e);
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(pump.run(stream, shutdown_rx));

        Ok(WatchHandle {
            shutdown_tx,
            join,
            metrics: Arc::clone(&self.metrics),
        })
    }

    /// See [`IdentityResolver::get_id`].
    pub async fn get_id(&self) -> ClusterIdResult<String> {
        self.resolver.get_id().await
    }

    /// See [`IdentityResolver::get_federation_id`].
    pub async fn get_federation_id(&self) -> ClusterIdResult<Option<String>> {
        self.resolver.get_federation_id().await
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    pub fn config(&self) -> &ClusterIdConfig {
        &self.config
    }

    pub fn metrics(&self) -> WatchPumpSnapshot {
        self.metrics.snapshot()
    }
}

/// Handle to a running watch pump.
///
/// Dropping the handle leaves the pump running.
#[derive(Debug)]
pub struct WatchHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<Arc<WatchPumpMetrics>>,
    metrics: Arc<WatchPumpMetrics>,
}

impl WatchHandle {
    pub fn metrics(&self) -> WatchPumpSnapshot {
        self.metrics.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the pump and wait for it to exit.
    pub async fn shutdown(self) -> WatchPumpSnapshot {
        let _ = self.shutdown_tx.send(true);
        match self.join.await {
            Ok(metrics) => metrics.snapshot(),
            Err(e) => {
                tracing::error!(error = %e, "Cluster id watch task failed");
                self.metrics.snapshot()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clusterid_core::{ClusterIdError, ConfigError, IdentityRecord};
    use clusterid_storage::InMemoryRecordStore;

    type MemService = ClusterIdService<Arc<InMemoryRecordStore>, Arc<InMemoryRecordStore>>;

    fn service(store: &Arc<InMemoryRecordStore>) -> MemService {
        ClusterIdService::new(
            Arc::clone(store),
            Arc::clone(store),
            ClusterIdConfig::development(),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let store = Arc::new(InMemoryRecordStore::new());
        let config = ClusterIdConfig::development().with_record("", "ingress-uid");
        let result = ClusterIdService::new(Arc::clone(&store), Arc::clone(&store), config);
        assert!(matches!(
            result,
            Err(ClusterIdError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[tokio::test]
    async fn test_start_watching_twice_fails() {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = service(&store);

        let handle = service.start_watching().await.unwrap();
        let err = service.start_watching().await.unwrap_err();
        assert_eq!(err, ClusterIdError::Identity(IdentityError::AlreadyWatching));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_get_id_after_start_creates_record() {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = service(&store);
        let handle = service.start_watching().await.unwrap();

        let id = service.get_id().await.unwrap();
        assert!(clusterid_core::is_valid_token(&id));
        assert_eq!(service.get_id().await.unwrap(), id);
        assert_eq!(service.get_federation_id().await.unwrap(), None);

        let stored = store
            .get(&service.config().record_key())
            .unwrap()
            .unwrap();
        assert_eq!(stored.cluster_id(), Some(id.as_str()));

        handle.shutdown().await;
        assert_eq!(store.stats().create_calls, 1);
    }

    #[tokio::test]
    async fn test_existing_record_is_ready_after_start() {
        let store = Arc::new(InMemoryRecordStore::new());
        let config = ClusterIdConfig::development();
        store
            .upsert(IdentityRecord::provisioned(config.record_key(), "00000000000000aa"))
            .unwrap();
        let service = service(&store);

        let handle = service.start_watching().await.unwrap();
        assert!(service.cache().is_ready());
        assert_eq!(service.get_id().await.unwrap(), "00000000000000aa");
        assert_eq!(service.metrics().events_applied, 1);

        let snapshot = handle.shutdown().await;
        assert_eq!(snapshot.events_applied, 1);
        assert_eq!(store.stats().create_calls, 0);
    }

    #[tokio::test]
    async fn test_dropped_handle_keeps_cache_live() {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = service(&store);
        drop(service.start_watching().await.unwrap());

        let id = service.get_id().await.unwrap();
        store
            .set_field(&service.config().record_key(), clusterid_core::PROVIDER_FIELD, "fed")
            .unwrap();

        for _ in 0..200 {
            if service.get_federation_id().await.unwrap().is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(service.get_id().await.unwrap(), "fed");
        assert_eq!(service.get_federation_id().await.unwrap(), Some(id));
    }
}

//! Identity resolution with lazy provisioning.
//!
//! `get_id` and `get_federation_id` read the cache, provisioning the
//! identity record on first use if no process has created it yet.
//!
//! # Get-or-create
//!
//! ```text
//! not ready ──→ NotInitialized
//! cached ─────→ done
//! list_one ───→ found: apply, done
//!          └──→ missing: create_if_absent(new token)
//!                 ├─ ok: apply, done
//!                 ├─ AlreadyExists: re-read with backoff until the winner's value lands
//!                 └─ other error: propagate
//! ```
//!
//! Across processes the storage layer picks exactly one winner. Within a
//! process, initializers are serialized so only one create is attempted.

use std::sync::Arc;

use clusterid_core::{
    ClusterIdResult, IdentityError, IdentityFields, IdentityRecord, OsTokenSource, RetryConfig,
    TokenSource,
};
use clusterid_storage::{RecordLister, RecordWriter, SingleKeyWatchScope};
use tokio::sync::Mutex;

use crate::cache::IdentityCache;

/// Resolves the cluster identity against the cache and shared storage.
pub struct IdentityResolver<L, W> {
    cache: Arc<IdentityCache>,
    scope: Arc<SingleKeyWatchScope<L>>,
    writer: W,
    tokens: Arc<dyn TokenSource>,
    retry: RetryConfig,
    init_lock: Mutex<()>,
}

impl<L, W> IdentityResolver<L, W>
where
    L: RecordLister,
    W: RecordWriter,
{
    pub fn new(
        cache: Arc<IdentityCache>,
        scope: Arc<SingleKeyWatchScope<L>>,
        writer: W,
        retry: RetryConfig,
    ) -> Self {
        Self::with_token_source(cache, scope, writer, retry, Arc::new(OsTokenSource))
    }

    pub fn with_token_source(
        cache: Arc<IdentityCache>,
        scope: Arc<SingleKeyWatchScope<L>>,
        writer: W,
        retry: RetryConfig,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            cache,
            scope,
            writer,
            tokens,
            retry,
            init_lock: Mutex::new(()),
        }
    }

    /// The id unique to this cluster.
    ///
    /// When a provider id is set and differs from the cluster id, the
    /// cluster is federated and the provider id is returned instead.
    pub async fn get_id(&self) -> ClusterIdResult<String> {
        let ids = self.resolve().await?;
        let cluster_id = self.require_cluster_id(&ids)?;
        Ok(effective_id(cluster_id, ids.provider_id.as_deref()).to_string())
    }

    /// The local cluster id if this cluster participates in a federation.
    ///
    /// Returns `None` when the provider id is absent or equal to the
    /// cluster id.
    pub async fn get_federation_id(&self) -> ClusterIdResult<Option<String>> {
        let ids = self.resolve().await?;
        let cluster_id = self.require_cluster_id(&ids)?;
        Ok(federated_cluster_id(cluster_id, ids.provider_id.as_deref()).map(str::to_string))
    }

    async fn resolve(&self) -> ClusterIdResult<IdentityFields> {
        self.get_or_initialize().await?;
        self.cache.snapshot()
    }

    fn require_cluster_id<'a>(&self, ids: &'a IdentityFields) -> ClusterIdResult<&'a str> {
        match ids.cluster_id.as_deref() {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(IdentityError::NotFound {
                key: self.scope.key().to_string(),
            }
            .into()),
        }
    }

    /// Make sure the cache holds the cluster id, creating the record if needed.
    async fn get_or_initialize(&self) -> ClusterIdResult<()> {
        if !self.cache.is_ready() {
            return Err(IdentityError::NotInitialized.into());
        }
        if self.cache.has_cluster_id()? {
            return Ok(());
        }

        let _guard = self.init_lock.lock().await;
        // Another task in this process may have finished while we waited.
        if self.cache.has_cluster_id()? {
            return Ok(());
        }

        if self.read_into_cache().await? {
            return Ok(());
        }

        let key = self.scope.key().to_string();
        let token = self.tokens.new_token()?;
        let record = IdentityRecord::provisioned(self.scope.key().clone(), &token);

        tracing::debug!(key = %key, cluster_id = %token, "Creating cluster id record");
        match self.writer.create_if_absent(&record).await {
            Ok(()) => {
                tracing::info!(key = %key, cluster_id = %token, "Created cluster id record");
                self.cache.set_from_record(&record.data)?;
                Ok(())
            }
            Err(err) if err.is_already_exists() => {
                tracing::warn!(
                    key = %key,
                    "Cluster id record created concurrently by another writer, adopting its value"
                );
                self.await_winner().await
            }
            Err(err) => {
                tracing::error!(key = %key, error = %err, "Failed to create cluster id record");
                Err(err.with_context("create", &key))
            }
        }
    }

    /// Read the record through the scope and apply it. Returns whether it existed.
    async fn read_into_cache(&self) -> ClusterIdResult<bool> {
        match self.scope.list_one().await? {
            Some(record) => {
                self.cache.apply_record(&record)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Poll until the winning writer's cluster id reaches the cache.
    async fn await_winner(&self) -> ClusterIdResult<()> {
        for attempt in 0..self.retry.max_retries {
            if self.cache.has_cluster_id()? {
                return Ok(());
            }
            if self.read_into_cache().await? && self.cache.has_cluster_id()? {
                return Ok(());
            }

            let delay = self.retry.backoff_for(attempt);
            tracing::debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Cluster id not visible yet, retrying"
            );
            tokio::time::sleep(delay).await;
        }

        if self.cache.has_cluster_id()? {
            return Ok(());
        }
        Err(IdentityError::NotFound {
            key: self.scope.key().to_string(),
        }
        .into())
    }
}

/// The id `get_id` reports for a known cluster id.
///
/// An empty provider id is treated as absent.
pub fn effective_id<'a>(cluster_id: &'a str, provider_id: Option<&'a str>) -> &'a str {
    match provider_id {
        Some(provider) if !provider.is_empty() && provider != cluster_id => provider,
        _ => cluster_id,
    }
}

/// The local cluster id when federated, `None` otherwise.
pub fn federated_cluster_id<'a>(cluster_id: &'a str, provider_id: Option<&str>) -> Option<&'a str> {
    match provider_id {
        Some(provider) if !provider.is_empty() && provider != cluster_id => Some(cluster_id),
        _ => None,
    }
}

//! Cluster Identity Test Utilities
//!
//! Shared test infrastructure for the cluster identity workspace:
//! - Deterministic and failing token sources
//! - A writer that holds every create until N callers arrive
//! - Proptest generators for records and identity fields
//! - Fixtures and assertions

// Re-export the shared in-memory store
pub use clusterid_storage::InMemoryRecordStore;

pub use clusterid_core::{
    is_valid_token, ClusterIdConfig, ClusterIdError, ClusterIdResult, IdentityError,
    IdentityFields, IdentityRecord, RecordData, RecordKey, RetryConfig, StorageError,
    TokenSource, CLUSTER_FIELD, DEFAULT_NAMESPACE, DEFAULT_RECORD_NAME, PROVIDER_FIELD,
};

use async_trait::async_trait;
use clusterid_storage::RecordWriter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Barrier;

// ============================================================================
// MOCK PROVIDERS
// ============================================================================

/// Token source yielding `0000000000000001`, `0000000000000002`, ...
#[derive(Debug, Default)]
pub struct SequenceTokenSource {
    next: AtomicU64,
}

impl SequenceTokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the sequence after `start`.
    pub fn starting_at(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    /// Number of tokens handed out so far.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

impl TokenSource for SequenceTokenSource {
    fn new_token(&self) -> ClusterIdResult<String> {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("{:016x}", n))
    }
}

/// Token source whose entropy is always exhausted.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingTokenSource;

impl TokenSource for FailingTokenSource {
    fn new_token(&self) -> ClusterIdResult<String> {
        Err(IdentityError::EntropyUnavailable {
            reason: "entropy source exhausted".to_string(),
        }
        .into())
    }
}

/// Writer that parks each create until `barrier` trips, then delegates.
///
/// Give every competing service its own `GatedWriter` over one shared
/// barrier sized to the number of services, so all creates race at once.
#[derive(Debug, Clone)]
pub struct GatedWriter<W> {
    inner: W,
    barrier: Arc<Barrier>,
}

impl<W> GatedWriter<W> {
    pub fn new(inner: W, barrier: Arc<Barrier>) -> Self {
        Self { inner, barrier }
    }
}

#[async_trait]
impl<W: RecordWriter> RecordWriter for GatedWriter<W> {
    async fn create_if_absent(&self, record: &IdentityRecord) -> ClusterIdResult<()> {
        self.barrier.wait().await;
        self.inner.create_if_absent(record).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for identity records.

    use super::*;
    use proptest::prelude::*;

    /// A well-formed identity token.
    pub fn arb_token() -> impl Strategy<Value = String> {
        "[0-9a-f]{16}"
    }

    pub fn arb_record_key() -> impl Strategy<Value = RecordKey> {
        ("[a-z][a-z0-9-]{0,15}", "[a-z][a-z0-9-]{0,15}")
            .prop_map(|(namespace, name)| RecordKey::new(namespace, name))
    }

    /// One identity field: a token, an empty string, or absent.
    pub fn arb_optional_field() -> impl Strategy<Value = Option<String>> {
        prop_oneof![
            2 => arb_token().prop_map(Some),
            1 => Just(Some(String::new())),
            1 => Just(None),
        ]
    }

    /// Identity fields where either side may be absent or empty.
    pub fn arb_identity_fields() -> impl Strategy<Value = IdentityFields> {
        (arb_optional_field(), arb_optional_field())
            .prop_map(|(cluster_id, provider_id)| IdentityFields::new(cluster_id, provider_id))
    }

    /// Record data carrying `arb_identity_fields` plus unrelated keys.
    pub fn arb_record_data() -> impl Strategy<Value = RecordData> {
        (
            arb_identity_fields(),
            prop::collection::btree_map("[a-z]{1,8}", "[ -~]{0,12}", 0..4),
        )
            .prop_map(|(fields, extra)| {
                let mut data: RecordData = extra
                    .into_iter()
                    .filter(|(k, _)| k != CLUSTER_FIELD && k != PROVIDER_FIELD)
                    .collect();
                if let Some(c) = fields.cluster_id {
                    data.insert(CLUSTER_FIELD.to_string(), c);
                }
                if let Some(p) = fields.provider_id {
                    data.insert(PROVIDER_FIELD.to_string(), p);
                }
                data
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;
    use std::time::Duration;

    /// The default identity record location.
    pub fn identity_key() -> RecordKey {
        RecordKey::new(DEFAULT_NAMESPACE, DEFAULT_RECORD_NAME)
    }

    /// Record data with the given fields; `None` leaves the key out.
    pub fn record_data(cluster: Option<&str>, provider: Option<&str>) -> RecordData {
        let mut data = RecordData::new();
        if let Some(c) = cluster {
            data.insert(CLUSTER_FIELD.to_string(), c.to_string());
        }
        if let Some(p) = provider {
            data.insert(PROVIDER_FIELD.to_string(), p.to_string());
        }
        data
    }

    /// A record as written by the first process to provision it.
    pub fn provisioned_record(token: &str) -> IdentityRecord {
        IdentityRecord::provisioned(identity_key(), token)
    }

    /// A record whose provider id names a federation.
    pub fn federated_record(cluster: &str, provider: &str) -> IdentityRecord {
        IdentityRecord::new(identity_key(), record_data(Some(cluster), Some(provider)))
    }

    /// A fresh store shared between services.
    pub fn shared_store() -> Arc<InMemoryRecordStore> {
        Arc::new(InMemoryRecordStore::new())
    }

    /// Service configuration with millisecond backoffs.
    pub fn fast_config() -> ClusterIdConfig {
        let mut config = ClusterIdConfig::development();
        config.init_retry = RetryConfig {
            max_retries: 50,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(20),
            backoff_multiplier: 2.0,
        };
        config.rewatch_backoff = Duration::from_millis(5);
        config
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on identity values.

    use super::*;

    /// Panic unless `id` is a 16-character lowercase hex token.
    pub fn assert_valid_token(id: &str) {
        assert!(is_valid_token(id), "not a valid identity token: {:?}", id);
    }

    /// Panic unless every id in `ids` is identical and non-empty.
    pub fn assert_single_identity(ids: &[String]) {
        let first = ids.first().expect("no identities to compare");
        assert!(!first.is_empty(), "empty identity");
        for id in ids {
            assert_eq!(id, first, "callers disagree on the cluster identity");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

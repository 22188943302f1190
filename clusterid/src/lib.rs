//! Cluster Identity
//!
//! A stable, unique identifier for the cluster this process runs in, backed
//! by one shared record in replicated storage. The record is provisioned
//! lazily: the first process that asks for the id and finds no record
//! creates one, and every other process converges on that value.
//!
//! ```ignore
//! use clusterid::{ClusterIdConfig, ClusterIdService};
//!
//! let service = ClusterIdService::new(lister, writer, ClusterIdConfig::from_env())?;
//! let watch = service.start_watching().await?;
//! let id = service.get_id().await?;
//! let federated = service.get_federation_id().await?;
//! ```

pub mod cache;
pub mod pump;
pub mod resolver;
pub mod service;
pub mod telemetry;

pub use cache::IdentityCache;
pub use pump::{decide, AppliedState, EventDecision, WatchPump, WatchPumpMetrics, WatchPumpSnapshot};
pub use resolver::{effective_id, federated_cluster_id, IdentityResolver};
pub use service::{ClusterIdService, WatchHandle};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};

pub use clusterid_core::{
    ClusterIdConfig, ClusterIdError, ClusterIdResult, ConfigError, IdentityError, RetryConfig,
    StorageError,
};

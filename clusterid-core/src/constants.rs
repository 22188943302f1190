//! Constants for cluster identity
//!
//! Record layout and default tuning values live here so tests and the
//! configuration layer agree on them.

use std::time::Duration;

// ============================================================================
// RECORD LAYOUT
// ============================================================================

/// Namespace holding the identity record.
pub const DEFAULT_NAMESPACE: &str = "kube-system";

/// Name of the identity record within its namespace.
pub const DEFAULT_RECORD_NAME: &str = "ingress-uid";

/// Data key of the per-cluster identity.
pub const CLUSTER_FIELD: &str = "uid";

/// Data key of the provider (federation) identity.
pub const PROVIDER_FIELD: &str = "provider-uid";

/// Selector field used to narrow list/watch calls to one record.
pub const NAME_SELECTOR_FIELD: &str = "metadata.name";

// ============================================================================
// TOKENS
// ============================================================================

/// Random bytes per identity token (hex-encoded to twice this length).
pub const TOKEN_LENGTH_BYTES: usize = 8;

// ============================================================================
// RETRY / BACKOFF
// ============================================================================

/// Reads attempted after losing the create race before giving up.
pub const DEFAULT_INIT_MAX_RETRIES: u32 = 10;

/// First delay between convergence reads.
pub const DEFAULT_INIT_BACKOFF: Duration = Duration::from_millis(50);

/// Upper bound on the delay between convergence reads.
pub const DEFAULT_INIT_MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Growth factor between convergence reads.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Delay before re-listing after the watch stream ends.
pub const DEFAULT_REWATCH_BACKOFF: Duration = Duration::from_secs(1);

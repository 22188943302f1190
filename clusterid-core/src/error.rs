//! Error types for cluster identity operations

use thiserror::Error;

/// Storage collaborator errors.
///
/// Every variant that originates from a collaborator carries the operation
/// and record key so a failure can be diagnosed without retrying.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Record already exists: {key}")]
    AlreadyExists { key: String },

    #[error("Storage unavailable during {operation} on {key}: {reason}")]
    Unavailable {
        operation: String,
        key: String,
        reason: String,
    },

    #[error("Storage rejected {operation} on {key}: {reason}")]
    Rejected {
        operation: String,
        key: String,
        reason: String,
    },

    #[error("Watch stream closed for {key}")]
    WatchClosed { key: String },

    #[error("Identity lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    /// Attach operation and key context to an error that was raised without it.
    ///
    /// Errors that already name a key are returned unchanged.
    pub fn with_context(self, operation: &str, key: &str) -> Self {
        match self {
            Self::Unavailable {
                operation: op,
                key: k,
                reason,
            } if op.is_empty() || k.is_empty() => Self::Unavailable {
                operation: if op.is_empty() { operation.to_string() } else { op },
                key: if k.is_empty() { key.to_string() } else { k },
                reason,
            },
            Self::Rejected {
                operation: op,
                key: k,
                reason,
            } if op.is_empty() || k.is_empty() => Self::Rejected {
                operation: if op.is_empty() { operation.to_string() } else { op },
                key: if k.is_empty() { key.to_string() } else { k },
                reason,
            },
            Self::AlreadyExists { key: k } if k.is_empty() => Self::AlreadyExists {
                key: key.to_string(),
            },
            Self::WatchClosed { key: k } if k.is_empty() => Self::WatchClosed {
                key: key.to_string(),
            },
            other => other,
        }
    }
}

/// Identity protocol errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Cluster identity is not ready; call start_watching() before reading it")]
    NotInitialized,

    #[error("Cluster identity watch already started")]
    AlreadyWatching,

    #[error("Could not retrieve cluster id from {key}")]
    NotFound { key: String },

    #[error("Entropy unavailable for token generation: {reason}")]
    EntropyUnavailable { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for cluster identity.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterIdError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl ClusterIdError {
    /// True when another writer won the create race.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::Storage(StorageError::AlreadyExists { .. }))
    }

    /// Fill in operation and key on storage errors raised without them.
    pub fn with_context(self, operation: &str, key: &str) -> Self {
        match self {
            Self::Storage(err) => Self::Storage(err.with_context(operation, key)),
            other => other,
        }
    }
}

/// Result type alias for cluster identity operations.
pub type ClusterIdResult<T> = Result<T, ClusterIdError>;

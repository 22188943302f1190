//! Cluster identity core types
//!
//! Record model, field selectors, error taxonomy, configuration and random
//! token generation shared by the storage and service crates.

pub mod config;
pub mod constants;
pub mod error;
pub mod record;
pub mod selector;
pub mod token;

pub use config::{ClusterIdConfig, RetryConfig};
pub use constants::*;
pub use error::{ClusterIdError, ClusterIdResult, ConfigError, IdentityError, StorageError};
pub use record::{IdentityFields, IdentityRecord, RecordData, RecordKey};
pub use selector::{FieldSelector, SelectorParseError};
pub use token::{is_valid_token, new_token, new_token_from, OsTokenSource, TokenSource};

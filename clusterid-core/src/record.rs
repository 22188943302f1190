//! Identity record types.
//!
//! The identity record is a small key/value entity in shared storage. Only
//! two data keys matter here: the per-cluster id and the provider id. Either
//! may be absent independently.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::constants::{CLUSTER_FIELD, PROVIDER_FIELD};

/// Field name to value mapping stored in the identity record.
pub type RecordData = BTreeMap<String, String>;

/// Namespaced name of a record in shared storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub namespace: String,
    pub name: String,
}

impl RecordKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A record as seen through list and watch calls.
///
/// `revision` is assigned by storage on every write and grows in commit
/// order. Zero means the record has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub key: RecordKey,
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub data: RecordData,
}

impl IdentityRecord {
    pub fn new(key: RecordKey, data: RecordData) -> Self {
        Self {
            key,
            revision: 0,
            data,
        }
    }

    /// Same record stamped with a storage revision.
    pub fn at_revision(mut self, revision: u64) -> Self {
        self.revision = revision;
        self
    }

    /// Build a freshly provisioned record where both ids carry `token`.
    pub fn provisioned(key: RecordKey, token: &str) -> Self {
        let mut data = RecordData::new();
        data.insert(CLUSTER_FIELD.to_string(), token.to_string());
        data.insert(PROVIDER_FIELD.to_string(), token.to_string());
        Self::new(key, data)
    }

    /// The per-cluster id, if the record carries one.
    pub fn cluster_id(&self) -> Option<&str> {
        self.data.get(CLUSTER_FIELD).map(String::as_str)
    }

    /// The provider id, if the record carries one.
    pub fn provider_id(&self) -> Option<&str> {
        self.data.get(PROVIDER_FIELD).map(String::as_str)
    }
}

/// The two identity fields projected out of a record.
///
/// `None` means "never observed", which is distinct from an observed empty
/// string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityFields {
    pub cluster_id: Option<String>,
    pub provider_id: Option<String>,
}

impl IdentityFields {
    pub fn new(cluster_id: Option<String>, provider_id: Option<String>) -> Self {
        Self {
            cluster_id,
            provider_id,
        }
    }

    /// Project the identity fields out of raw record data.
    pub fn from_data(data: &RecordData) -> Self {
        Self {
            cluster_id: data.get(CLUSTER_FIELD).cloned(),
            provider_id: data.get(PROVIDER_FIELD).cloned(),
        }
    }

    /// True once a non-empty cluster id is known.
    pub fn has_cluster_id(&self) -> bool {
        self.cluster_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    /// Overlay the fields present in `other`; absent fields are left alone.
    ///
    /// An empty cluster id never replaces a known one.
    pub fn merge(&mut self, other: &IdentityFields) {
        if let Some(cluster_id) = &other.cluster_id {
            if !cluster_id.is_empty() || !self.has_cluster_id() {
                self.cluster_id = Some(cluster_id.clone());
            }
        }
        if let Some(provider_id) = &other.provider_id {
            self.provider_id = Some(provider_id.clone());
        }
    }
}

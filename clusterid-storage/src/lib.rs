//! Cluster identity storage capabilities
//!
//! Defines what the identity protocol needs from shared storage, the
//! single-record scope that narrows list/watch calls, and an in-memory
//! store for tests and local runs.

pub mod memory;
pub mod scope;
pub mod traits;

pub use memory::{InMemoryRecordStore, StoreStats};
pub use scope::SingleKeyWatchScope;
pub use traits::{RecordLister, RecordWriter, WatchEvent, WatchEventKind, WatchStream};

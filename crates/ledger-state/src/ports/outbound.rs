//! # Outbound Ports (Driven Ports)
//!
//! Dependencies the ledger requires the host application to implement.
//!
//! The only driven port is the key-value backing store underneath the three
//! cached keyspaces. Anything that can answer point reads and prefix scans
//! qualifies; the in-memory adapter in `adapters::memory` is the test
//! implementation.

use crate::domain::errors::KvStoreError;

/// Abstract interface for key-value database operations.
///
/// Production: an embedded LSM/B-tree store behind the host runtime.
/// Testing: `InMemoryKvStore` in `adapters::memory`.
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvStoreError>;

    /// Put a single key-value pair.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KvStoreError>;

    /// Delete a key.
    fn delete(&mut self, key: &[u8]) -> Result<(), KvStoreError>;

    /// Check if a key exists.
    fn exists(&self, key: &[u8]) -> Result<bool, KvStoreError>;

    /// Return all pairs whose keys start with `prefix`.
    ///
    /// No ordering is required of the implementation; the cached keyspaces
    /// sort scan results before streaming them to callers.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvStoreError>;
}

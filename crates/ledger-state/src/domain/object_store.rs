//! # Cached Object Store
//!
//! A keyed persistent store with a reference-counted in-memory cache, one
//! instance per keyspace. Records live behind [`CachedHandle`]s:
//!
//! - `load` returns a handle whose `exists()` is false when no record is
//!   present (the miss is cached while the handle lives).
//! - `store` persists and caches; `prepare` caches without persisting, and
//!   the record hits the backing store only on a later `commit()` through
//!   the handle.
//! - Handles retain the cache slot; dropping the last handle evicts it. A
//!   prepared record whose handles are dropped before `commit()` is
//!   discarded, which is exactly the lifecycle aggregated realities need.
//!
//! ## Locking
//!
//! Per-keyspace cache mutex, per-slot reader/writer lock, shared backing
//! store lock, always taken in that order. Mutating a record through
//! [`CachedHandle::update`] holds the slot write lock across the backing
//! write, so two threads updating the same record serialize and the second
//! observes the first's effect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::domain::errors::{KvStoreError, LedgerError};
use crate::ports::outbound::KeyValueStore;

/// Shared handle to the key-value backing store, used by all keyspaces of a
/// ledger instance.
pub type SharedKv = Arc<RwLock<Box<dyn KeyValueStore>>>;

/// Wraps a backing store implementation for use by the keyspaces.
pub fn shared_backing(store: impl KeyValueStore + 'static) -> SharedKv {
    Arc::new(RwLock::new(Box::new(store)))
}

/// A record that can live in a cached keyspace.
pub trait StorableObject: Clone + Send + Sync + Sized {
    /// The keyspace-local storage key (without the keyspace realm).
    fn storage_key(&self) -> Vec<u8>;

    /// The marshaled value stored under the key.
    fn marshal_value(&self) -> Vec<u8>;

    /// Reconstructs a record from its storage key and marshaled value.
    fn unmarshal(key: &[u8], value: &[u8]) -> Result<Self, KvStoreError>;
}

struct SlotState<T> {
    record: Option<Arc<T>>,
    persisted: bool,
}

struct Slot<T> {
    refs: AtomicUsize,
    state: RwLock<SlotState<T>>,
}

impl<T> Slot<T> {
    fn empty() -> Arc<Self> {
        Arc::new(Slot {
            refs: AtomicUsize::new(0),
            state: RwLock::new(SlotState {
                record: None,
                persisted: false,
            }),
        })
    }
}

struct StoreInner<T> {
    realm: Vec<u8>,
    backing: SharedKv,
    cache: Mutex<HashMap<Vec<u8>, Arc<Slot<T>>>>,
}

impl<T> StoreInner<T> {
    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.realm.len() + key.len());
        full.extend_from_slice(&self.realm);
        full.extend_from_slice(key);
        full
    }
}

/// One cached keyspace of the ledger.
pub struct ObjectStore<T: StorableObject> {
    inner: Arc<StoreInner<T>>,
}

impl<T: StorableObject> ObjectStore<T> {
    pub fn new(backing: SharedKv, realm: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                realm: realm.into(),
                backing,
                cache: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Loads the record under `key`, returning a retained handle. The handle
    /// reports `exists() == false` when no record is stored.
    pub fn load(&self, key: &[u8]) -> Result<CachedHandle<T>, LedgerError> {
        let mut cache = self.inner.cache.lock();
        if let Some(slot) = cache.get(key) {
            slot.refs.fetch_add(1, Ordering::SeqCst);
            return Ok(CachedHandle::new(key.to_vec(), slot.clone(), &self.inner));
        }

        let stored = self
            .inner
            .backing
            .read()
            .get(&self.inner.full_key(key))
            .map_err(LedgerError::from)?;
        let (record, persisted) = match stored {
            Some(value) => (Some(Arc::new(T::unmarshal(key, &value)?)), true),
            None => (None, false),
        };

        let slot = Arc::new(Slot {
            refs: AtomicUsize::new(1),
            state: RwLock::new(SlotState { record, persisted }),
        });
        cache.insert(key.to_vec(), slot.clone());
        Ok(CachedHandle {
            key: key.to_vec(),
            slot,
            store: self.inner.clone(),
        })
    }

    /// Persists `record` and returns a retained handle to it.
    pub fn store(&self, record: T) -> Result<CachedHandle<T>, LedgerError> {
        let key = record.storage_key();
        let value = record.marshal_value();

        let handle = {
            let mut cache = self.inner.cache.lock();
            let slot = cache.entry(key.clone()).or_insert_with(Slot::empty).clone();
            slot.refs.fetch_add(1, Ordering::SeqCst);
            {
                let mut state = slot.state.write();
                state.record = Some(Arc::new(record));
                state.persisted = true;
            }
            CachedHandle {
                key: key.clone(),
                slot,
                store: self.inner.clone(),
            }
        };

        self.inner
            .backing
            .write()
            .put(&self.inner.full_key(&key), &value)
            .map_err(LedgerError::from)?;
        Ok(handle)
    }

    /// Caches `record` in memory without persisting it. The record reaches
    /// the backing store only when `commit()` is called on the handle; if
    /// every handle is dropped first, the record is discarded.
    ///
    /// When a record already lives under the key, that record is retained
    /// instead.
    pub fn prepare(&self, record: T) -> CachedHandle<T> {
        let key = record.storage_key();
        let mut cache = self.inner.cache.lock();
        let slot = cache.entry(key.clone()).or_insert_with(Slot::empty).clone();
        slot.refs.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = slot.state.write();
            if state.record.is_none() {
                state.record = Some(Arc::new(record));
                state.persisted = false;
            }
        }
        CachedHandle {
            key,
            slot,
            store: self.inner.clone(),
        }
    }

    /// Streams `(key, handle)` pairs whose keys start with `prefix`, in
    /// lexicographic key order. The callback returns whether to continue.
    pub fn for_each(
        &self,
        prefix: Option<&[u8]>,
        mut callback: impl FnMut(&[u8], CachedHandle<T>) -> bool,
    ) -> Result<(), LedgerError> {
        let scan_prefix = self.inner.full_key(prefix.unwrap_or_default());
        let mut entries = self
            .inner
            .backing
            .read()
            .prefix_scan(&scan_prefix)
            .map_err(LedgerError::from)?;
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        for (full_key, value) in entries {
            let key = full_key[self.inner.realm.len()..].to_vec();
            let handle = self.handle_for(&key, &value)?;
            if !callback(&key, handle) {
                break;
            }
        }
        Ok(())
    }

    /// Drops every record of this keyspace, cached and persisted.
    pub fn prune(&self) -> Result<(), LedgerError> {
        self.inner.cache.lock().clear();

        let keys: Vec<Vec<u8>> = self
            .inner
            .backing
            .read()
            .prefix_scan(&self.inner.realm)
            .map_err(LedgerError::from)?
            .into_iter()
            .map(|(key, _)| key)
            .collect();

        let mut backing = self.inner.backing.write();
        for key in keys {
            backing.delete(&key).map_err(LedgerError::from)?;
        }
        Ok(())
    }

    /// Number of cache slots currently retained by live handles. Handles
    /// that are dropped release their slot, so a quiescent store reports 0.
    pub fn cached_len(&self) -> usize {
        self.inner.cache.lock().len()
    }

    fn handle_for(&self, key: &[u8], value: &[u8]) -> Result<CachedHandle<T>, LedgerError> {
        let mut cache = self.inner.cache.lock();
        if let Some(slot) = cache.get(key) {
            slot.refs.fetch_add(1, Ordering::SeqCst);
            return Ok(CachedHandle::new(key.to_vec(), slot.clone(), &self.inner));
        }
        let record = Arc::new(T::unmarshal(key, value)?);
        let slot = Arc::new(Slot {
            refs: AtomicUsize::new(1),
            state: RwLock::new(SlotState {
                record: Some(record),
                persisted: true,
            }),
        });
        cache.insert(key.to_vec(), slot.clone());
        Ok(CachedHandle {
            key: key.to_vec(),
            slot,
            store: self.inner.clone(),
        })
    }
}

/// Retained handle to a cache slot. Cloning retains again; dropping releases
/// exactly once, and the last release evicts the slot.
pub struct CachedHandle<T: StorableObject> {
    key: Vec<u8>,
    slot: Arc<Slot<T>>,
    store: Arc<StoreInner<T>>,
}

impl<T: StorableObject> std::fmt::Debug for CachedHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedHandle").field("key", &self.key).finish()
    }
}

impl<T: StorableObject> CachedHandle<T> {
    fn new(key: Vec<u8>, slot: Arc<Slot<T>>, store: &Arc<StoreInner<T>>) -> Self {
        Self {
            key,
            slot,
            store: store.clone(),
        }
    }

    /// The keyspace-local storage key of this slot.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Whether a record is present under this key.
    pub fn exists(&self) -> bool {
        self.slot.state.read().record.is_some()
    }

    /// Shared snapshot of the record, if present.
    pub fn get(&self) -> Option<Arc<T>> {
        self.slot.state.read().record.clone()
    }

    /// Whether the record has reached the backing store.
    pub fn is_persisted(&self) -> bool {
        self.slot.state.read().persisted
    }

    /// Persists a prepared record. A no-op when already persisted.
    pub fn commit(&self) -> Result<(), LedgerError> {
        let mut state = self.slot.state.write();
        if state.persisted {
            return Ok(());
        }
        let record = state.record.clone().ok_or_else(|| LedgerError::StorageFault {
            message: "commit on a handle without a record".to_string(),
        })?;
        self.store
            .backing
            .write()
            .put(&self.store.full_key(&self.key), &record.marshal_value())
            .map_err(LedgerError::from)?;
        state.persisted = true;
        Ok(())
    }

    /// Applies `mutate` to the record and persists the result, atomically
    /// with respect to other handles of the same slot.
    pub fn update<R>(&self, mutate: impl FnOnce(&mut T) -> R) -> Result<R, LedgerError> {
        let mut state = self.slot.state.write();
        let current = state.record.clone().ok_or_else(|| LedgerError::StorageFault {
            message: "update on a handle without a record".to_string(),
        })?;
        let mut updated = (*current).clone();
        let result = mutate(&mut updated);
        self.store
            .backing
            .write()
            .put(&self.store.full_key(&self.key), &updated.marshal_value())
            .map_err(LedgerError::from)?;
        state.record = Some(Arc::new(updated));
        state.persisted = true;
        Ok(result)
    }
}

impl<T: StorableObject> Clone for CachedHandle<T> {
    fn clone(&self) -> Self {
        self.slot.refs.fetch_add(1, Ordering::SeqCst);
        Self {
            key: self.key.clone(),
            slot: self.slot.clone(),
            store: self.store.clone(),
        }
    }
}

impl<T: StorableObject> Drop for CachedHandle<T> {
    fn drop(&mut self) {
        if self.slot.refs.fetch_sub(1, Ordering::SeqCst) != 1 {
            return;
        }
        // Last handle gone: evict, unless a concurrent load retained the
        // slot again before we took the cache lock.
        let mut cache = self.store.cache.lock();
        if self.slot.refs.load(Ordering::SeqCst) == 0 {
            if let Some(current) = cache.get(&self.key) {
                if Arc::ptr_eq(current, &self.slot) {
                    cache.remove(&self.key);
                }
            }
        }
    }
}

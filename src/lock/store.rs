//! Narrow storage view for the distributed lock.
//!
//! The lock algorithm only needs read / create-if-absent / delete /
//! list, so it is isolated behind [`LockStore`] and tested against the
//! in-memory implementation. The production implementation maps lock
//! keys onto `locks/{key}.json` objects in the [`ObjectStore`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::errors::StoreError;
use crate::store::backend::AccessPolicy;
use crate::store::client::ObjectStore;

use super::LockEntry;

/// Key namespace for lock entries in the object store.
pub const LOCK_KEY_PREFIX: &str = "locks/";

/// Map a logical lock key to its object key.
pub fn object_key(lock_key: &str) -> String {
    format!("{LOCK_KEY_PREFIX}{lock_key}.json")
}

/// Recover the logical lock key from an object key, if it is one.
pub fn lock_key_from_object_key(key: &str) -> Option<&str> {
    key.strip_prefix(LOCK_KEY_PREFIX)?.strip_suffix(".json")
}

/// Storage contract for the lock algorithm.
pub trait LockStore: Send + Sync + 'static {
    /// Read the current entry for `lock_key`, if any.
    fn read(
        &self,
        lock_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<LockEntry>, StoreError>> + Send + '_>>;

    /// Atomically create an entry for `lock_key`. Returns `false` when
    /// an entry already exists (the race was lost), `Err` on any other
    /// backend failure.
    fn create_if_absent(
        &self,
        lock_key: &str,
        entry: &LockEntry,
    ) -> Pin<Box<dyn Future<Output = Result<bool, StoreError>> + Send + '_>>;

    /// Delete the entry for `lock_key`. Absent entries are not an error.
    fn delete(
        &self,
        lock_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// List every logical lock key currently stored.
    fn list(&self)
        -> Pin<Box<dyn Future<Output = Result<Vec<String>, StoreError>> + Send + '_>>;
}

// ── Object-store implementation ────────────────────────────────────

/// [`LockStore`] over the real object store.
pub struct ObjectLockStore {
    store: Arc<ObjectStore>,
}

impl ObjectLockStore {
    pub fn new(store: Arc<ObjectStore>) -> Self {
        Self { store }
    }
}

impl LockStore for ObjectLockStore {
    fn read(
        &self,
        lock_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<LockEntry>, StoreError>> + Send + '_>> {
        let key = object_key(lock_key);
        Box::pin(async move {
            match self.store.read_object_checked(&key).await? {
                Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
                None => Ok(None),
            }
        })
    }

    fn create_if_absent(
        &self,
        lock_key: &str,
        entry: &LockEntry,
    ) -> Pin<Box<dyn Future<Output = Result<bool, StoreError>> + Send + '_>> {
        let key = object_key(lock_key);
        let body = serde_json::to_vec(entry);
        Box::pin(async move {
            let body = Bytes::from(body?);
            match self
                .store
                .write_object_if_absent(&key, body, "application/json", AccessPolicy::Private)
                .await
            {
                Ok(()) => Ok(true),
                Err(StoreError::PreconditionFailed { .. }) => Ok(false),
                Err(err) => Err(err),
            }
        })
    }

    fn delete(
        &self,
        lock_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let key = object_key(lock_key);
        Box::pin(async move { self.store.delete_object_checked(&key).await })
    }

    fn list(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let keys = self.store.list_objects_checked(LOCK_KEY_PREFIX).await?;
            Ok(keys
                .iter()
                .filter_map(|k| lock_key_from_object_key(k))
                .map(str::to_string)
                .collect())
        })
    }
}

// ── In-memory implementation ───────────────────────────────────────

/// In-memory [`LockStore`] with failure injection. Used by the lock
/// tests and usable as an ephemeral single-process store.
#[derive(Default)]
pub struct InMemoryLockStore {
    entries: Mutex<HashMap<String, LockEntry>>,
    fail_reads: AtomicBool,
    fail_creates: AtomicBool,
    /// When set, a successful conditional create is immediately
    /// overwritten with this entry -- models a backend whose
    /// conditional semantics are weaker than advertised.
    overwrite_after_create: Mutex<Option<LockEntry>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent reads fail with a backend error.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent conditional creates fail with a backend error
    /// (not a lost race).
    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// Clobber the next successful conditional create with `entry`.
    pub fn overwrite_after_create(&self, entry: LockEntry) {
        *self
            .overwrite_after_create
            .lock()
            .expect("lock map poisoned") = Some(entry);
    }

    /// Seed an entry directly, bypassing the conditional-create path.
    pub fn insert(&self, lock_key: &str, entry: LockEntry) {
        self.entries
            .lock()
            .expect("lock map poisoned")
            .insert(lock_key.to_string(), entry);
    }

    pub fn entry(&self, lock_key: &str) -> Option<LockEntry> {
        self.entries
            .lock()
            .expect("lock map poisoned")
            .get(lock_key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("lock map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn injected_failure() -> StoreError {
        StoreError::Backend(crate::errors::BackendError::other(
            false,
            anyhow::anyhow!("injected backend failure"),
        ))
    }
}

impl LockStore for InMemoryLockStore {
    fn read(
        &self,
        lock_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<LockEntry>, StoreError>> + Send + '_>> {
        let lock_key = lock_key.to_string();
        Box::pin(async move {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(Self::injected_failure());
            }
            Ok(self
                .entries
                .lock()
                .expect("lock map poisoned")
                .get(&lock_key)
                .cloned())
        })
    }

    fn create_if_absent(
        &self,
        lock_key: &str,
        entry: &LockEntry,
    ) -> Pin<Box<dyn Future<Output = Result<bool, StoreError>> + Send + '_>> {
        let lock_key = lock_key.to_string();
        let entry = entry.clone();
        Box::pin(async move {
            if self.fail_creates.load(Ordering::SeqCst) {
                return Err(Self::injected_failure());
            }
            let mut entries = self.entries.lock().expect("lock map poisoned");
            if entries.contains_key(&lock_key) {
                return Ok(false);
            }
            let stored = self
                .overwrite_after_create
                .lock()
                .expect("lock map poisoned")
                .take()
                .unwrap_or(entry);
            entries.insert(lock_key, stored);
            Ok(true)
        })
    }

    fn delete(
        &self,
        lock_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let lock_key = lock_key.to_string();
        Box::pin(async move {
            self.entries
                .lock()
                .expect("lock map poisoned")
                .remove(&lock_key);
            Ok(())
        })
    }

    fn list(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut keys: Vec<String> = self
                .entries
                .lock()
                .expect("lock map poisoned")
                .keys()
                .cloned()
                .collect();
            keys.sort();
            Ok(keys)
        })
    }
}

// -- Tests --------------------------------------------------------------------

// src/store.rs

use crate::error::SvdError;
use crate::left_vectors::LeftSingularVectors;
use crate::model::SvdModel;
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A value published by a finished job.
#[derive(Clone, Debug)]
pub enum StoredValue {
    Model(Arc<SvdModel>),
    LeftVectors(Arc<LeftSingularVectors>),
}

impl StoredValue {
    pub fn as_model(&self) -> Option<&Arc<SvdModel>> {
        match self {
            StoredValue::Model(m) => Some(m),
            StoredValue::LeftVectors(_) => None,
        }
    }

    pub fn as_left_vectors(&self) -> Option<&Arc<LeftSingularVectors>> {
        match self {
            StoredValue::LeftVectors(u) => Some(u),
            StoredValue::Model(_) => None,
        }
    }
}

/// Shared key-value store with per-key exclusive locks.
pub trait ModelStore: Send + Sync {
    /// Takes the lock on `key` for `owner`. Fails if any owner already holds it.
    fn try_lock(&self, key: &str, owner: &str) -> Result<(), SvdError>;

    /// Releases the lock on `key` if `owner` holds it.
    fn unlock(&self, key: &str, owner: &str);

    /// Current holder of the lock on `key`.
    fn lock_owner(&self, key: &str) -> Option<String>;

    fn put(&self, key: &str, value: StoredValue);

    fn get(&self, key: &str) -> Option<StoredValue>;

    fn remove(&self, key: &str) -> Option<StoredValue>;
}

/// Holds a store lock for its lifetime.
pub struct ExclusiveLock<'a, S: ModelStore + ?Sized> {
    store: &'a S,
    key: String,
    owner: String,
}

impl<'a, S: ModelStore + ?Sized> ExclusiveLock<'a, S> {
    pub fn acquire(store: &'a S, key: &str, owner: &str) -> Result<Self, SvdError> {
        store.try_lock(key, owner)?;
        trace!("{} locked '{}'", owner, key);
        Ok(Self { store, key: key.to_string(), owner: owner.to_string() })
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<S: ModelStore + ?Sized> Drop for ExclusiveLock<'_, S> {
    fn drop(&mut self) {
        self.store.unlock(&self.key, &self.owner);
        trace!("{} unlocked '{}'", self.owner, self.key);
    }
}

/// Process-local store.
#[derive(Default)]
pub struct InMemoryStore {
    values: Mutex<HashMap<String, StoredValue>>,
    locks: Mutex<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }

    pub fn get_model(&self, key: &str) -> Option<Arc<SvdModel>> {
        self.get(key)?.as_model().cloned()
    }

    pub fn get_left_vectors(&self, key: &str) -> Option<Arc<LeftSingularVectors>> {
        self.get(key)?.as_left_vectors().cloned()
    }
}

impl ModelStore for InMemoryStore {
    fn try_lock(&self, key: &str, owner: &str) -> Result<(), SvdError> {
        let mut locks = self.locks.lock();
        if let Some(holder) = locks.get(key) {
            return Err(SvdError::Lock(format!("'{}' is locked by {}", key, holder)));
        }
        locks.insert(key.to_string(), owner.to_string());
        Ok(())
    }

    fn unlock(&self, key: &str, owner: &str) {
        let mut locks = self.locks.lock();
        if locks.get(key).map(String::as_str) == Some(owner) {
            locks.remove(key);
        }
    }

    fn lock_owner(&self, key: &str) -> Option<String> {
        self.locks.lock().get(key).cloned()
    }

    fn put(&self, key: &str, value: StoredValue) {
        debug!("Publishing '{}'", key);
        self.values.lock().insert(key.to_string(), value);
    }

    fn get(&self, key: &str) -> Option<StoredValue> {
        self.values.lock().get(key).cloned()
    }

    fn remove(&self, key: &str) -> Option<StoredValue> {
        self.values.lock().remove(key)
    }
}

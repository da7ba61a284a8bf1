//! Cache storage trait and in-process implementation.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use super::traits::Cacheable;
use crate::error::LookupError;
use crate::lookup::LookupKey;

/// Timing metadata kept alongside every stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
  /// When the value was fetched from upstream
  pub fetched_at: DateTime<Utc>,
  /// How long the value counts as fresh
  pub ttl: Duration,
  /// Age past which the value must not be served at all, even as stale
  pub max_age: Option<Duration>,
}

impl EntryMeta {
  /// Age of the value. A clock that went backwards yields zero, never a
  /// negative age.
  pub fn age(&self, now: DateTime<Utc>) -> Duration {
    (now - self.fetched_at).to_std().unwrap_or(Duration::ZERO)
  }

  pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
    self.age(now) <= self.ttl
  }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self
      .max_age
      .is_some_and(|max_age| self.age(now) > max_age)
  }
}

/// A decoded cache entry.
#[derive(Debug, Clone)]
pub struct CachedEntry<T> {
  pub value: T,
  pub meta: EntryMeta,
}

impl<T> CachedEntry<T> {
  pub fn age(&self, now: DateTime<Utc>) -> Duration {
    self.meta.age(now)
  }

  pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
    self.meta.is_fresh(now)
  }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self.meta.is_expired(now)
  }
}

/// Trait for cache storage backends.
///
/// Absence is not an error. The only failures are encoding problems, which
/// surface as `LookupError::CacheCorrupt`.
pub trait CacheStorage: Send + Sync + 'static {
  /// Get the entry for a key, decoded as `T`.
  fn get<T: Cacheable>(&self, key: &LookupKey) -> Result<Option<CachedEntry<T>>, LookupError>;

  /// Store a value, replacing whatever was there before in one step.
  fn put<T: Cacheable>(&self, key: &LookupKey, value: &T, meta: EntryMeta) -> Result<(), LookupError>;

  /// Drop the entry for a key. Returns whether one existed.
  fn remove(&self, key: &LookupKey) -> bool;

  /// Drop every entry past its max age. Returns how many were dropped.
  fn evict_expired(&self, now: DateTime<Utc>) -> usize;

  fn len(&self) -> usize;
}

/// Serialized value plus metadata.
#[derive(Debug, Clone)]
struct StoredEntry {
  entity_type: &'static str,
  data: Vec<u8>,
  meta: EntryMeta,
}

/// Process-local cache storage.
///
/// Values are kept serialized so every reader gets its own copy and a stored
/// value can never be mutated in place.
#[derive(Debug, Default)]
pub struct MemoryStorage {
  entries: RwLock<HashMap<LookupKey, StoredEntry>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  // A panic while holding the lock cannot leave a half-written entry behind
  // (inserts and removals are single map operations), so poisoning is ignored.
  fn read(&self) -> RwLockReadGuard<'_, HashMap<LookupKey, StoredEntry>> {
    self.entries.read().unwrap_or_else(PoisonError::into_inner)
  }

  fn write(&self) -> RwLockWriteGuard<'_, HashMap<LookupKey, StoredEntry>> {
    self.entries.write().unwrap_or_else(PoisonError::into_inner)
  }

  /// Store raw bytes under a key, bypassing serialization.
  #[cfg(test)]
  pub fn put_raw(&self, key: &LookupKey, entity_type: &'static str, data: &[u8], meta: EntryMeta) {
    self.write().insert(
      key.clone(),
      StoredEntry {
        entity_type,
        data: data.to_vec(),
        meta,
      },
    );
  }
}

impl CacheStorage for MemoryStorage {
  fn get<T: Cacheable>(&self, key: &LookupKey) -> Result<Option<CachedEntry<T>>, LookupError> {
    let stored = match self.read().get(key) {
      Some(stored) => stored.clone(),
      None => return Ok(None),
    };

    if stored.entity_type != T::entity_type() {
      return Err(LookupError::CacheCorrupt {
        key: key.fingerprint(),
        reason: format!(
          "stored as '{}', expected '{}'",
          stored.entity_type,
          T::entity_type()
        ),
      });
    }

    let value: T = serde_json::from_slice(&stored.data).map_err(|e| LookupError::CacheCorrupt {
      key: key.fingerprint(),
      reason: e.to_string(),
    })?;

    Ok(Some(CachedEntry {
      value,
      meta: stored.meta,
    }))
  }

  fn put<T: Cacheable>(&self, key: &LookupKey, value: &T, meta: EntryMeta) -> Result<(), LookupError> {
    let data = serde_json::to_vec(value).map_err(|e| LookupError::CacheCorrupt {
      key: key.fingerprint(),
      reason: format!("failed to serialize: {}", e),
    })?;

    self.write().insert(
      key.clone(),
      StoredEntry {
        entity_type: T::entity_type(),
        data,
        meta,
      },
    );

    Ok(())
  }

  fn remove(&self, key: &LookupKey) -> bool {
    self.write().remove(key).is_some()
  }

  fn evict_expired(&self, now: DateTime<Utc>) -> usize {
    let mut entries = self.write();
    let before = entries.len();
    entries.retain(|_, stored| !stored.meta.is_expired(now));
    before - entries.len()
  }

  fn len(&self) -> usize {
    self.read().len()
  }
}

//! Keyed store of cacheable entities with opt-in absolute expiry.
//!
//! Expiry is checked lazily on read: an expired entry is removed by the
//! first `get` that sees it. There is no background sweep.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Time-to-live of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTtl {
    Never,
    After(Duration),
}

impl CacheTtl {
    /// Negative values (conventionally -1) mean "never expires".
    pub fn from_millis(ms: i64) -> Self {
        if ms < 0 {
            Self::Never
        } else {
            Self::After(Duration::from_millis(ms as u64))
        }
    }
}

/// One cached entity and its absolute expiry.
#[derive(Debug)]
pub struct CacheEntry<T> {
    id: String,
    entity: Arc<T>,
    expires_at: Option<DateTime<Utc>>,
}

impl<T> Clone for CacheEntry<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            entity: Arc::clone(&self.entity),
            expires_at: self.expires_at,
        }
    }
}

impl<T> CacheEntry<T> {
    /// Expiry is fixed here, at creation time.
    pub fn new(id: impl Into<String>, entity: T, ttl: CacheTtl) -> Self {
        Self::from_arc(id, Arc::new(entity), ttl)
    }

    pub fn from_arc(id: impl Into<String>, entity: Arc<T>, ttl: CacheTtl) -> Self {
        let expires_at = match ttl {
            CacheTtl::Never => None,
            CacheTtl::After(d) => chrono::Duration::from_std(d)
                .ok()
                .and_then(|d| Utc::now().checked_add_signed(d)),
        };
        Self {
            id: id.into(),
            entity,
            expires_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn entity(&self) -> &Arc<T> {
        &self.entity
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Expired once the current time reaches the expiry instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if now >= expiry)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Thread-safe TTL cache keyed by entry id.
#[derive(Debug)]
pub struct ExpiringCache<T> {
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
}

impl<T> Default for ExpiringCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ExpiringCache<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace the entry under its id.
    pub fn put(&self, entry: CacheEntry<T>) {
        self.write().insert(entry.id.clone(), entry);
    }

    /// Build an entry and insert it; returns the shared entity.
    pub fn insert(&self, id: impl Into<String>, entity: T, ttl: CacheTtl) -> Arc<T> {
        let entry = CacheEntry::new(id, entity, ttl);
        let shared = Arc::clone(&entry.entity);
        self.put(entry);
        shared
    }

    /// Live entity for `id`, evicting it if it has expired.
    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        {
            let guard = self.read();
            match guard.get(id) {
                None => return None,
                Some(entry) if !entry.is_expired() => return Some(Arc::clone(&entry.entity)),
                Some(_) => {}
            }
        }
        self.evict_if_expired(id)
    }

    /// Write-locked second look after a stale read. Another caller may have
    /// replaced the entry between the two locks, so only an entry that is
    /// expired now is removed.
    fn evict_if_expired(&self, id: &str) -> Option<Arc<T>> {
        let mut guard = self.write();
        let now = Utc::now();
        match guard.get(id) {
            Some(entry) if entry.is_expired_at(now) => {
                guard.remove(id);
                tracing::debug!("Cache entry '{}' expired and was evicted", id);
                None
            }
            Some(entry) => Some(Arc::clone(&entry.entity)),
            None => None,
        }
    }

    /// Drop the entry for `id`, expired or not.
    pub fn invalidate(&self, id: &str) -> bool {
        self.write().remove(id).is_some()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Stored entries, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CacheEntry<T>>> {
        self.entries.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CacheEntry<T>>> {
        self.entries.write().unwrap_or_else(|p| p.into_inner())
    }
}

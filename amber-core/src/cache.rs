//! LRU cache of package resolutions.
//!
//! Purely an optimization: the engine is correct with the cache disabled,
//! and entries expire so a stale resolution can only be served briefly.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use amber_model::ContentHash;

const DEFAULT_CAPACITY: usize = 256;
const DEFAULT_TTL: Duration = Duration::from_secs(60);

type Key = (String, String);

#[derive(Debug)]
struct Entry {
    hash: ContentHash,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<Key, Entry>,
    // Front is least recently used.
    order: VecDeque<Key>,
}

/// Keyed by `(source_id, package_name)`.
#[derive(Debug)]
pub struct ResolutionCache {
    capacity: usize,
    ttl: Duration,
    enabled: bool,
    inner: std::sync::Mutex<Inner>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_CAPACITY, DEFAULT_TTL)
    }

    pub fn with_settings(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            enabled: true,
            inner: std::sync::Mutex::new(Inner::default()),
        }
    }

    /// A cache that stores nothing; used to prove correctness does not
    /// depend on cache presence.
    pub fn disabled() -> Self {
        Self {
            capacity: 1,
            ttl: Duration::ZERO,
            enabled: false,
            inner: std::sync::Mutex::new(Inner::default()),
        }
    }

    pub fn get(&self, source_id: &str, name: &str) -> Option<ContentHash> {
        if !self.enabled {
            return None;
        }
        let key = (source_id.to_owned(), name.to_owned());
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.entries.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                let hash = entry.hash;
                touch(&mut inner.order, &key);
                Some(hash)
            }
            Some(_) => {
                inner.entries.remove(&key);
                inner.order.retain(|k| k != &key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, source_id: &str, name: &str, hash: ContentHash) {
        if !self.enabled {
            return;
        }
        let key = (source_id.to_owned(), name.to_owned());
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let expires_at = Instant::now() + self.ttl;
        if inner.entries.insert(key.clone(), Entry { hash, expires_at }).is_none()
            && inner.entries.len() > self.capacity
        {
            // Evict the least recently used entry.
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }
        touch(&mut inner.order, &key);
    }

    /// Drops every entry for a source; called when its config changes.
    pub fn invalidate_source(&self, source_id: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.retain(|(id, _), _| id != source_id);
        inner.order.retain(|(id, _)| id != source_id);
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResolutionCache {
    fn default() -> Self {
        Self::new()
    }
}

fn touch(order: &mut VecDeque<Key>, key: &Key) {
    order.retain(|k| k != key);
    order.push_back(key.clone());
}

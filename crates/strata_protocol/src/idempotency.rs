//! Idempotent request replay.
//!
//! A request carrying `X-Idempotency-Key` is keyed by (key, method, path,
//! body hash); a replay within the TTL returns the cached response
//! byte-for-byte regardless of intervening state. Process-local by design:
//! the single-instance assumption holds for now, and the cache moves to the
//! catalog when HA arrives.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const SEP: u8 = 0x1f;

/// Replay window.
pub const IDEMPOTENCY_TTL_SECS: u64 = 600;

/// Bounded number of remembered responses.
const DEFAULT_CAPACITY: usize = 4096;

fn hash_parts(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(&[SEP]);
    }
    hasher.finalize().to_hex().to_string()
}

/// Cache key for a request: idempotency key + method + path + body hash.
pub fn request_key(idempotency_key: &str, method: &str, path: &str, body: &[u8]) -> String {
    let body_hash = blake3::hash(body).to_hex().to_string();
    hash_parts(&[idempotency_key, method, path, body_hash.as_str()])
}

/// A remembered response, replayed verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

struct Entry {
    stored_at: Instant,
    response: CachedResponse,
}

/// Fixed-size LRU of responses with per-entry TTL.
pub struct IdempotencyCache {
    entries: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, Duration::from_secs(IDEMPOTENCY_TTL_SECS))
    }
}

impl IdempotencyCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity >= 1");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Look up a replay; expired entries are dropped on access.
    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() <= self.ttl => Some(entry.response.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    /// Remember a response for future replays.
    pub fn put(&self, key: String, response: CachedResponse) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.put(
            key,
            Entry {
                stored_at: Instant::now(),
                response,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_depends_on_all_parts() {
        let base = request_key("abc", "POST", "/projects", b"{}");
        assert_ne!(base, request_key("abd", "POST", "/projects", b"{}"));
        assert_ne!(base, request_key("abc", "PUT", "/projects", b"{}"));
        assert_ne!(base, request_key("abc", "POST", "/projects/x", b"{}"));
        assert_ne!(base, request_key("abc", "POST", "/projects", b"{\"a\":1}"));
        assert_eq!(base, request_key("abc", "POST", "/projects", b"{}"));
    }

    #[test]
    fn replay_within_ttl() {
        let cache = IdempotencyCache::new(8, Duration::from_secs(60));
        let key = request_key("abc", "POST", "/projects", b"{}");
        let response = CachedResponse {
            status: 201,
            body: b"{\"id\":\"p1\"}".to_vec(),
        };
        cache.put(key.clone(), response.clone());
        assert_eq!(cache.get(&key), Some(response));
    }

    #[test]
    fn expired_entries_are_dropped() {
        let cache = IdempotencyCache::new(8, Duration::from_millis(0));
        let key = request_key("abc", "POST", "/projects", b"{}");
        cache.put(
            key.clone(),
            CachedResponse {
                status: 201,
                body: Vec::new(),
            },
        );
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(&key), None);
    }

    #[test]
    fn capacity_evicts_least_recent() {
        let cache = IdempotencyCache::new(2, Duration::from_secs(60));
        for i in 0..3 {
            cache.put(
                format!("k{i}"),
                CachedResponse {
                    status: 200,
                    body: vec![i as u8],
                },
            );
        }
        assert!(cache.get("k0").is_none());
        assert!(cache.get("k2").is_some());
    }
}

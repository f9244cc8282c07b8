//! Ephemeral signature storage
//!
//! Uploaded signatures live only in process memory and only until they are
//! used or their time-to-live runs out. Expiry is checked on every read, so a
//! sweeper is not needed for correctness; [`SignatureCache::purge_expired`]
//! only bounds memory for signatures that are never read again.

use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Default time-to-live for a cached signature
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
struct CachedSignature {
    bytes: Bytes,
    expires_at: Instant,
}

/// Concurrent map from record id to signature PNG bytes with per-entry expiry
#[derive(Debug)]
pub struct SignatureCache {
    entries: DashMap<String, CachedSignature>,
    ttl: Duration,
}

impl Default for SignatureCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store `bytes` under `id`, replacing any previous entry and restarting
    /// its lifetime.
    pub fn put(&self, id: &str, bytes: impl Into<Bytes>) {
        self.put_at(id, bytes.into(), Instant::now());
    }

    /// Fetch the signature for `id` if it has not expired.
    ///
    /// An expired entry is removed as a side effect.
    pub fn get(&self, id: &str) -> Option<Bytes> {
        self.get_at(id, Instant::now())
    }

    /// Drop the entry for `id`. Deleting a missing id is a no-op.
    pub fn delete(&self, id: &str) {
        self.entries.remove(id);
    }

    /// Remove every expired entry and return how many were dropped
    pub fn purge_expired(&self) -> usize {
        self.purge_at(Instant::now())
    }

    /// Number of entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn put_at(&self, id: &str, bytes: Bytes, now: Instant) {
        let expires_at = now.checked_add(self.ttl).unwrap_or(now);
        self.entries
            .insert(id.to_string(), CachedSignature { bytes, expires_at });
    }

    fn get_at(&self, id: &str, now: Instant) -> Option<Bytes> {
        match self.entries.entry(id.to_string()) {
            Entry::Occupied(entry) if now >= entry.get().expires_at => {
                entry.remove();
                None
            }
            Entry::Occupied(entry) => Some(entry.get().bytes.clone()),
            Entry::Vacant(_) => None,
        }
    }

    fn purge_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.expires_at);
        before.saturating_sub(self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_put_then_get() {
        let cache = SignatureCache::new();
        cache.put("rec-1", vec![1u8, 2, 3]);
        assert_eq!(cache.get("rec-1").as_deref(), Some(&[1u8, 2, 3][..]));
        assert_eq!(cache.ttl(), DEFAULT_TTL);
    }

    #[test]
    fn test_missing_id() {
        let cache = SignatureCache::new();
        assert!(cache.get("nope").is_none());
        // Deleting something that is not there is fine
        cache.delete("nope");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_replaces_previous_value() {
        let cache = SignatureCache::new();
        cache.put("rec", Bytes::from_static(b"first"));
        cache.put("rec", Bytes::from_static(b"second"));
        assert_eq!(cache.get("rec").unwrap(), Bytes::from_static(b"second"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_delete_removes_entry() {
        let cache = SignatureCache::new();
        cache.put("rec", Bytes::from_static(b"png"));
        cache.delete("rec");
        assert!(cache.get("rec").is_none());
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let cache = SignatureCache::with_ttl(Duration::from_secs(60));
        let start = Instant::now();
        cache.put_at("rec", Bytes::from_static(b"png"), start);

        assert!(cache.get_at("rec", start + Duration::from_secs(59)).is_some());
        assert!(cache.get_at("rec", start + Duration::from_secs(60)).is_none());
        // The expired read removed it
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_restarts_lifetime() {
        let cache = SignatureCache::with_ttl(Duration::from_secs(60));
        let start = Instant::now();
        cache.put_at("rec", Bytes::from_static(b"old"), start);
        cache.put_at(
            "rec",
            Bytes::from_static(b"new"),
            start + Duration::from_secs(50),
        );

        let later = start + Duration::from_secs(100);
        assert_eq!(
            cache.get_at("rec", later).unwrap(),
            Bytes::from_static(b"new")
        );
    }

    #[test]
    fn test_zero_ttl_never_returns() {
        let cache = SignatureCache::with_ttl(Duration::ZERO);
        cache.put("rec", Bytes::from_static(b"png"));
        assert!(cache.get("rec").is_none());
    }

    #[test]
    fn test_purge_drops_only_expired() {
        let cache = SignatureCache::with_ttl(Duration::from_secs(10));
        let start = Instant::now();
        cache.put_at("old", Bytes::from_static(b"a"), start);
        cache.put_at("fresh", Bytes::from_static(b"b"), start + Duration::from_secs(8));

        let removed = cache.purge_at(start + Duration::from_secs(12));
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get_at("fresh", start + Duration::from_secs(12)).is_some());
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(SignatureCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    let id = format!("rec-{}", i);
                    for round in 0..100u8 {
                        cache.put(&id, vec![round]);
                        assert!(cache.get(&id).is_some());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 8);
        assert_eq!(cache.get("rec-3").unwrap(), Bytes::from(vec![99u8]));
    }
}

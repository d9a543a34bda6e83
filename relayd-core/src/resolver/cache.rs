//! LRU + TTL cache for resolved answers. `_acme-challenge` names are never
//! cached, matching the source's cache-bypass for ACME DNS-01 validation.
use lru::LruCache;
use parking_lot::Mutex;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

const CACHE_CAPACITY: usize = 4096;

struct CachedAnswer {
    ips: Vec<IpAddr>,
    expires_at: Instant,
}

pub struct DnsCache {
    inner: Mutex<LruCache<String, CachedAnswer>>,
}

impl DnsCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LruCache::new(NonZeroUsize::new(CACHE_CAPACITY).unwrap())),
        }
    }

    pub fn get(&self, name: &str) -> Option<Vec<IpAddr>> {
        let mut cache = self.inner.lock();
        let entry = cache.get(name)?;
        if entry.expires_at <= Instant::now() {
            cache.pop(name);
            return None;
        }
        Some(entry.ips.clone())
    }

    pub fn put(&self, name: &str, ips: Vec<IpAddr>, ttl: Duration) {
        if is_acme_challenge(name) {
            tracing::debug!(name, "dns cache skipped for acme challenge name");
            return;
        }
        if ips.is_empty() {
            return;
        }
        self.inner.lock().put(
            name.to_string(),
            CachedAnswer {
                ips,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

impl Default for DnsCache {
    fn default() -> Self {
        Self::new()
    }
}

fn is_acme_challenge(name: &str) -> bool {
    name.trim_end_matches('.')
        .to_lowercase()
        .starts_with("_acme-challenge")
}

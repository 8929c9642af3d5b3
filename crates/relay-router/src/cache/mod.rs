//! Response cache - bounded, TTL-based, keyed by request fingerprint

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use relay_llm::{ChatMessage, ChatResponse, GenerationOptions};

/// Fingerprint of the logical request.
///
/// The request is rendered as canonical JSON (RFC 8785, sorted keys) before
/// hashing, so option-key order never changes the key.
pub fn fingerprint(
    messages: &[ChatMessage],
    model: &str,
    options: &GenerationOptions,
) -> Result<String, serde_json::Error> {
    let canonical = serde_jcs::to_string(&serde_json::json!({
        "messages": messages,
        "model": model,
        "options": options,
    }))?;

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: ChatResponse,
    created_at: Instant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub live_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub hit_rate: f64,
    pub max_entries: usize,
    pub ttl_secs: f64,
}

/// Response cache guarded by a single lock
#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<ChatResponse> {
        let mut entries = self.entries.lock();

        let expired = match entries.get(key) {
            Some(entry) if entry.created_at.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.payload.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn put(&self, key: String, payload: ChatResponse) {
        let mut entries = self.entries.lock();

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            let before = entries.len();
            entries.retain(|_, e| e.created_at.elapsed() < self.ttl);
            self.expirations
                .fetch_add((before - entries.len()) as u64, Ordering::Relaxed);

            if entries.len() >= self.max_entries {
                if let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.created_at)
                    .map(|(k, _)| k.clone())
                {
                    entries.remove(&oldest);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("relay_cache_evictions_total").increment(1);
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                payload,
                created_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let (total_entries, live_entries) = {
            let entries = self.entries.lock();
            let live = entries
                .values()
                .filter(|e| e.created_at.elapsed() < self.ttl)
                .count();
            (entries.len(), live)
        };

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        CacheStats {
            total_entries,
            live_entries,
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            hit_rate: if lookups > 0 {
                hits as f64 / lookups as f64
            } else {
                0.0
            },
            max_entries: self.max_entries,
            ttl_secs: self.ttl.as_secs_f64(),
        }
    }
}

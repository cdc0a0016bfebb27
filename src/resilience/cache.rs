//! In-memory TTL cache for backend results

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::backend::traits::{GenerationRequest, GenerationResult, Operation};

struct CacheEntry {
    result: GenerationResult,
    created_at: Instant,
}

/// Result cache keyed by request fingerprint.
///
/// Every read re-checks entry age. Expired entries are swept only when an
/// insertion pushes the map past `max_entries`, so a small cache may hold
/// stale entries until then.
pub struct ResponseCache {
    ttl: Duration,
    max_entries: usize,
    entries: DashMap<String, CacheEntry>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<GenerationResult> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.created_at.elapsed() < self.ttl => {
                return Some(entry.result.clone());
            }
            Some(_) => true,
            None => false,
        };

        // The read guard above is released before removing
        if expired {
            self.entries
                .remove_if(key, |_, entry| entry.created_at.elapsed() >= self.ttl);
        }
        None
    }

    pub fn insert(&self, key: String, result: GenerationResult) {
        self.entries.insert(
            key,
            CacheEntry {
                result,
                created_at: Instant::now(),
            },
        );

        if self.entries.len() > self.max_entries {
            self.sweep_expired();
        }
    }

    /// Drop every expired entry, returning how many were removed
    pub fn sweep_expired(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.created_at.elapsed() < ttl);
        let removed = before.saturating_sub(self.entries.len());
        debug!(removed, remaining = self.entries.len(), "Swept expired cache entries");
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Deterministic cache key for a backend call.
///
/// Covers the backend, operation, prompt, model, dimensions and seed, plus the
/// remaining sampling parameters and a digest of any input images so distinct
/// edits never collide.
pub fn fingerprint(
    backend: &str,
    operation: Operation,
    request: &GenerationRequest,
    inputs: &[&[u8]],
) -> String {
    let mut hasher = Sha256::new();
    let mut field = |value: &str| {
        hasher.update(value.as_bytes());
        hasher.update([0x1f]);
    };

    field(&backend.to_lowercase());
    field(&operation.to_string());
    field(&request.prompt);
    field(request.model.as_deref().unwrap_or(""));
    field(&opt(request.width));
    field(&opt(request.height));
    field(&opt(request.seed));
    field(&opt(request.guidance_scale));
    field(&opt(request.steps));
    field(&opt(request.output_format));

    for input in inputs {
        hasher.update(Sha256::digest(input));
    }

    format!("{:x}", hasher.finalize())
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

// src/cache.rs
//
// Process-local quote cache with single-flight de-duplication: identical
// requests landing while a computation is in flight await the winner's
// result instead of fanning out to the chains again.

use dashmap::DashMap;
use log::debug;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;

use crate::error::Result;
use crate::types::{Quote, SwapRequest};

/// Builds the canonical cache key. Amounts are bucketed so near-identical
/// sizes share an entry; slippage tolerance is classed in 50 bps steps
/// because it shapes amount_out_min, not the route search itself.
pub fn cache_key(req: &SwapRequest, amount_bucket_size: u64) -> String {
    let bucket = if amount_bucket_size > 0 {
        req.amount_in - req.amount_in % amount_bucket_size as u128
    } else {
        req.amount_in
    };
    format!(
        "{}:{}:{}:{}:{}",
        req.chain_id,
        req.token_in,
        req.token_out,
        bucket,
        req.max_slippage_bps / 50
    )
}

struct CachedEntry {
    quote: Quote,
    stored_at: Instant,
    ttl: Duration,
}

impl CachedEntry {
    fn is_fresh(&self) -> bool {
        self.stored_at.elapsed() < self.ttl
    }
}

type FlightCell = Arc<OnceCell<Result<Quote>>>;

pub struct QuoteCache {
    entries: DashMap<String, CachedEntry>,
    in_flight: DashMap<String, FlightCell>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteCacheStats {
    pub entries: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
}

impl QuoteCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns a fresh cached quote, or runs `compute` exactly once per key
    /// no matter how many callers arrive concurrently.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: String,
        ttl: Duration,
        compute: F,
    ) -> Result<Quote>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Quote>>,
    {
        if let Some(entry) = self.entries.get(&key) {
            if entry.is_fresh() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("cache hit: {}", key);
                return Ok(entry.quote.clone());
            }
        }
        // Stale entry, drop it before recomputing.
        self.entries.remove_if(&key, |_, e| !e.is_fresh());
        self.misses.fetch_add(1, Ordering::Relaxed);

        let cell: FlightCell = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell.get_or_init(compute).await.clone();

        // Whoever observes completion publishes the result and retires the
        // flight cell; all of these operations are idempotent.
        if let Ok(quote) = &result {
            self.insert(key.clone(), quote.clone(), ttl);
        }
        self.in_flight
            .remove_if(&key, |_, existing| Arc::ptr_eq(existing, &cell));
        result
    }

    fn insert(&self, key: String, quote: Quote, ttl: Duration) {
        if self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }
        self.entries.insert(
            key,
            CachedEntry {
                quote,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.value().stored_at)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }

    /// Drops every expired entry.
    pub fn sweep(&self) {
        self.entries.retain(|_, e| e.is_fresh());
    }

    pub fn stats(&self) -> QuoteCacheStats {
        QuoteCacheStats {
            entries: self.entries.len(),
            in_flight: self.in_flight.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

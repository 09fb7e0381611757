// src/gas.rs
//
// Gas estimation for route legs. Primary path simulates the draft
// transaction against the chain under a hard timeout; failures fall back to
// per-family heuristics so a quote is always produced, just flagged as
// estimated rather than simulated.

use dashmap::DashMap;
use log::{debug, warn};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::rpc::ChainClient;
use crate::types::{GasEstimate, GasMethod, ProtocolFamily, SourceId, TxDraft};

/// Base execution cost added on top of the proportional buffer.
const BASE_TX_GAS: u64 = 21_000;
/// Proportional safety buffer: +3%.
const BUFFER_NUMERATOR: u64 = 103;
const BUFFER_DENOMINATOR: u64 = 100;

/// Heuristic per-swap cost by pricing family, used when simulation is
/// unavailable or slow.
fn heuristic_gas(family: ProtocolFamily) -> u64 {
    match family {
        ProtocolFamily::ConstantProduct => 150_000,
        ProtocolFamily::ConcentratedLiquidity => 200_000,
        ProtocolFamily::StableCurve => 120_000,
    }
}

/// Adds the proportional and flat safety buffers to a raw estimate.
pub fn apply_buffer(base_gas: u64) -> u64 {
    (base_gas * BUFFER_NUMERATOR) / BUFFER_DENOMINATOR + BASE_TX_GAS
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GasCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub heuristic_fallbacks: u64,
}

pub struct GasEstimator {
    cache: DashMap<String, (GasEstimate, Instant)>,
    sim_timeout: Duration,
    cache_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    fallbacks: AtomicU64,
}

impl GasEstimator {
    pub fn new(sim_timeout_ms: u64, cache_ttl_secs: u64) -> Self {
        Self {
            cache: DashMap::new(),
            sim_timeout: Duration::from_millis(sim_timeout_ms),
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
        }
    }

    /// Estimates buffered gas for one route leg within the remaining request
    /// budget. Infallible: simulation errors, timeouts, and an exhausted
    /// budget all degrade to the family heuristic.
    pub async fn estimate(
        &self,
        client: Arc<dyn ChainClient>,
        source: &SourceId,
        tx: &TxDraft,
        route_legs: usize,
        budget: Duration,
    ) -> GasEstimate {
        let key = format!("{}:{}:{}", source.name, tx.to, route_legs);
        if let Some(entry) = self.cache.get(&key) {
            let (cached, stored_at) = entry.value();
            if stored_at.elapsed() < self.cache_ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return cached.clone();
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        // The simulation inherits whatever is left of the request deadline,
        // capped at the configured ceiling.
        let timeout = self.sim_timeout.min(budget);
        let simulated = if timeout.is_zero() {
            None
        } else {
            self.simulate(client, tx, timeout).await
        };
        let estimate = match simulated {
            Some(gas_units) => GasEstimate {
                gas_units,
                buffered_gas_units: apply_buffer(gas_units),
                method: GasMethod::Simulated,
            },
            None => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                let gas_units = heuristic_gas(source.family) * route_legs.max(1) as u64;
                warn!(
                    "gas: simulation unavailable for {}, using heuristic {} units",
                    source.name, gas_units
                );
                GasEstimate {
                    gas_units,
                    buffered_gas_units: apply_buffer(gas_units),
                    method: GasMethod::Heuristic,
                }
            }
        };

        self.cache.insert(key, (estimate.clone(), Instant::now()));
        estimate
    }

    async fn simulate(
        &self,
        client: Arc<dyn ChainClient>,
        tx: &TxDraft,
        timeout: Duration,
    ) -> Option<u64> {
        let params = json!([{ "to": tx.to, "data": tx.calldata }]);
        match client.call("estimateGas", params, timeout).await {
            Ok(value) => {
                let gas = parse_gas_units(&value);
                if gas.is_none() {
                    warn!("gas: unparseable estimateGas result: {}", value);
                }
                gas
            }
            Err(e) => {
                debug!("gas: estimateGas failed: {}", e);
                None
            }
        }
    }

    /// Drops expired entries. Called opportunistically by the engine.
    pub fn sweep(&self) {
        let ttl = self.cache_ttl;
        self.cache.retain(|_, (_, stored_at)| stored_at.elapsed() < ttl);
    }

    pub fn cache_stats(&self) -> GasCacheStats {
        GasCacheStats {
            entries: self.cache.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            heuristic_fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }
}

fn parse_gas_units(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => {
            if let Some(hex) = s.strip_prefix("0x") {
                u64::from_str_radix(hex, 16).ok()
            } else {
                s.parse::<u64>().ok()
            }
        }
        _ => None,
    }
}

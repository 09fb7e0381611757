// src/engine.rs
//
// The quote pipeline: validate -> cache/single-flight -> scatter-gather ->
// gas estimation -> route optimization -> assembly. One engine instance is
// shared across the whole process.

use itertools::Itertools;
use log::{debug, info};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::assembler;
use crate::breaker::{AdapterHealth, CircuitBreakerRegistry};
use crate::cache::{cache_key, QuoteCache, QuoteCacheStats};
use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::error::{QuoterError, Result};
use crate::gas::{GasCacheStats, GasEstimator};
use crate::optimizer::Optimizer;
use crate::rpc::ChainClients;
use crate::source::{build_adapters, SourceAdapter};
use crate::types::{GasEstimate, Quote, SwapRequest};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub sources: Vec<AdapterHealth>,
    pub quote_cache: QuoteCacheStats,
    pub gas_cache: GasCacheStats,
}

pub struct QuoteEngine {
    config: Arc<Config>,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    chains: Arc<ChainClients>,
    gas: GasEstimator,
    cache: QuoteCache,
    breaker: Arc<CircuitBreakerRegistry>,
    coordinator: Coordinator,
    optimizer: Optimizer,
}

impl QuoteEngine {
    pub fn new(config: Arc<Config>, chains: Arc<ChainClients>) -> Self {
        let adapters = build_adapters(&config, chains.clone());
        Self::with_adapters(config, chains, adapters)
    }

    /// Construction seam for tests: inject arbitrary adapters.
    pub fn with_adapters(
        config: Arc<Config>,
        chains: Arc<ChainClients>,
        adapters: Vec<Arc<dyn SourceAdapter>>,
    ) -> Self {
        let breaker = Arc::new(CircuitBreakerRegistry::new(
            config.breaker_failure_threshold,
            Duration::from_secs(config.breaker_cooldown_secs),
            Duration::from_secs(config.breaker_cooldown_max_secs),
        ));
        let coordinator = Coordinator::new(breaker.clone(), config.deadline_safety_margin_ms);
        let optimizer = Optimizer::new(
            config.gas_cost_output_per_1k_gas,
            config.max_split_sources.unwrap_or(3),
            config.max_alternative_routes as usize,
        );
        Self {
            adapters,
            chains,
            gas: GasEstimator::new(config.gas_sim_timeout_ms, config.gas_cache_ttl_secs),
            cache: QuoteCache::new(config.quote_cache_max_entries),
            breaker,
            coordinator,
            optimizer,
            config,
        }
    }

    /// Serves one quote request end to end.
    pub async fn quote(&self, mut req: SwapRequest) -> Result<Quote> {
        if req.amount_in == 0 {
            return Err(QuoterError::InvalidAmount(
                "amount must be positive".to_string(),
            ));
        }
        if req.token_in == req.token_out {
            return Err(QuoterError::UnsupportedPair(format!(
                "{} cannot be swapped into itself",
                req.token_in
            )));
        }
        if req.deadline_ms == 0 {
            req.deadline_ms = self.config.default_deadline_ms;
        }

        let key = cache_key(&req, self.config.quote_cache_amount_bucket_size);
        let ttl = Duration::from_secs(self.config.cache_ttl_for_pair(&req.pair()));
        let key_for_compute = key.clone();
        self.cache
            .get_or_compute(key, ttl, || self.compute(req, key_for_compute))
            .await
    }

    async fn compute(&self, req: SwapRequest, key: String) -> Result<Quote> {
        let started = Instant::now();
        let outcome = self.coordinator.gather(&self.adapters, &req).await?;
        if outcome.quotes.is_empty() {
            let summary = outcome
                .errors
                .iter()
                .map(|(id, e)| format!("{}: {}", id.name, e))
                .join("; ");
            return Err(QuoterError::NoValidRoute(summary));
        }
        debug!(
            "{}: {} of {} sources answered in {}ms",
            req.pair(),
            outcome.quotes.len(),
            outcome.dispatched,
            started.elapsed().as_millis()
        );

        let client = self.chains.for_chain(req.chain_id)?;
        // Gas simulation spends what the scatter-gather phase left over.
        let remaining = Duration::from_millis(req.deadline_ms).saturating_sub(started.elapsed());
        let estimates = futures::future::join_all(outcome.quotes.iter().map(|q| {
            let client = client.clone();
            async move {
                let estimate = self
                    .gas
                    .estimate(client, &q.source, &q.tx_draft, 1, remaining)
                    .await;
                (q.source.name.clone(), estimate)
            }
        }))
        .await;
        let gas: HashMap<String, GasEstimate> = estimates.into_iter().collect();

        let (plan, alternatives) = self.optimizer.optimize(&req, &outcome.quotes, &gas)?;
        let quote = assembler::assemble(
            &req,
            plan,
            alternatives,
            key,
            started,
            outcome.any_errors_degrade_confidence(),
        );
        info!(
            "{}: out={} min={} via {} leg(s), {}ms",
            req.pair(),
            quote.amount_out,
            quote.amount_out_min,
            quote.best_route.len(),
            quote.response_time_ms
        );
        Ok(quote)
    }

    /// Periodic maintenance: drop expired cache entries.
    pub fn sweep(&self) {
        self.cache.sweep();
        self.gas.sweep();
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "ok",
            sources: self.breaker.snapshot(),
            quote_cache: self.cache.stats(),
            gas_cache: self.gas.cache_stats(),
        }
    }
}

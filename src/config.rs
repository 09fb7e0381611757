use serde::Deserialize;
use std::{collections::HashMap, path::Path};

use crate::types::ProtocolFamily;

/// Static description of one liquidity source the engine may query.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct SourceConfig {
    pub name: String,
    pub family: ProtocolFamily,
    /// Chains this source is deployed on.
    pub chain_ids: Vec<u64>,
    /// Default pool fee in basis points when the chain does not report one.
    pub default_fee_bps: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// HTTP bind address, e.g. "0.0.0.0:3001".
    pub listen_addr: String,
    /// JSON-RPC endpoint per chain id (stringly keyed; TOML table keys).
    pub rpc_urls: HashMap<String, String>,
    pub log_level: Option<String>,

    pub sources: Vec<SourceConfig>,

    // Request time budgets
    pub default_deadline_ms: u64,
    pub deadline_safety_margin_ms: u64,
    pub adapter_timeout_ms: u64,

    // Quote cache
    pub quote_cache_default_ttl_secs: u64,
    /// Per-pair TTL overrides keyed "TOKENA/TOKENB"; volatile pairs get
    /// shorter TTLs, stable pairs longer ones.
    pub quote_cache_ttl_secs: Option<HashMap<String, u64>>,
    pub quote_cache_max_entries: usize,
    pub quote_cache_amount_bucket_size: u64,

    // Circuit breaker
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_secs: u64,
    pub breaker_cooldown_max_secs: u64,

    // Gas estimation
    pub gas_sim_timeout_ms: u64,
    pub gas_cache_ttl_secs: u64,
    /// Flat conversion used for gas-adjusted route ranking: output token
    /// smallest units per 1000 gas units.
    pub gas_cost_output_per_1k_gas: u64,

    // Route shaping
    pub max_alternative_routes: u8,
    pub max_split_sources: Option<usize>,
}

impl Config {
    /// Loads configuration from the specified file path using the `config` crate.
    /// Expects a TOML file format.
    pub fn load(config_path: &Path) -> Result<Self, ::config::ConfigError> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(config_path))
            .add_source(::config::Environment::with_prefix("DEXQUOTER").separator("__"))
            .build()?;
        settings.try_deserialize()
    }

    pub fn from_env() -> Result<Self, ::config::ConfigError> {
        dotenv::dotenv().ok();
        let settings = ::config::Config::builder()
            .add_source(::config::Environment::with_prefix("DEXQUOTER").separator("__"))
            .build()?;
        settings.try_deserialize()
    }

    /// TTL for a specific pair, falling back to the default. Lookup is
    /// case-insensitive because the config loader lowercases table keys.
    pub fn cache_ttl_for_pair(&self, pair: &str) -> u64 {
        self.quote_cache_ttl_secs
            .as_ref()
            .and_then(|m| {
                m.get(pair)
                    .or_else(|| m.get(&pair.to_lowercase()))
                    .copied()
            })
            .unwrap_or(self.quote_cache_default_ttl_secs)
    }

    pub fn validate_and_log(&self) -> crate::error::Result<()> {
        use crate::error::QuoterError;
        if self.sources.is_empty() {
            return Err(QuoterError::ConfigError(
                "at least one liquidity source must be configured".to_string(),
            ));
        }
        if self.rpc_urls.is_empty() {
            return Err(QuoterError::ConfigError(
                "at least one chain RPC URL must be configured".to_string(),
            ));
        }
        if self.deadline_safety_margin_ms >= self.default_deadline_ms {
            return Err(QuoterError::ConfigError(format!(
                "safety margin {}ms swallows the whole default deadline {}ms",
                self.deadline_safety_margin_ms, self.default_deadline_ms
            )));
        }
        log::info!(
            "Config: {} sources across {} chains, default deadline {}ms, cache ttl {}s",
            self.sources.len(),
            self.rpc_urls.len(),
            self.default_deadline_ms,
            self.quote_cache_default_ttl_secs
        );
        Ok(())
    }

    pub fn test_default() -> Self {
        Self {
            listen_addr: "127.0.0.1:3001".to_string(),
            rpc_urls: HashMap::from([("1".to_string(), "http://localhost:8545".to_string())]),
            log_level: Some("info".to_string()),
            sources: vec![
                SourceConfig {
                    name: "uniswap-v2".to_string(),
                    family: ProtocolFamily::ConstantProduct,
                    chain_ids: vec![1],
                    default_fee_bps: Some(30),
                },
                SourceConfig {
                    name: "uniswap-v3".to_string(),
                    family: ProtocolFamily::ConcentratedLiquidity,
                    chain_ids: vec![1],
                    default_fee_bps: Some(30),
                },
                SourceConfig {
                    name: "curve".to_string(),
                    family: ProtocolFamily::StableCurve,
                    chain_ids: vec![1],
                    default_fee_bps: Some(4),
                },
            ],
            default_deadline_ms: 2000,
            deadline_safety_margin_ms: 50,
            adapter_timeout_ms: 800,
            quote_cache_default_ttl_secs: 10,
            quote_cache_ttl_secs: Some(HashMap::new()),
            quote_cache_max_entries: 10_000,
            quote_cache_amount_bucket_size: 1_000_000,
            breaker_failure_threshold: 5,
            breaker_cooldown_secs: 5,
            breaker_cooldown_max_secs: 300,
            gas_sim_timeout_ms: 500,
            gas_cache_ttl_secs: 30,
            gas_cost_output_per_1k_gas: 0,
            max_alternative_routes: 3,
            max_split_sources: Some(3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pair_ttl_override() {
        let mut cfg = Config::test_default();
        cfg.quote_cache_ttl_secs = Some(HashMap::from([("usdc/dai".to_string(), 30)]));
        assert_eq!(cfg.cache_ttl_for_pair("USDC/DAI"), 30);
        assert_eq!(cfg.cache_ttl_for_pair("WETH/USDC"), 10);
    }

    #[test]
    fn test_validation_rejects_empty_sources() {
        let mut cfg = Config::test_default();
        cfg.sources.clear();
        assert!(cfg.validate_and_log().is_err());
    }

    #[test]
    fn test_validation_rejects_margin_over_deadline() {
        let mut cfg = Config::test_default();
        cfg.deadline_safety_margin_ms = 2000;
        assert!(cfg.validate_and_log().is_err());
    }
}

// src/rpc.rs
//
// Uniform outbound boundary to chain nodes. Adapters only ever see
// `ChainClient::call(method, params, timeout)`; the wire encoding beyond
// JSON-RPC framing is the node's business.

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::config::Config;
use crate::error::{QuoterError, Result};

/// Black-box request/response capability against one chain's node.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Issues a single read-only call and returns the node's result payload.
    /// Timeouts surface as `AdapterTimeout`, transport failures as `RpcError`,
    /// malformed responses as `ParseError`.
    async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value>;
}

/// JSON-RPC over HTTP implementation backed by a shared reqwest client.
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: Url,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
            next_id: AtomicU64::new(1),
        }
    }

    fn build_request(id: u64, method: &str, params: &Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        })
    }
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = Self::build_request(id, method, &params);
        debug!("RPC -> {} (id {})", method, id);

        let send = self.http.post(self.url.clone()).json(&body).send();
        let response = match tokio::time::timeout(timeout, send).await {
            Ok(res) => res?,
            Err(_) => {
                warn!("RPC {} timed out after {:?}", method, timeout);
                return Err(QuoterError::AdapterTimeout(format!(
                    "{} exceeded {:?}",
                    method, timeout
                )));
            }
        };

        let payload: Value = response
            .json()
            .await
            .map_err(|e| QuoterError::ParseError(format!("{} response: {}", method, e)))?;

        if let Some(err) = payload.get("error") {
            return Err(QuoterError::RpcError(format!("{}: {}", method, err)));
        }
        payload
            .get("result")
            .cloned()
            .ok_or_else(|| QuoterError::ParseError(format!("{}: missing result field", method)))
    }
}

/// Per-chain client registry built once at startup.
pub struct ChainClients {
    clients: HashMap<u64, Arc<dyn ChainClient>>,
}

impl ChainClients {
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut clients: HashMap<u64, Arc<dyn ChainClient>> = HashMap::new();
        for (chain, url) in &config.rpc_urls {
            let chain_id: u64 = chain.parse().map_err(|_| {
                QuoterError::ConfigError(format!("rpc-urls key '{}' is not a chain id", chain))
            })?;
            let url = Url::parse(url)
                .map_err(|e| QuoterError::ConfigError(format!("rpc url for {}: {}", chain, e)))?;
            clients.insert(chain_id, Arc::new(JsonRpcClient::new(url)));
        }
        Ok(Self { clients })
    }

    /// Test constructor wiring in arbitrary client implementations.
    pub fn from_clients(clients: HashMap<u64, Arc<dyn ChainClient>>) -> Self {
        Self { clients }
    }

    pub fn for_chain(&self, chain_id: u64) -> Result<Arc<dyn ChainClient>> {
        self.clients
            .get(&chain_id)
            .cloned()
            .ok_or_else(|| QuoterError::ConfigError(format!("no RPC client for chain {}", chain_id)))
    }

    pub fn has_chain(&self, chain_id: u64) -> bool {
        self.clients.contains_key(&chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_framing() {
        let req = JsonRpcClient::build_request(7, "getPoolState", &json!(["WETH", "USDC"]));
        assert_eq!(req["jsonrpc"], "2.0");
        assert_eq!(req["id"], 7);
        assert_eq!(req["method"], "getPoolState");
        assert_eq!(req["params"][1], "USDC");
    }

    #[test]
    fn test_unknown_chain_is_config_error() {
        let registry = ChainClients::from_clients(HashMap::new());
        match registry.for_chain(137) {
            Err(QuoterError::ConfigError(msg)) => assert!(msg.contains("137")),
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("unexpected client for an unconfigured chain"),
        }
    }

    #[test]
    fn test_bad_rpc_key_rejected() {
        let mut cfg = crate::config::Config::test_default();
        cfg.rpc_urls
            .insert("mainnet".to_string(), "http://localhost:8545".to_string());
        assert!(ChainClients::from_config(&cfg).is_err());
    }
}

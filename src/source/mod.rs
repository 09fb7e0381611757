// src/source/mod.rs
//
// Liquidity source adapters. One adapter per venue; each normalizes its
// protocol family's pricing into a `SourceQuote` the rest of the pipeline
// treats uniformly.

pub mod concentrated;
pub mod constant_product;
pub mod math;
pub mod stable_curve;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::config::{Config, SourceConfig};
use crate::error::{QuoterError, Result};
use crate::rpc::ChainClients;
use crate::types::{PoolSnapshot, ProtocolFamily, SourceId, SwapRequest, TxDraft};

/// The interface every liquidity source implements. Adapters never panic on
/// bad remote data; every failure path is a typed error so the coordinator
/// can account for it.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable identity of this source (name + pricing family).
    fn id(&self) -> &SourceId;

    /// Whether this source can serve the request at all (chain deployment,
    /// pair support). Cheap and synchronous; checked before dispatch.
    fn supports(&self, req: &SwapRequest) -> bool;

    /// Fetches current state and prices the full requested amount.
    ///
    /// # Errors
    /// `AdapterTimeout` when the per-call budget elapses, `NoLiquidity` when
    /// the venue has no usable pool for the pair, `AdapterProtocolError` or
    /// `ParseError` for malformed venue data.
    async fn fetch_quote(&self, req: &SwapRequest) -> Result<crate::types::SourceQuote>;
}

/// Parses the normalized pool-state payload returned by `getPoolState`.
/// Amount fields arrive as decimal strings.
pub(crate) fn parse_pool_snapshot(value: &Value, default_fee_bps: u32) -> Result<PoolSnapshot> {
    let obj = value
        .as_object()
        .ok_or_else(|| QuoterError::ParseError("pool state is not an object".to_string()))?;

    let address = obj
        .get("address")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let parse_amount = |key: &str| -> Result<Option<u128>> {
        match obj.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => s
                .parse::<u128>()
                .map(Some)
                .map_err(|e| QuoterError::ParseError(format!("pool field {}: {}", key, e))),
            Some(Value::Number(n)) => Ok(n.as_u64().map(u128::from)),
            Some(other) => Err(QuoterError::ParseError(format!(
                "pool field {} has unexpected type: {}",
                key, other
            ))),
        }
    };

    Ok(PoolSnapshot {
        address,
        reserve_in: parse_amount("reserveIn")?.unwrap_or(0),
        reserve_out: parse_amount("reserveOut")?.unwrap_or(0),
        fee_bps: obj
            .get("feeBps")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(default_fee_bps),
        sqrt_price: parse_amount("sqrtPriceX64")?,
        liquidity: parse_amount("liquidity")?,
        amp_factor: obj.get("ampFactor").and_then(Value::as_u64),
    })
}

/// Unsigned swap skeleton targeting one pool. The executor owns the final
/// encoding; this carries enough to reproduce the call.
pub(crate) fn draft_swap_tx(pool_address: &str, req: &SwapRequest, min_out: u128) -> TxDraft {
    TxDraft {
        to: pool_address.to_string(),
        calldata: serde_json::json!({
            "method": "swapExactIn",
            "tokenIn": req.token_in,
            "tokenOut": req.token_out,
            "amountIn": req.amount_in.to_string(),
            "minOut": min_out.to_string(),
        })
        .to_string(),
    }
}

/// Builds the adapter set from configuration. Families are a closed enum;
/// the match is exhaustive on purpose.
pub fn build_adapters(
    config: &Config,
    chains: Arc<ChainClients>,
) -> Vec<Arc<dyn SourceAdapter>> {
    config
        .sources
        .iter()
        .map(|src: &SourceConfig| -> Arc<dyn SourceAdapter> {
            let default_fee = src.default_fee_bps.unwrap_or(30);
            match src.family {
                ProtocolFamily::ConstantProduct => Arc::new(
                    constant_product::ConstantProductAdapter::new(
                        src.name.clone(),
                        src.chain_ids.clone(),
                        chains.clone(),
                        config.adapter_timeout_ms,
                        default_fee,
                    ),
                ),
                ProtocolFamily::ConcentratedLiquidity => Arc::new(
                    concentrated::ConcentratedLiquidityAdapter::new(
                        src.name.clone(),
                        src.chain_ids.clone(),
                        chains.clone(),
                        config.adapter_timeout_ms,
                        default_fee,
                    ),
                ),
                ProtocolFamily::StableCurve => Arc::new(stable_curve::StableCurveAdapter::new(
                    src.name.clone(),
                    src.chain_ids.clone(),
                    chains.clone(),
                    config.adapter_timeout_ms,
                    default_fee,
                )),
            }
        })
        .collect()
}

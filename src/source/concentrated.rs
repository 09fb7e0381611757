// src/source/concentrated.rs
//
// Adapter for concentrated-liquidity venues. Tick-walking cannot be
// reproduced off-chain from a single state read, so the primary path asks
// the node to simulate the swap; when simulation is unavailable the active
// range's liquidity is priced as virtual constant-product reserves at
// reduced confidence.

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::{draft_swap_tx, math, parse_pool_snapshot, SourceAdapter};
use crate::error::{QuoterError, Result};
use crate::rpc::ChainClients;
use crate::types::{LocalCurve, PoolSnapshot, ProtocolFamily, SourceId, SourceQuote, SwapRequest};

const SIMULATED_CONFIDENCE: u8 = 90;
const SPOT_ANCHOR_CONFIDENCE: u8 = 75;
const VIRTUAL_RESERVE_CONFIDENCE: u8 = 60;

/// Synthetic depth multiplier for the spot-anchored local model when the
/// state read carries neither tick data nor reserves.
const SPOT_DEPTH_SCALE: u128 = 10_000;

pub struct ConcentratedLiquidityAdapter {
    id: SourceId,
    chain_ids: Vec<u64>,
    chains: Arc<ChainClients>,
    call_timeout: Duration,
    default_fee_bps: u32,
}

impl ConcentratedLiquidityAdapter {
    pub fn new(
        name: String,
        chain_ids: Vec<u64>,
        chains: Arc<ChainClients>,
        call_timeout_ms: u64,
        default_fee_bps: u32,
    ) -> Self {
        Self {
            id: SourceId::new(name, ProtocolFamily::ConcentratedLiquidity),
            chain_ids,
            chains,
            call_timeout: Duration::from_millis(call_timeout_ms),
            default_fee_bps,
        }
    }

    fn virtual_reserves(&self, pool: &PoolSnapshot) -> Result<(u128, u128)> {
        let liquidity = pool.liquidity.ok_or_else(|| {
            QuoterError::AdapterProtocolError(format!("{}: missing liquidity", self.id.name))
        })?;
        let sqrt_price = pool.sqrt_price.ok_or_else(|| {
            QuoterError::AdapterProtocolError(format!("{}: missing sqrt price", self.id.name))
        })?;
        math::clmm::virtual_reserves(liquidity, sqrt_price)
            .map_err(|e| QuoterError::AdapterProtocolError(format!("{}: {}", self.id.name, e)))
    }

    /// Degraded-accuracy path: price through the active range as if it were
    /// a constant-product pool.
    fn quote_from_virtual_reserves(
        &self,
        req: &SwapRequest,
        pool: PoolSnapshot,
    ) -> Result<SourceQuote> {
        let (r_in, r_out) = self.virtual_reserves(&pool)?;
        let result = math::cpmm::swap_output(req.amount_in, r_in, r_out, pool.fee_bps)
            .map_err(|e| QuoterError::AdapterProtocolError(format!("{}: {}", self.id.name, e)))?;
        Ok(SourceQuote {
            source: self.id.clone(),
            amount_out: result.amount_out,
            price_impact_bps: result.price_impact_bps,
            confidence: VIRTUAL_RESERVE_CONFIDENCE,
            curve: LocalCurve {
                reserve_in: r_in,
                reserve_out: r_out,
                fee_bps: pool.fee_bps,
            },
            tx_draft: draft_swap_tx(&pool.address, req, result.amount_out),
            pool,
            degraded: true,
        })
    }

    fn parse_simulated_out(&self, value: &Value) -> Result<u128> {
        let raw = value
            .get("amountOut")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                QuoterError::ParseError(format!("{}: simulation missing amountOut", self.id.name))
            })?;
        raw.parse::<u128>()
            .map_err(|e| QuoterError::ParseError(format!("{}: amountOut: {}", self.id.name, e)))
    }
}

#[async_trait]
impl SourceAdapter for ConcentratedLiquidityAdapter {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn supports(&self, req: &SwapRequest) -> bool {
        self.chain_ids.contains(&req.chain_id) && self.chains.has_chain(req.chain_id)
    }

    async fn fetch_quote(&self, req: &SwapRequest) -> Result<SourceQuote> {
        let client = self.chains.for_chain(req.chain_id)?;
        let state = client
            .call(
                "getPoolState",
                json!([self.id.name, req.token_in, req.token_out]),
                self.call_timeout,
            )
            .await?;
        let pool = parse_pool_snapshot(&state, self.default_fee_bps)?;
        if pool.liquidity == Some(0) {
            return Err(QuoterError::NoLiquidity(format!(
                "{} has no active liquidity for {}",
                self.id.name,
                req.pair()
            )));
        }

        let simulation = client
            .call(
                "simulateSwap",
                json!([self.id.name, req.token_in, req.token_out, req.amount_in.to_string()]),
                self.call_timeout,
            )
            .await;

        match simulation {
            Ok(value) => {
                let amount_out = self.parse_simulated_out(&value)?;
                if amount_out == 0 {
                    return Err(QuoterError::NoLiquidity(format!(
                        "{} simulation returned zero output",
                        self.id.name
                    )));
                }
                // The simulated output is authoritative; tick data only
                // anchors the local model. A venue whose state read omits it
                // keeps its quote at reduced confidence.
                let (r_in, r_out, confidence, degraded) = match self.virtual_reserves(&pool) {
                    Ok((r_in, r_out)) => (r_in, r_out, SIMULATED_CONFIDENCE, false),
                    Err(e) => {
                        warn!(
                            "{}: no tick data for the local model ({}), anchoring to spot",
                            self.id.name, e
                        );
                        let (r_in, r_out) = if pool.reserve_in > 0 && pool.reserve_out > 0 {
                            (pool.reserve_in, pool.reserve_out)
                        } else {
                            (
                                req.amount_in.saturating_mul(SPOT_DEPTH_SCALE),
                                amount_out.saturating_mul(SPOT_DEPTH_SCALE),
                            )
                        };
                        (r_in, r_out, SPOT_ANCHOR_CONFIDENCE, true)
                    }
                };
                let price_impact_bps =
                    math::utils::price_impact_bps(req.amount_in, amount_out, r_in, r_out);
                // Calibrate the local model to the simulated fill so split
                // evaluation reprices partial amounts consistently.
                let fee_factor = (math::BPS_DENOMINATOR - pool.fee_bps) as u128;
                let in_after_fee = req
                    .amount_in
                    .checked_mul(fee_factor)
                    .map(|v| v / math::BPS_DENOMINATOR as u128)
                    .unwrap_or(req.amount_in);
                let (eff_in, eff_out) =
                    math::utils::effective_cpmm_reserves(in_after_fee, amount_out, r_in, r_out);
                debug!(
                    "{}: simulated {} -> {} out={}",
                    self.id.name, req.token_in, req.token_out, amount_out
                );
                Ok(SourceQuote {
                    source: self.id.clone(),
                    amount_out,
                    price_impact_bps,
                    confidence,
                    curve: LocalCurve {
                        reserve_in: eff_in,
                        reserve_out: eff_out,
                        fee_bps: pool.fee_bps,
                    },
                    tx_draft: draft_swap_tx(&pool.address, req, amount_out),
                    pool,
                    degraded,
                })
            }
            Err(e) => {
                warn!(
                    "{}: simulateSwap unavailable ({}), using virtual reserves",
                    self.id.name, e
                );
                self.quote_from_virtual_reserves(req, pool)
            }
        }
    }
}

// src/source/constant_product.rs
//
// Adapter for x*y=k venues. Pool state is one RPC read; pricing is exact
// closed-form math, so these quotes carry the highest confidence.

use async_trait::async_trait;
use log::debug;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use super::{draft_swap_tx, math, parse_pool_snapshot, SourceAdapter};
use crate::error::{QuoterError, Result};
use crate::rpc::ChainClients;
use crate::types::{LocalCurve, ProtocolFamily, SourceId, SourceQuote, SwapRequest};

const CONSTANT_PRODUCT_CONFIDENCE: u8 = 95;

pub struct ConstantProductAdapter {
    id: SourceId,
    chain_ids: Vec<u64>,
    chains: Arc<ChainClients>,
    call_timeout: Duration,
    default_fee_bps: u32,
}

impl ConstantProductAdapter {
    pub fn new(
        name: String,
        chain_ids: Vec<u64>,
        chains: Arc<ChainClients>,
        call_timeout_ms: u64,
        default_fee_bps: u32,
    ) -> Self {
        Self {
            id: SourceId::new(name, ProtocolFamily::ConstantProduct),
            chain_ids,
            chains,
            call_timeout: Duration::from_millis(call_timeout_ms),
            default_fee_bps,
        }
    }
}

#[async_trait]
impl SourceAdapter for ConstantProductAdapter {
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
        if pool.reserve_in == 0 || pool.reserve_out == 0 {
            return Err(QuoterError::NoLiquidity(format!(
                "{} has no {} pool depth",
                self.id.name,
                req.pair()
            )));
        }

        let result = math::cpmm::swap_output(
            req.amount_in,
            pool.reserve_in,
            pool.reserve_out,
            pool.fee_bps,
        )
        .map_err(|e| QuoterError::AdapterProtocolError(format!("{}: {}", self.id.name, e)))?;

        debug!(
            "{}: {} -> {} out={} impact={}bps",
            self.id.name,
            req.token_in,
            req.token_out,
            result.amount_out,
            result.price_impact_bps
        );

        Ok(SourceQuote {
            source: self.id.clone(),
            amount_out: result.amount_out,
            price_impact_bps: result.price_impact_bps,
            confidence: CONSTANT_PRODUCT_CONFIDENCE,
            curve: LocalCurve {
                reserve_in: pool.reserve_in,
                reserve_out: pool.reserve_out,
                fee_bps: pool.fee_bps,
            },
            tx_draft: draft_swap_tx(&pool.address, req, result.amount_out),
            pool,
            degraded: false,
        })
    }
}

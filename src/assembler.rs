// src/assembler.rs
//
// Final quote assembly: slippage floor, impact severity, timing metadata.

use std::time::Instant;

use crate::optimizer::RoutePlan;
use crate::source::math;
use crate::types::{AlternativeRoute, ImpactSeverity, Quote, SwapRequest};

/// Builds the response value from an accepted route plan.
pub fn assemble(
    req: &SwapRequest,
    plan: RoutePlan,
    alternatives: Vec<AlternativeRoute>,
    cache_key: String,
    started: Instant,
    extra_degradation: bool,
) -> Quote {
    let amount_out_min =
        math::utils::minimum_output_with_slippage(plan.total_amount_out, req.max_slippage_bps);
    Quote {
        amount_out: plan.total_amount_out,
        amount_out_min,
        price_impact_bps: plan.price_impact_bps,
        impact_severity: ImpactSeverity::from_bps(plan.price_impact_bps),
        gas_estimate: plan.total_buffered_gas,
        degraded_confidence: plan.degraded || extra_degradation,
        best_route: plan.allocations,
        alternative_routes: alternatives,
        generated_at_ms: chrono::Utc::now().timestamp_millis() as u64,
        response_time_ms: started.elapsed().as_millis() as u64,
        cache_key,
    }
}

// src/optimizer.rs
//
// Route selection. Ranks single-source candidates by gas-adjusted output,
// then searches for a better split by marginal allocation over each
// source's local curve: the input is divided into equal steps and every
// step goes to whichever source currently pays the most for it. A split is
// only accepted when its extra output beats the extra gas it costs.

use log::debug;
use std::collections::HashMap;

use crate::error::{QuoterError, Result};
use crate::source::math;
use crate::types::{
    AlternativeRoute, GasEstimate, LocalCurve, RouteAllocation, SourceQuote, SwapRequest,
};

const SPLIT_STEPS: u128 = 100;

/// The optimizer's chosen route plus what it expects from it.
#[derive(Debug, Clone)]
pub struct RoutePlan {
    pub allocations: Vec<RouteAllocation>,
    pub total_amount_out: u128,
    pub total_buffered_gas: u64,
    pub price_impact_bps: u32,
    /// Any leg priced through a fallback path or heuristic gas.
    pub degraded: bool,
}

pub struct Optimizer {
    /// Output-token smallest units per 1000 gas units; converts gas into the
    /// same currency as amount_out for ranking.
    gas_rate_per_1k: u64,
    max_split_sources: usize,
    max_alternatives: usize,
}

/// Output of the local model for a partial amount; zero when the model
/// rejects the size (dust rounding, exhausted depth).
fn curve_out(curve: &LocalCurve, amount_in: u128) -> u128 {
    if amount_in == 0 {
        return 0;
    }
    math::cpmm::swap_output(amount_in, curve.reserve_in, curve.reserve_out, curve.fee_bps)
        .map(|r| r.amount_out)
        .unwrap_or(0)
}

impl Optimizer {
    pub fn new(gas_rate_per_1k: u64, max_split_sources: usize, max_alternatives: usize) -> Self {
        Self {
            gas_rate_per_1k,
            max_split_sources: max_split_sources.max(1),
            max_alternatives,
        }
    }

    fn gas_penalty(&self, gas: &GasEstimate) -> u128 {
        (gas.buffered_gas_units as u128) * (self.gas_rate_per_1k as u128) / 1000
    }

    /// Picks the best route for the request from the gathered quotes.
    ///
    /// # Errors
    /// `NoValidRoute` when no quote nets a positive output after gas.
    pub fn optimize(
        &self,
        req: &SwapRequest,
        quotes: &[SourceQuote],
        gas: &HashMap<String, GasEstimate>,
    ) -> Result<(RoutePlan, Vec<AlternativeRoute>)> {
        // Rank single-source candidates by output net of gas.
        let mut ranked: Vec<(&SourceQuote, &GasEstimate, u128)> = quotes
            .iter()
            .filter_map(|q| {
                let estimate = gas.get(&q.source.name)?;
                let net = q.amount_out.saturating_sub(self.gas_penalty(estimate));
                (net > 0).then_some((q, estimate, net))
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.2.cmp(&a.2)
                .then(b.0.confidence.cmp(&a.0.confidence))
                .then(a.0.price_impact_bps.cmp(&b.0.price_impact_bps))
        });

        let (best, best_gas, best_net) = *ranked.first().ok_or_else(|| {
            QuoterError::NoValidRoute(format!(
                "no source nets a positive output for {}",
                req.pair()
            ))
        })?;

        let single_plan = RoutePlan {
            allocations: vec![RouteAllocation {
                source: best.source.clone(),
                percentage: 100,
                expected_amount_out: best.amount_out,
                gas_units: best_gas.buffered_gas_units,
                confidence: best.confidence,
            }],
            total_amount_out: best.amount_out,
            total_buffered_gas: best_gas.buffered_gas_units,
            price_impact_bps: best.price_impact_bps,
            degraded: best.degraded || best_gas.is_heuristic(),
        };

        let alternatives = self.alternatives(&ranked, &best.source.name);

        // A split needs at least two viable sources.
        if ranked.len() < 2 {
            return Ok((single_plan, alternatives));
        }

        let candidates: Vec<_> = ranked.iter().take(self.max_split_sources).collect();
        let split_plan = self.water_fill(req, &candidates);

        match split_plan {
            Some(split) if split.allocations.len() >= 2 => {
                // Accept the split only when its net output beats the best
                // single route's net output.
                let split_penalty: u128 = split
                    .allocations
                    .iter()
                    .map(|a| {
                        (a.gas_units as u128) * (self.gas_rate_per_1k as u128) / 1000
                    })
                    .sum();
                let split_net = split.total_amount_out.saturating_sub(split_penalty);
                if split_net > best_net {
                    debug!(
                        "split wins: {} vs single {} (net of gas)",
                        split_net, best_net
                    );
                    return Ok((split, alternatives));
                }
                Ok((single_plan, alternatives))
            }
            _ => Ok((single_plan, alternatives)),
        }
    }

    /// Marginal (water-filling) allocation: divide the input into equal
    /// steps and give each step to the source whose curve pays the highest
    /// marginal output at its current allocation.
    fn water_fill(
        &self,
        req: &SwapRequest,
        candidates: &[&(&SourceQuote, &GasEstimate, u128)],
    ) -> Option<RoutePlan> {
        let steps = SPLIT_STEPS.min(req.amount_in);
        if steps < 2 {
            return None;
        }
        let step_size = req.amount_in / steps;
        let remainder = req.amount_in - step_size * steps;

        let mut allocated: Vec<u128> = vec![0; candidates.len()];
        let mut step_counts: Vec<u128> = vec![0; candidates.len()];

        for step in 0..steps {
            // Fold the integer remainder into the final step.
            let size = if step == steps - 1 {
                step_size + remainder
            } else {
                step_size
            };
            let mut best_idx = None;
            let mut best_marginal = 0u128;
            for (idx, (quote, _, _)) in candidates.iter().enumerate() {
                let current = curve_out(&quote.curve, allocated[idx]);
                let next = curve_out(&quote.curve, allocated[idx] + size);
                let marginal = next.saturating_sub(current);
                if marginal > best_marginal {
                    best_marginal = marginal;
                    best_idx = Some(idx);
                }
            }
            let idx = best_idx?;
            allocated[idx] += size;
            step_counts[idx] += 1;
        }

        let percentages = largest_remainder_percentages(&step_counts, steps);

        let mut allocations = Vec::new();
        let mut total_out = 0u128;
        let mut total_gas = 0u64;
        let mut impact_acc = 0u128;
        let mut degraded = false;
        for (idx, (quote, gas_estimate, _)) in candidates.iter().enumerate() {
            if allocated[idx] == 0 {
                continue;
            }
            let out = curve_out(&quote.curve, allocated[idx]);
            if out == 0 {
                continue;
            }
            total_out += out;
            total_gas += gas_estimate.buffered_gas_units;
            degraded |= quote.degraded || gas_estimate.is_heuristic();
            impact_acc += math::utils::price_impact_bps(
                allocated[idx],
                out,
                quote.curve.reserve_in,
                quote.curve.reserve_out,
            ) as u128
                * allocated[idx];
            allocations.push(RouteAllocation {
                source: quote.source.clone(),
                percentage: percentages[idx],
                expected_amount_out: out,
                gas_units: gas_estimate.buffered_gas_units,
                confidence: quote.confidence,
            });
        }
        if allocations.is_empty() {
            return None;
        }

        let price_impact_bps = (impact_acc / req.amount_in.max(1)) as u32;
        Some(RoutePlan {
            allocations,
            total_amount_out: total_out,
            total_buffered_gas: total_gas,
            price_impact_bps,
            degraded,
        })
    }

    fn alternatives(
        &self,
        ranked: &[(&SourceQuote, &GasEstimate, u128)],
        best_name: &str,
    ) -> Vec<AlternativeRoute> {
        ranked
            .iter()
            .filter(|(q, _, _)| q.source.name != best_name)
            .take(self.max_alternatives)
            .map(|(q, _, _)| AlternativeRoute {
                source: q.source.clone(),
                amount_out: q.amount_out,
                price_impact_bps: q.price_impact_bps,
                confidence: q.confidence,
            })
            .collect()
    }
}

/// Converts per-source step counts into integer percentages summing to
/// exactly 100, distributing rounding slack to the largest remainders.
fn largest_remainder_percentages(step_counts: &[u128], total_steps: u128) -> Vec<u8> {
    let mut floors: Vec<u8> = Vec::with_capacity(step_counts.len());
    let mut remainders: Vec<(usize, u128)> = Vec::with_capacity(step_counts.len());
    let mut assigned = 0u32;
    for (idx, &count) in step_counts.iter().enumerate() {
        let scaled = count * 100;
        let floor = (scaled / total_steps) as u8;
        floors.push(floor);
        assigned += floor as u32;
        remainders.push((idx, scaled % total_steps));
    }
    remainders.sort_by(|a, b| b.1.cmp(&a.1));
    let mut leftover = 100u32.saturating_sub(assigned);
    for (idx, rem) in remainders {
        if leftover == 0 {
            break;
        }
        // Only sources that actually received steps may absorb slack.
        if step_counts[idx] > 0 && rem > 0 {
            floors[idx] += 1;
            leftover -= 1;
        }
    }
    floors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GasMethod, PoolSnapshot, ProtocolFamily, SourceId, TxDraft};
    use pretty_assertions::assert_eq;

    fn quote(name: &str, amount_out: u128, curve: LocalCurve) -> SourceQuote {
        SourceQuote {
            source: SourceId::new(name, ProtocolFamily::ConstantProduct),
            amount_out,
            price_impact_bps: 10,
            confidence: 95,
            pool: PoolSnapshot::default(),
            curve,
            tx_draft: TxDraft::default(),
            degraded: false,
        }
    }

    fn cp_quote(name: &str, amount_in: u128, r_in: u128, r_out: u128, fee_bps: u32) -> SourceQuote {
        let out = math::cpmm::swap_output(amount_in, r_in, r_out, fee_bps)
            .unwrap()
            .amount_out;
        quote(
            name,
            out,
            LocalCurve {
                reserve_in: r_in,
                reserve_out: r_out,
                fee_bps,
            },
        )
    }

    fn simulated_gas(units: u64) -> GasEstimate {
        GasEstimate {
            gas_units: units,
            buffered_gas_units: units,
            method: GasMethod::Simulated,
        }
    }

    fn gas_map(names: &[&str], units: u64) -> HashMap<String, GasEstimate> {
        names
            .iter()
            .map(|n| (n.to_string(), simulated_gas(units)))
            .collect()
    }

    fn request(amount_in: u128) -> SwapRequest {
        SwapRequest {
            chain_id: 1,
            token_in: "WETH".to_string(),
            token_out: "USDC".to_string(),
            amount_in,
            max_slippage_bps: 50,
            deadline_ms: 2000,
        }
    }

    #[test]
    fn test_two_pool_reference_scenario_routes_to_deeper_rate() {
        // Pools (1000, 2000) and (500, 1100) at 0.3% fee, 10 units in.
        // The second pool's marginal rate stays above the first's across the
        // whole trade, so the optimum is 100% through it.
        let quotes = vec![
            cp_quote("pool-a", 10, 1000, 2000, 30),
            cp_quote("pool-b", 10, 500, 1100, 30),
        ];
        let optimizer = Optimizer::new(0, 3, 3);
        let (plan, alternatives) = optimizer
            .optimize(&request(10), &quotes, &gas_map(&["pool-a", "pool-b"], 100_000))
            .unwrap();

        assert_eq!(plan.allocations.len(), 1);
        assert_eq!(plan.allocations[0].source.name, "pool-b");
        assert_eq!(plan.allocations[0].percentage, 100);
        assert_eq!(plan.total_amount_out, 21);
        assert_eq!(alternatives.len(), 1);
        assert_eq!(alternatives[0].source.name, "pool-a");
    }

    #[test]
    fn test_symmetric_pools_split_evenly() {
        // Two identical pools: a large trade should split 50/50 and beat
        // pushing everything through one side.
        let quotes = vec![
            cp_quote("left", 100_000, 1_000_000, 2_000_000, 30),
            cp_quote("right", 100_000, 1_000_000, 2_000_000, 30),
        ];
        let optimizer = Optimizer::new(0, 3, 3);
        let (plan, _) = optimizer
            .optimize(
                &request(100_000),
                &quotes,
                &gas_map(&["left", "right"], 100_000),
            )
            .unwrap();

        assert_eq!(plan.allocations.len(), 2);
        let single_out = quotes[0].amount_out;
        assert!(plan.total_amount_out > single_out);
        let percentages: Vec<u8> = plan.allocations.iter().map(|a| a.percentage).collect();
        assert_eq!(percentages.iter().map(|p| *p as u32).sum::<u32>(), 100);
        // Near-even split; step granularity allows one step of skew.
        assert!(percentages.iter().all(|p| (49..=51).contains(p)));
    }

    #[test]
    fn test_gas_cost_gates_the_split() {
        // Same pools as above, but each extra leg costs more gas than the
        // split gains in output.
        let quotes = vec![
            cp_quote("left", 100_000, 1_000_000, 2_000_000, 30),
            cp_quote("right", 100_000, 1_000_000, 2_000_000, 30),
        ];
        let optimizer = Optimizer::new(1_000, 3, 3); // 1 output unit per gas unit
        let (plan, _) = optimizer
            .optimize(
                &request(100_000),
                &quotes,
                &gas_map(&["left", "right"], 20_000),
            )
            .unwrap();
        assert_eq!(plan.allocations.len(), 1);
        assert_eq!(plan.allocations[0].percentage, 100);
    }

    #[test]
    fn test_single_quote_gets_full_allocation() {
        let quotes = vec![cp_quote("only", 10_000, 1_000_000, 2_000_000, 30)];
        let optimizer = Optimizer::new(0, 3, 3);
        let (plan, alternatives) = optimizer
            .optimize(&request(10_000), &quotes, &gas_map(&["only"], 100_000))
            .unwrap();
        assert_eq!(plan.allocations.len(), 1);
        assert_eq!(plan.allocations[0].percentage, 100);
        assert!(alternatives.is_empty());
    }

    #[test]
    fn test_gas_dominating_output_is_no_valid_route() {
        let quotes = vec![cp_quote("tiny", 100, 1_000_000, 2_000_000, 30)];
        let optimizer = Optimizer::new(10_000, 3, 3);
        let result = optimizer.optimize(&request(100), &quotes, &gas_map(&["tiny"], 100_000));
        assert!(matches!(result, Err(QuoterError::NoValidRoute(_))));
    }

    #[test]
    fn test_tie_breaks_on_confidence_then_impact() {
        let mut a = cp_quote("a", 10_000, 1_000_000, 2_000_000, 30);
        let mut b = cp_quote("b", 10_000, 1_000_000, 2_000_000, 30);
        a.confidence = 60;
        a.degraded = true;
        b.confidence = 95;
        // Identical outputs and gas; higher confidence must win.
        assert_eq!(a.amount_out, b.amount_out);
        let optimizer = Optimizer::new(0, 1, 3);
        let (plan, _) = optimizer
            .optimize(
                &request(10_000),
                &[a, b],
                &gas_map(&["a", "b"], 100_000),
            )
            .unwrap();
        assert_eq!(plan.allocations[0].source.name, "b");
    }

    #[test]
    fn test_percentage_rounding_sums_to_100() {
        // 3 counts over 7 steps exercises the largest-remainder path.
        let percentages = largest_remainder_percentages(&[3, 2, 2], 7);
        assert_eq!(percentages.iter().map(|p| *p as u32).sum::<u32>(), 100);
        assert!(percentages[0] >= percentages[1]);
    }

    #[test]
    fn test_degraded_leg_marks_plan() {
        let mut q = cp_quote("fallback", 10_000, 1_000_000, 2_000_000, 30);
        q.degraded = true;
        let optimizer = Optimizer::new(0, 3, 3);
        let (plan, _) = optimizer
            .optimize(&request(10_000), &[q], &gas_map(&["fallback"], 100_000))
            .unwrap();
        assert!(plan.degraded);
    }

    #[test]
    fn test_heuristic_gas_marks_plan() {
        let q = cp_quote("cp", 10_000, 1_000_000, 2_000_000, 30);
        let gas = HashMap::from([(
            "cp".to_string(),
            GasEstimate {
                gas_units: 150_000,
                buffered_gas_units: 175_500,
                method: GasMethod::Heuristic,
            },
        )]);
        let optimizer = Optimizer::new(0, 3, 3);
        let (plan, _) = optimizer.optimize(&request(10_000), &[q], &gas).unwrap();
        assert!(plan.degraded);
    }
}

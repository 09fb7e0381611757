//! Pool pricing math for the three supported protocol families.
//!
//! All swap arithmetic runs on `BigUint` so intermediate products cannot
//! overflow regardless of token decimals. Functions return `anyhow::Result`;
//! adapters translate failures into the engine's error taxonomy.

use anyhow::{anyhow, Result};
use num_bigint::BigUint;
use num_traits::ToPrimitive;

pub const BPS_DENOMINATOR: u32 = 10_000;

/// Constant product (x * y = k) pools, fee charged on input.
pub mod cpmm {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct CpmmSwapResult {
        pub amount_out: u128,
        pub fee_amount: u128,
        pub price_impact_bps: u32,
        pub new_reserve_in: u128,
        pub new_reserve_out: u128,
    }

    /// Calculates swap output with the fee applied to the input side:
    /// out = (in * (10000 - fee) * R_out) / (R_in * 10000 + in * (10000 - fee))
    pub fn swap_output(
        amount_in: u128,
        reserve_in: u128,
        reserve_out: u128,
        fee_bps: u32,
    ) -> Result<CpmmSwapResult> {
        if reserve_in == 0 || reserve_out == 0 {
            return Err(anyhow!("pool has no liquidity"));
        }
        if amount_in == 0 {
            return Err(anyhow!("input amount cannot be zero"));
        }
        if fee_bps >= BPS_DENOMINATOR {
            return Err(anyhow!("fee rate cannot be >= 100%"));
        }

        let in_big = BigUint::from(amount_in);
        let r_in = BigUint::from(reserve_in);
        let r_out = BigUint::from(reserve_out);
        let bps = BigUint::from(BPS_DENOMINATOR);
        let fee_factor = BigUint::from(BPS_DENOMINATOR - fee_bps);

        let in_with_fee = &in_big * &fee_factor;
        let numerator = &in_with_fee * &r_out;
        let denominator = &r_in * &bps + &in_with_fee;
        let out_big = numerator / denominator;

        let fee_amount = (&in_big * BigUint::from(fee_bps)) / &bps;

        let amount_out = out_big
            .to_u128()
            .ok_or_else(|| anyhow!("output overflow"))?;
        // Floor division keeps the invariant; equality would drain the pool.
        if amount_out >= reserve_out {
            return Err(anyhow!("output would exhaust pool reserves"));
        }

        let price_impact_bps =
            super::utils::price_impact_bps(amount_in, amount_out, reserve_in, reserve_out);

        Ok(CpmmSwapResult {
            amount_out,
            fee_amount: fee_amount.to_u128().unwrap_or(u128::MAX),
            price_impact_bps,
            new_reserve_in: reserve_in.saturating_add(amount_in),
            new_reserve_out: reserve_out - amount_out,
        })
    }
}

/// Concentrated liquidity pools priced via the active range's virtual
/// reserves. Only the fallback path uses this; the primary path asks the
/// chain to simulate the swap.
pub mod clmm {
    use super::*;

    /// Derives virtual constant-product reserves from active-range liquidity
    /// and the current sqrt price (Q64.64 fixed point):
    /// r_in = L / sqrt(P), r_out = L * sqrt(P).
    pub fn virtual_reserves(liquidity: u128, sqrt_price_x64: u128) -> Result<(u128, u128)> {
        if liquidity == 0 {
            return Err(anyhow!("no active liquidity in range"));
        }
        if sqrt_price_x64 == 0 {
            return Err(anyhow!("sqrt price cannot be zero"));
        }

        let liq = BigUint::from(liquidity);
        let sqrt_p = BigUint::from(sqrt_price_x64);
        let one_x64 = BigUint::from(1u8) << 64u32;

        let r_in = (&liq * &one_x64) / &sqrt_p;
        let r_out = (&liq * &sqrt_p) >> 64u32;

        let r_in = r_in
            .to_u128()
            .ok_or_else(|| anyhow!("virtual input reserve overflow"))?;
        let r_out = r_out
            .to_u128()
            .ok_or_else(|| anyhow!("virtual output reserve overflow"))?;
        if r_in == 0 || r_out == 0 {
            return Err(anyhow!("virtual reserves degenerate"));
        }
        Ok((r_in, r_out))
    }
}

/// StableSwap-style curves. The invariant D and the post-trade balance y are
/// solved with bounded Newton iteration on integers; non-convergence within
/// the iteration budget is an error, never a silent approximation.
pub mod stable {
    use super::*;

    const MAX_ITERATIONS: usize = 255;
    const N_COINS: u32 = 2;

    /// Solves the StableSwap invariant D for a two-coin pool.
    pub fn get_d(balance_a: u128, balance_b: u128, amp: u64) -> Result<u128> {
        if balance_a == 0 || balance_b == 0 {
            return Err(anyhow!("pool has no liquidity"));
        }
        let xa = BigUint::from(balance_a);
        let xb = BigUint::from(balance_b);
        let s = &xa + &xb;
        let n = BigUint::from(N_COINS);
        // Ann = amp * n^n
        let ann = BigUint::from(amp) * BigUint::from(N_COINS.pow(N_COINS));

        let mut d = s.clone();
        for _ in 0..MAX_ITERATIONS {
            // d_p = D^(n+1) / (n^n * xa * xb)
            let mut d_p = d.clone();
            d_p = (&d_p * &d) / (&xa * &n);
            d_p = (&d_p * &d) / (&xb * &n);

            let d_prev = d.clone();
            // d = (Ann*S + n*d_p) * d / ((Ann - 1)*d + (n + 1)*d_p)
            let numerator = (&ann * &s + &d_p * &n) * &d;
            let denominator =
                (&ann - BigUint::from(1u8)) * &d + (&n + BigUint::from(1u8)) * &d_p;
            d = numerator / denominator;

            let diff = if d > d_prev { &d - &d_prev } else { &d_prev - &d };
            if diff <= BigUint::from(1u8) {
                return d.to_u128().ok_or_else(|| anyhow!("D overflow"));
            }
        }
        Err(anyhow!("D failed to converge within {} iterations", MAX_ITERATIONS))
    }

    /// Solves the output-side balance y for a given new input-side balance x,
    /// holding D constant.
    pub fn get_y(new_balance_in: u128, d: u128, amp: u64) -> Result<u128> {
        if new_balance_in == 0 {
            return Err(anyhow!("input balance cannot be zero"));
        }
        let x = BigUint::from(new_balance_in);
        let d_big = BigUint::from(d);
        let ann = BigUint::from(amp) * BigUint::from(N_COINS.pow(N_COINS));
        let n = BigUint::from(N_COINS);

        // c = D^(n+1) / (n^n * x * Ann)
        let mut c = d_big.clone();
        c = (&c * &d_big) / (&x * &n);
        c = (&c * &d_big) / (&n * &ann);
        // b = x + D / Ann
        let b = &x + &d_big / &ann;

        let mut y = d_big.clone();
        for _ in 0..MAX_ITERATIONS {
            let y_prev = y.clone();
            // y = (y^2 + c) / (2y + b - D)
            let numerator = &y * &y + &c;
            let lhs = &y * BigUint::from(2u8) + &b;
            if lhs <= d_big {
                return Err(anyhow!("y iteration hit non-positive denominator"));
            }
            y = numerator / (lhs - &d_big);

            let diff = if y > y_prev { &y - &y_prev } else { &y_prev - &y };
            if diff <= BigUint::from(1u8) {
                return y.to_u128().ok_or_else(|| anyhow!("y overflow"));
            }
        }
        Err(anyhow!("y failed to converge within {} iterations", MAX_ITERATIONS))
    }

    #[derive(Debug, Clone)]
    pub struct StableSwapResult {
        pub amount_out: u128,
        pub fee_amount: u128,
        pub price_impact_bps: u32,
    }

    /// Full swap: bump the input balance, re-solve y, fee on output.
    pub fn swap_output(
        amount_in: u128,
        balance_in: u128,
        balance_out: u128,
        amp: u64,
        fee_bps: u32,
    ) -> Result<StableSwapResult> {
        if amount_in == 0 {
            return Err(anyhow!("input amount cannot be zero"));
        }
        if fee_bps >= BPS_DENOMINATOR {
            return Err(anyhow!("fee rate cannot be >= 100%"));
        }
        let d = get_d(balance_in, balance_out, amp)?;
        let new_in = balance_in
            .checked_add(amount_in)
            .ok_or_else(|| anyhow!("input balance overflow"))?;
        let new_out = get_y(new_in, d, amp)?;
        if new_out >= balance_out {
            return Err(anyhow!("curve produced non-positive output"));
        }
        // The conventional -1 absorbs integer rounding in the solver.
        let gross_out = balance_out - new_out - 1;

        let fee_amount = (BigUint::from(gross_out) * BigUint::from(fee_bps)
            / BigUint::from(BPS_DENOMINATOR))
        .to_u128()
        .unwrap_or(0);
        let amount_out = gross_out.saturating_sub(fee_amount);
        if amount_out == 0 {
            return Err(anyhow!("output rounds to zero"));
        }

        let price_impact_bps =
            super::utils::price_impact_bps(amount_in, amount_out, balance_in, balance_out);
        Ok(StableSwapResult {
            amount_out,
            fee_amount,
            price_impact_bps,
        })
    }
}

/// Cross-family helpers.
pub mod utils {
    use super::*;

    /// Execution-vs-spot price degradation in basis points, never negative.
    /// spot = R_out / R_in, execution = out / in,
    /// impact = 1 - execution / spot.
    pub fn price_impact_bps(
        amount_in: u128,
        amount_out: u128,
        reserve_in: u128,
        reserve_out: u128,
    ) -> u32 {
        if amount_in == 0 || reserve_in == 0 || reserve_out == 0 {
            return 0;
        }
        let ratio = (BigUint::from(amount_out)
            * BigUint::from(reserve_in)
            * BigUint::from(BPS_DENOMINATOR))
            / (BigUint::from(amount_in) * BigUint::from(reserve_out));
        let ratio = ratio.to_u32().unwrap_or(BPS_DENOMINATOR);
        BPS_DENOMINATOR.saturating_sub(ratio)
    }

    /// Minimum acceptable output under the caller's slippage tolerance:
    /// expected * (10000 - bps) / 10000, clamped to zero at >= 100%.
    pub fn minimum_output_with_slippage(expected_output: u128, slippage_bps: u32) -> u128 {
        if slippage_bps >= BPS_DENOMINATOR {
            return 0;
        }
        let min = BigUint::from(expected_output) * BigUint::from(BPS_DENOMINATOR - slippage_bps)
            / BigUint::from(BPS_DENOMINATOR);
        min.to_u128().unwrap_or(expected_output)
    }

    /// Calibrates effective constant-product depth for a non-CP source so
    /// the local model reproduces the observed (input, output) point exactly.
    /// Solves for s in out = a*s*R_out / (s*R_in + a) where a is the
    /// post-fee input; returns the raw balances when the point is not
    /// representable (output at or above spot).
    pub fn effective_cpmm_reserves(
        amount_in_after_fee: u128,
        amount_out: u128,
        balance_in: u128,
        balance_out: u128,
    ) -> (u128, u128) {
        let a = amount_in_after_fee as f64;
        let o = amount_out as f64;
        let r_in = balance_in as f64;
        let r_out = balance_out as f64;
        let denom = a * r_out - o * r_in;
        if denom <= 0.0 {
            return (balance_in, balance_out);
        }
        let s = (o * a) / denom;
        if !s.is_finite() || s < 1.0 {
            return (balance_in, balance_out);
        }
        let scaled_in = (r_in * s).min(u128::MAX as f64) as u128;
        let scaled_out = (r_out * s).min(u128::MAX as f64) as u128;
        (scaled_in.max(balance_in), scaled_out.max(balance_out))
    }
}

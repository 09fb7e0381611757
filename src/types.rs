// src/types.rs
//
// Wire-facing and internal data model for the quote pipeline. Amounts are
// u128 in the token's smallest unit and serialize as decimal strings, since
// JSON numbers cannot carry 18-decimal token amounts safely.

use serde::{Deserialize, Serialize};

/// Serde helpers for string-encoded u128 amounts.
pub mod amount_str {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &u128, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse::<u128>()
            .map_err(|e| de::Error::custom(format!("invalid amount '{}': {}", raw, e)))
    }
}

/// The closed set of pricing model families the engine understands.
/// Adding a family is a code change by design; every consumer matches
/// exhaustively so the compiler flags the new arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolFamily {
    ConstantProduct,
    ConcentratedLiquidity,
    StableCurve,
}

/// Identifies one liquidity source (a venue on a chain).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId {
    pub name: String,
    pub family: ProtocolFamily,
}

impl SourceId {
    pub fn new(name: impl Into<String>, family: ProtocolFamily) -> Self {
        Self {
            name: name.into(),
            family,
        }
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// One inbound quote request. Immutable for the duration of the call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    pub chain_id: u64,
    pub token_in: String,
    pub token_out: String,
    #[serde(with = "amount_str")]
    pub amount_in: u128,
    pub max_slippage_bps: u32,
    /// Total time budget for the request, milliseconds. Optional on the
    /// wire; zero means "use the configured default".
    #[serde(default)]
    pub deadline_ms: u64,
}

impl SwapRequest {
    pub fn pair(&self) -> String {
        format!("{}/{}", self.token_in, self.token_out)
    }
}

/// Point-in-time pool state as fetched from the chain. Fields beyond the
/// reserves are family-specific and optional, mirroring how heterogeneous
/// venues report state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub address: String,
    pub reserve_in: u128,
    pub reserve_out: u128,
    pub fee_bps: u32,
    pub sqrt_price: Option<u128>,
    pub liquidity: Option<u128>,
    pub amp_factor: Option<u64>,
}

/// Effective local constant-product model of a source at the quoted size.
/// Exact for constant-product pools; a local linearization for the other
/// families. The optimizer evaluates this to price partial fills without
/// another network round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalCurve {
    #[serde(with = "amount_str")]
    pub reserve_in: u128,
    #[serde(with = "amount_str")]
    pub reserve_out: u128,
    pub fee_bps: u32,
}

/// Unsigned transaction skeleton for executing against one source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxDraft {
    pub to: String,
    pub calldata: String,
}

/// A single source's answer for the full requested amount.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceQuote {
    pub source: SourceId,
    #[serde(with = "amount_str")]
    pub amount_out: u128,
    pub price_impact_bps: u32,
    /// 0..=100; lowered when the quote came from a fallback pricing path.
    pub confidence: u8,
    pub pool: PoolSnapshot,
    pub curve: LocalCurve,
    pub tx_draft: TxDraft,
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GasMethod {
    Simulated,
    Heuristic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimate {
    pub gas_units: u64,
    pub buffered_gas_units: u64,
    pub method: GasMethod,
}

impl GasEstimate {
    pub fn is_heuristic(&self) -> bool {
        self.method == GasMethod::Heuristic
    }
}

/// One leg of the chosen route. Percentages across a route sum to exactly 100.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteAllocation {
    pub source: SourceId,
    pub percentage: u8,
    #[serde(with = "amount_str")]
    pub expected_amount_out: u128,
    pub gas_units: u64,
    pub confidence: u8,
}

/// A non-winning single-source route reported for transparency.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlternativeRoute {
    pub source: SourceId,
    #[serde(with = "amount_str")]
    pub amount_out: u128,
    pub price_impact_bps: u32,
    pub confidence: u8,
}

/// Severity buckets for reported price impact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImpactSeverity {
    Low,
    Medium,
    High,
    Severe,
}

impl ImpactSeverity {
    pub fn from_bps(bps: u32) -> Self {
        match bps {
            0..=49 => ImpactSeverity::Low,
            50..=199 => ImpactSeverity::Medium,
            200..=499 => ImpactSeverity::High,
            _ => ImpactSeverity::Severe,
        }
    }
}

/// The finished product of one pipeline run. Immutable; a refresh produces a
/// new value rather than mutating this one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub best_route: Vec<RouteAllocation>,
    pub alternative_routes: Vec<AlternativeRoute>,
    #[serde(with = "amount_str")]
    pub amount_out: u128,
    #[serde(with = "amount_str")]
    pub amount_out_min: u128,
    pub price_impact_bps: u32,
    pub impact_severity: ImpactSeverity,
    /// Buffered gas units summed over every leg of the best route.
    pub gas_estimate: u64,
    pub degraded_confidence: bool,
    pub generated_at_ms: u64,
    pub response_time_ms: u64,
    pub cache_key: String,
}

impl Quote {
    /// Route invariant check used by tests and debug assertions.
    pub fn percentages_sum_to_100(&self) -> bool {
        self.best_route.iter().map(|a| a.percentage as u32).sum::<u32>() == 100
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_amount_roundtrips_as_string() {
        let req = SwapRequest {
            chain_id: 1,
            token_in: "WETH".to_string(),
            token_out: "USDC".to_string(),
            amount_in: 340_282_366_920_938_463_463_374_607_431,
            max_slippage_bps: 50,
            deadline_ms: 2000,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"amountIn\":\"340282366920938463463374607431\""));
        let back: SwapRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.amount_in, req.amount_in);
    }

    #[test]
    fn test_request_without_deadline_accepted() {
        // Callers are not required to send deadlineMs; the engine fills in
        // the configured default for a zero deadline.
        let json = r#"{"chainId":1,"tokenIn":"WETH","tokenOut":"USDC","amountIn":"10000","maxSlippageBps":50}"#;
        let req: SwapRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.deadline_ms, 0);
        assert_eq!(req.amount_in, 10_000);
    }

    #[test]
    fn test_non_numeric_amount_rejected() {
        let json = r#"{"chainId":1,"tokenIn":"A","tokenOut":"B","amountIn":"12x","maxSlippageBps":50,"deadlineMs":2000}"#;
        assert!(serde_json::from_str::<SwapRequest>(json).is_err());
    }

    #[test]
    fn test_impact_severity_buckets() {
        assert_eq!(ImpactSeverity::from_bps(0), ImpactSeverity::Low);
        assert_eq!(ImpactSeverity::from_bps(49), ImpactSeverity::Low);
        assert_eq!(ImpactSeverity::from_bps(50), ImpactSeverity::Medium);
        assert_eq!(ImpactSeverity::from_bps(200), ImpactSeverity::High);
        assert_eq!(ImpactSeverity::from_bps(1200), ImpactSeverity::Severe);
    }
}

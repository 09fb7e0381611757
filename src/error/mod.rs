use thiserror::Error;

/// Error taxonomy for the quote pipeline.
///
/// Adapter-level failures (`AdapterTimeout`, `AdapterProtocolError`,
/// `NoLiquidity`) are recorded against the failing source and never abort a
/// request on their own; request-level failures (`NoValidRoute`,
/// `DeadlineExceeded`, validation errors) map directly to HTTP responses.
#[derive(Debug, Clone, Error)]
pub enum QuoterError {
    /// A single source adapter exceeded its per-call time budget
    #[error("Adapter Timeout: {0}")]
    AdapterTimeout(String),

    /// A source adapter returned malformed or protocol-violating data
    #[error("Adapter Protocol Error: {0}")]
    AdapterProtocolError(String),

    /// The source has no pool (or no usable depth) for the requested pair
    #[error("No Liquidity: {0}")]
    NoLiquidity(String),

    /// Every eligible source failed or was skipped; nothing to rank
    #[error("No Valid Route: {0}")]
    NoValidRoute(String),

    /// The global deadline elapsed before any source completed
    #[error("Deadline Exceeded: {0}")]
    DeadlineExceeded(String),

    /// Gas estimation fell back to heuristics; quote accuracy is reduced
    #[error("Gas Estimation Degraded: {0}")]
    GasEstimationDegraded(String),

    /// Iterative curve solving failed to converge within the iteration bound
    #[error("Convergence Failure: {0}")]
    ConvergenceFailure(String),

    /// Request carried a zero, overflowing, or otherwise unusable amount
    #[error("Invalid Amount: {0}")]
    InvalidAmount(String),

    /// Token pair not supported on the requested chain by any source
    #[error("Unsupported Pair: {0}")]
    UnsupportedPair(String),

    /// Circuit breaker is open for the source, call skipped
    #[error("Circuit Breaker Open: {0}")]
    CircuitBreakerOpen(String),

    /// Outbound RPC transport failures
    #[error("RPC Error: {0}")]
    RpcError(String),

    /// Malformed responses from chain nodes
    #[error("Parse Error: {0}")]
    ParseError(String),

    /// Configuration errors
    #[error("Config Error: {0}")]
    ConfigError(String),

    /// Quote cache internal errors
    #[error("Cache Error: {0}")]
    CacheError(String),

    /// Unknown/unclassified errors
    #[error("Unknown Error: {0}")]
    Unknown(String),
}

impl From<serde_json::Error> for QuoterError {
    fn from(err: serde_json::Error) -> Self {
        QuoterError::ParseError(format!("JSON error: {}", err))
    }
}

impl From<anyhow::Error> for QuoterError {
    fn from(err: anyhow::Error) -> Self {
        QuoterError::AdapterProtocolError(err.to_string())
    }
}

impl From<reqwest::Error> for QuoterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            QuoterError::AdapterTimeout(err.to_string())
        } else {
            QuoterError::RpcError(err.to_string())
        }
    }
}

impl QuoterError {
    /// Whether a retry against the same source could plausibly succeed.
    /// Drives circuit breaker accounting: recoverable failures count toward
    /// tripping the breaker, non-recoverable ones mean the request itself
    /// was bad.
    pub fn is_recoverable(&self) -> bool {
        match self {
            QuoterError::AdapterTimeout(_) => true,
            QuoterError::AdapterProtocolError(_) => true,
            QuoterError::NoLiquidity(_) => false,
            QuoterError::NoValidRoute(_) => false,
            QuoterError::DeadlineExceeded(_) => false,
            QuoterError::GasEstimationDegraded(_) => true,
            QuoterError::ConvergenceFailure(_) => false,
            QuoterError::InvalidAmount(_) => false,
            QuoterError::UnsupportedPair(_) => false,
            QuoterError::CircuitBreakerOpen(_) => false,
            QuoterError::RpcError(_) => true,
            QuoterError::ParseError(_) => false,
            QuoterError::ConfigError(_) => false,
            QuoterError::CacheError(_) => true,
            QuoterError::Unknown(_) => true,
        }
    }

    /// Whether this failure should be charged against the source's breaker.
    /// Pair-specific conditions (no pool, unsupported pair) say nothing about
    /// the source's health and are not charged.
    pub fn counts_against_breaker(&self) -> bool {
        matches!(
            self,
            QuoterError::AdapterTimeout(_)
                | QuoterError::AdapterProtocolError(_)
                | QuoterError::RpcError(_)
                | QuoterError::ParseError(_)
        )
    }

    /// Categorizes error for metrics and logging
    pub fn categorize(&self) -> ErrorCategory {
        match self {
            QuoterError::AdapterTimeout(_) | QuoterError::RpcError(_) => ErrorCategory::Network,
            QuoterError::AdapterProtocolError(_) | QuoterError::ParseError(_) => {
                ErrorCategory::Data
            }
            QuoterError::NoLiquidity(_)
            | QuoterError::NoValidRoute(_)
            | QuoterError::UnsupportedPair(_) => ErrorCategory::Routing,
            QuoterError::DeadlineExceeded(_) => ErrorCategory::Deadline,
            QuoterError::GasEstimationDegraded(_) | QuoterError::ConvergenceFailure(_) => {
                ErrorCategory::Accuracy
            }
            QuoterError::InvalidAmount(_) | QuoterError::ConfigError(_) => {
                ErrorCategory::Configuration
            }
            QuoterError::CircuitBreakerOpen(_) => ErrorCategory::Safety,
            QuoterError::CacheError(_) => ErrorCategory::Infrastructure,
            QuoterError::Unknown(_) => ErrorCategory::Critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorCategory {
    Network,
    Data,
    Routing,
    Deadline,
    Accuracy,
    Safety,
    Configuration,
    Infrastructure,
    Critical,
}

pub type Result<T> = std::result::Result<T, QuoterError>;

// src/coordinator.rs
//
// Scatter-gather over the eligible source adapters. Everything is
// dispatched at once, results are drained in completion order, and the
// global deadline cuts off stragglers; a slow venue can only cost its own
// quote, never the request.

use log::{debug, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::breaker::CircuitBreakerRegistry;
use crate::error::{QuoterError, Result};
use crate::source::SourceAdapter;
use crate::types::{SourceId, SourceQuote, SwapRequest};

/// What came back from one fan-out round.
#[derive(Debug, Default)]
pub struct GatherOutcome {
    pub quotes: Vec<SourceQuote>,
    pub errors: Vec<(SourceId, QuoterError)>,
    /// Adapters that finished (successfully or not) before the deadline.
    pub completed: usize,
    pub dispatched: usize,
    /// Deadline fired with work still outstanding.
    pub deadline_hit: bool,
}

impl GatherOutcome {
    /// At least one source hit a degraded-accuracy path.
    pub fn any_errors_degrade_confidence(&self) -> bool {
        self.errors
            .iter()
            .any(|(_, e)| matches!(e, QuoterError::ConvergenceFailure(_)))
    }
}

pub struct Coordinator {
    breaker: Arc<CircuitBreakerRegistry>,
    safety_margin: Duration,
}

impl Coordinator {
    pub fn new(breaker: Arc<CircuitBreakerRegistry>, safety_margin_ms: u64) -> Self {
        Self {
            breaker,
            safety_margin: Duration::from_millis(safety_margin_ms),
        }
    }

    /// Fans the request out to every eligible adapter and collects whatever
    /// lands before the deadline.
    ///
    /// # Errors
    /// `UnsupportedPair` when no adapter can serve the pair/chain at all,
    /// `NoValidRoute` when adapters exist but every breaker refused them,
    /// `DeadlineExceeded` when the deadline fired before any adapter
    /// completed.
    pub async fn gather(
        &self,
        adapters: &[Arc<dyn SourceAdapter>],
        req: &SwapRequest,
    ) -> Result<GatherOutcome> {
        let supported: Vec<_> = adapters.iter().filter(|a| a.supports(req)).collect();
        if supported.is_empty() {
            return Err(QuoterError::UnsupportedPair(format!(
                "{} on chain {}",
                req.pair(),
                req.chain_id
            )));
        }

        let mut eligible = Vec::new();
        for adapter in supported {
            if self.breaker.allow_request(&adapter.id().name) {
                eligible.push(adapter.clone());
            } else {
                debug!("skipping {}: breaker open", adapter.id().name);
            }
        }
        if eligible.is_empty() {
            return Err(QuoterError::NoValidRoute(format!(
                "all sources for {} are circuit-broken",
                req.pair()
            )));
        }

        let budget = Duration::from_millis(
            req.deadline_ms
                .saturating_sub(self.safety_margin.as_millis() as u64),
        );
        let deadline = Instant::now() + budget;

        let mut outcome = GatherOutcome {
            dispatched: eligible.len(),
            ..Default::default()
        };
        let mut pending: HashSet<SourceId> = eligible.iter().map(|a| a.id().clone()).collect();

        let mut tasks = JoinSet::new();
        for adapter in eligible {
            let req = req.clone();
            tasks.spawn(async move {
                let id = adapter.id().clone();
                let result = adapter.fetch_quote(&req).await;
                (id, result)
            });
        }

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((id, result)))) => {
                    pending.remove(&id);
                    outcome.completed += 1;
                    match result {
                        Ok(quote) => {
                            self.breaker.record_success(&id.name);
                            outcome.quotes.push(quote);
                        }
                        Err(e) => {
                            if e.counts_against_breaker() {
                                self.breaker.record_failure(&id.name);
                            }
                            debug!("{} failed: {}", id.name, e);
                            outcome.errors.push((id, e));
                        }
                    }
                }
                Ok(Some(Err(join_err))) => {
                    // A panicked adapter task; charge nothing, count nothing.
                    warn!("adapter task aborted: {}", join_err);
                }
                Ok(None) => break,
                Err(_) => {
                    // Deadline: abandon stragglers, charge their breakers.
                    outcome.deadline_hit = true;
                    tasks.abort_all();
                    for id in pending.drain() {
                        warn!("{} abandoned at deadline", id.name);
                        self.breaker.record_failure(&id.name);
                        outcome.errors.push((
                            id.clone(),
                            QuoterError::AdapterTimeout(format!(
                                "{} missed the {}ms deadline",
                                id.name, req.deadline_ms
                            )),
                        ));
                    }
                    break;
                }
            }
        }

        if outcome.deadline_hit && outcome.completed == 0 {
            return Err(QuoterError::DeadlineExceeded(format!(
                "no source completed within {}ms",
                req.deadline_ms
            )));
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LocalCurve, ProtocolFamily, TxDraft};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    /// Adapter that answers after a fixed delay, with a scripted result.
    struct DelayedAdapter {
        id: SourceId,
        delay: Duration,
        result: std::result::Result<u128, QuoterError>,
    }

    impl DelayedAdapter {
        fn ok(name: &str, delay_ms: u64, amount_out: u128) -> Arc<dyn SourceAdapter> {
            Arc::new(Self {
                id: SourceId::new(name, ProtocolFamily::ConstantProduct),
                delay: Duration::from_millis(delay_ms),
                result: Ok(amount_out),
            })
        }

        fn failing(name: &str, delay_ms: u64, err: QuoterError) -> Arc<dyn SourceAdapter> {
            Arc::new(Self {
                id: SourceId::new(name, ProtocolFamily::ConstantProduct),
                delay: Duration::from_millis(delay_ms),
                result: Err(err),
            })
        }
    }

    #[async_trait]
    impl SourceAdapter for DelayedAdapter {
        fn id(&self) -> &SourceId {
            &self.id
        }

        fn supports(&self, _req: &SwapRequest) -> bool {
            true
        }

        async fn fetch_quote(&self, _req: &SwapRequest) -> Result<SourceQuote> {
            tokio::time::sleep(self.delay).await;
            let amount_out = self.result.clone()?;
            Ok(SourceQuote {
                source: self.id.clone(),
                amount_out,
                price_impact_bps: 10,
                confidence: 95,
                pool: Default::default(),
                curve: LocalCurve {
                    reserve_in: 1_000_000,
                    reserve_out: 1_000_000,
                    fee_bps: 30,
                },
                tx_draft: TxDraft::default(),
                degraded: false,
            })
        }
    }

    fn request(deadline_ms: u64) -> SwapRequest {
        SwapRequest {
            chain_id: 1,
            token_in: "WETH".to_string(),
            token_out: "USDC".to_string(),
            amount_in: 1_000,
            max_slippage_bps: 50,
            deadline_ms,
        }
    }

    fn coordinator() -> (Coordinator, Arc<CircuitBreakerRegistry>) {
        let breaker = Arc::new(CircuitBreakerRegistry::new(
            3,
            Duration::from_secs(5),
            Duration::from_secs(300),
        ));
        (Coordinator::new(breaker.clone(), 50), breaker)
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_fast_sources_collected() {
        let (coord, _) = coordinator();
        let adapters = vec![
            DelayedAdapter::ok("a", 10, 100),
            DelayedAdapter::ok("b", 20, 200),
            DelayedAdapter::ok("c", 30, 300),
        ];
        let outcome = coord.gather(&adapters, &request(2000)).await.unwrap();
        assert_eq!(outcome.quotes.len(), 3);
        assert_eq!(outcome.completed, 3);
        assert!(!outcome.deadline_hit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_source_excluded_at_deadline() {
        // 50ms deadline with zero margin here would leave nothing; use a
        // request where margin leaves 150ms of budget.
        let (coord, _) = coordinator();
        let adapters = vec![
            DelayedAdapter::ok("fast", 10, 100),
            DelayedAdapter::ok("slow", 10_000, 999),
        ];
        let outcome = coord.gather(&adapters, &request(200)).await.unwrap();
        assert_eq!(outcome.quotes.len(), 1);
        assert_eq!(outcome.quotes[0].source.name, "fast");
        assert!(outcome.deadline_hit);
        // The straggler is recorded as a timeout error.
        assert!(outcome
            .errors
            .iter()
            .any(|(id, e)| id.name == "slow" && matches!(e, QuoterError::AdapterTimeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_completions_is_deadline_exceeded() {
        let (coord, _) = coordinator();
        let adapters = vec![
            DelayedAdapter::ok("s1", 5_000, 100),
            DelayedAdapter::ok("s2", 5_000, 200),
        ];
        match coord.gather(&adapters, &request(100)).await {
            Err(QuoterError::DeadlineExceeded(_)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_failures_is_empty_outcome_not_deadline() {
        let (coord, _) = coordinator();
        let adapters = vec![
            DelayedAdapter::failing("s1", 5, QuoterError::AdapterTimeout("t".into())),
            DelayedAdapter::failing("s2", 5, QuoterError::NoLiquidity("n".into())),
        ];
        let outcome = coord.gather(&adapters, &request(2000)).await.unwrap();
        assert!(outcome.quotes.is_empty());
        assert_eq!(outcome.completed, 2);
        assert!(!outcome.deadline_hit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_open_source_never_dispatched() {
        let (coord, breaker) = coordinator();
        for _ in 0..3 {
            breaker.record_failure("broken");
        }
        let adapters = vec![
            DelayedAdapter::ok("healthy", 10, 100),
            DelayedAdapter::ok("broken", 10, 200),
        ];
        let outcome = coord.gather(&adapters, &request(2000)).await.unwrap();
        assert_eq!(outcome.dispatched, 1);
        assert_eq!(outcome.quotes.len(), 1);
        assert_eq!(outcome.quotes[0].source.name, "healthy");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_feed_the_breaker() {
        let (coord, breaker) = coordinator();
        let adapters =
            vec![DelayedAdapter::failing("flaky", 5, QuoterError::RpcError("boom".into()))];
        for _ in 0..3 {
            let _ = coord.gather(&adapters, &request(2000)).await;
        }
        // Third consecutive failure opened the breaker.
        assert!(!breaker.allow_request("flaky"));
    }

    #[tokio::test]
    async fn test_no_supporting_adapter_is_unsupported_pair() {
        struct Unsupporting(SourceId);
        #[async_trait]
        impl SourceAdapter for Unsupporting {
            fn id(&self) -> &SourceId {
                &self.0
            }
            fn supports(&self, _req: &SwapRequest) -> bool {
                false
            }
            async fn fetch_quote(&self, _req: &SwapRequest) -> Result<SourceQuote> {
                unreachable!()
            }
        }
        let (coord, _) = coordinator();
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(Unsupporting(SourceId::new(
            "elsewhere",
            ProtocolFamily::ConstantProduct,
        )))];
        match coord.gather(&adapters, &request(2000)).await {
            Err(QuoterError::UnsupportedPair(_)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }
}

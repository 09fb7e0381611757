// src/breaker.rs
//
// Per-source circuit breakers. A source that keeps failing is skipped
// entirely for a cool-down period instead of burning time budget on every
// request; recovery goes through a single half-open probe.

use dashmap::DashMap;
use log::{debug, info, warn};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view of one source's breaker, reported by GET /health.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterHealth {
    pub source: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
}

#[derive(Debug)]
struct BreakerEntry {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    cooldown: Duration,
    probe_taken: bool,
}

pub struct CircuitBreakerRegistry {
    entries: DashMap<String, BreakerEntry>,
    failure_threshold: u32,
    base_cooldown: Duration,
    max_cooldown: Duration,
}

impl CircuitBreakerRegistry {
    pub fn new(failure_threshold: u32, base_cooldown: Duration, max_cooldown: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            failure_threshold,
            base_cooldown,
            max_cooldown,
        }
    }

    fn entry_mut(&self, source: &str) -> dashmap::mapref::one::RefMut<'_, String, BreakerEntry> {
        self.entries
            .entry(source.to_string())
            .or_insert_with(|| BreakerEntry {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                cooldown: self.base_cooldown,
                probe_taken: false,
            })
    }

    /// Whether the source may be dispatched right now. An Open breaker whose
    /// cool-down has elapsed transitions to HalfOpen and admits exactly one
    /// probe call; further callers are refused until the probe resolves.
    pub fn allow_request(&self, source: &str) -> bool {
        let mut entry = self.entry_mut(source);
        match entry.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = entry
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= entry.cooldown {
                    entry.state = BreakerState::HalfOpen;
                    entry.probe_taken = true;
                    info!("breaker {}: HalfOpen, admitting probe", source);
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if entry.probe_taken {
                    false
                } else {
                    entry.probe_taken = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self, source: &str) {
        let mut entry = self.entry_mut(source);
        if entry.state != BreakerState::Closed {
            info!("breaker {}: recovered, closing", source);
        }
        entry.state = BreakerState::Closed;
        entry.consecutive_failures = 0;
        entry.opened_at = None;
        entry.cooldown = self.base_cooldown;
        entry.probe_taken = false;
    }

    pub fn record_failure(&self, source: &str) {
        let mut entry = self.entry_mut(source);
        match entry.state {
            BreakerState::HalfOpen => {
                // Failed probe: back to Open with a doubled, capped cool-down.
                entry.cooldown = (entry.cooldown * 2).min(self.max_cooldown);
                entry.state = BreakerState::Open;
                entry.opened_at = Some(Instant::now());
                entry.probe_taken = false;
                warn!(
                    "breaker {}: probe failed, reopening for {:?}",
                    source, entry.cooldown
                );
            }
            BreakerState::Closed => {
                entry.consecutive_failures += 1;
                if entry.consecutive_failures >= self.failure_threshold {
                    entry.state = BreakerState::Open;
                    entry.opened_at = Some(Instant::now());
                    warn!(
                        "breaker {}: OPENED after {} consecutive failures, cool-down {:?}",
                        source, entry.consecutive_failures, entry.cooldown
                    );
                } else {
                    debug!(
                        "breaker {}: failure {}/{}",
                        source, entry.consecutive_failures, self.failure_threshold
                    );
                }
            }
            BreakerState::Open => {
                // Late failure report while already open; nothing to change.
            }
        }
    }

    pub fn snapshot(&self) -> Vec<AdapterHealth> {
        let mut health: Vec<AdapterHealth> = self
            .entries
            .iter()
            .map(|e| AdapterHealth {
                source: e.key().clone(),
                state: e.value().state,
                consecutive_failures: e.value().consecutive_failures,
            })
            .collect();
        health.sort_by(|a, b| a.source.cmp(&b.source));
        health
    }
}

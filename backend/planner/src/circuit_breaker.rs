//! Per-provider circuit breaker.
//!
//! Closed → Open on the third consecutive failure; Open → Closed when the
//! cooldown has elapsed or as soon as a success is recorded.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Consecutive failures that open the circuit.
pub const FAILURE_THRESHOLD: u32 = 3;

/// How long an open circuit stays open after the last failure.
pub const COOLDOWN: Duration = Duration::from_millis(30_000);

/// Failure/cooldown state for one upstream provider.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreaker {
    failures_total: u64,
    consecutive_failures: u32,
    is_open: bool,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    cooldown_remaining: Duration,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&mut self) {
        self.record_failure_at(Instant::now());
    }

    pub fn record_failure_at(&mut self, now: Instant) {
        self.failures_total += 1;
        self.consecutive_failures += 1;
        self.last_failure = Some(now);
        self.last_failure_at = Some(Utc::now());

        if self.consecutive_failures >= FAILURE_THRESHOLD {
            self.is_open = true;
            self.cooldown_remaining = COOLDOWN;
        }
    }

    /// Closes the circuit immediately; the lifetime failure count is kept.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.is_open = false;
        self.cooldown_remaining = Duration::ZERO;
    }

    pub fn update_cooldown(&mut self) {
        self.update_cooldown_at(Instant::now());
    }

    pub fn update_cooldown_at(&mut self, now: Instant) {
        if !self.is_open {
            return;
        }
        let elapsed = self
            .last_failure
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(COOLDOWN);
        self.cooldown_remaining = COOLDOWN.saturating_sub(elapsed);

        if self.cooldown_remaining.is_zero() {
            self.is_open = false;
            self.consecutive_failures = 0;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn failures_total(&self) -> u64 {
        self.failures_total
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn cooldown_remaining(&self) -> Duration {
        self.cooldown_remaining
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            failures_total: self.failures_total,
            consecutive_failures: self.consecutive_failures,
            is_open: self.is_open,
            last_failure_time: self.last_failure_at,
            cooldown_remaining: self.cooldown_remaining.as_millis() as u64,
        }
    }
}

/// Serializable view of a breaker, served by `/providers/state`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub failures_total: u64,
    pub consecutive_failures: u32,
    pub is_open: bool,
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Milliseconds.
    pub cooldown_remaining: u64,
}

/// One breaker per provider name, shared across requests.
#[derive(Clone, Default)]
pub struct BreakerBoard {
    breakers: Arc<Mutex<BTreeMap<String, CircuitBreaker>>>,
}

impl BreakerBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh the cooldown and report whether calls to `provider` are allowed.
    pub async fn allows(&self, provider: &str) -> bool {
        let mut breakers = self.breakers.lock().await;
        let breaker = breakers.entry(provider.to_string()).or_default();
        let was_open = breaker.is_open();
        breaker.update_cooldown();
        if was_open && !breaker.is_open() {
            info!(provider = %provider, "Circuit closed after cooldown");
        }
        !breaker.is_open()
    }

    pub async fn record_success(&self, provider: &str) {
        let mut breakers = self.breakers.lock().await;
        let breaker = breakers.entry(provider.to_string()).or_default();
        if breaker.is_open() {
            info!(provider = %provider, "Circuit closed by successful call");
        }
        breaker.record_success();
    }

    pub async fn record_failure(&self, provider: &str) {
        let mut breakers = self.breakers.lock().await;
        let breaker = breakers.entry(provider.to_string()).or_default();
        let was_open = breaker.is_open();
        breaker.record_failure();
        if !was_open && breaker.is_open() {
            warn!(
                provider = %provider,
                failures_total = breaker.failures_total(),
                cooldown_ms = COOLDOWN.as_millis() as u64,
                "Circuit opened"
            );
        }
    }

    /// Manual reset of one provider's breaker.
    pub async fn reset(&self, provider: &str) {
        if let Some(breaker) = self.breakers.lock().await.get_mut(provider) {
            breaker.reset();
            info!(provider = %provider, "Circuit manually reset");
        }
    }

    /// Make sure `provider` shows up in snapshots before its first call.
    pub async fn register(&self, provider: &str) {
        self.breakers
            .lock()
            .await
            .entry(provider.to_string())
            .or_default();
    }

    pub async fn snapshot(&self) -> BTreeMap<String, BreakerSnapshot> {
        let mut breakers = self.breakers.lock().await;
        breakers
            .iter_mut()
            .map(|(name, breaker)| {
                breaker.update_cooldown();
                (name.clone(), breaker.snapshot())
            })
            .collect()
    }
}

//! Per-endpoint health tracking with a consecutive-failure circuit breaker
//!
//! Each endpoint's record sits behind its own lock so updates for different
//! endpoints never contend. The map of records is fixed at construction.
//!
//! Average latency is the cumulative mean over successful calls:
//! `avg_latency_ms = total_latency_ms / successful_requests`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use relay_llm::LlmError;

/// Health statistics for one endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointHealth {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Sum of latencies of successful calls
    pub total_latency_ms: f64,
    /// Cumulative mean latency of successful calls
    pub avg_latency_ms: f64,
    pub consecutive_failures: u32,
    pub healthy: bool,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for EndpointHealth {
    fn default() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            total_latency_ms: 0.0,
            avg_latency_ms: 0.0,
            consecutive_failures: 0,
            healthy: true,
            last_success: None,
            last_failure: None,
            last_error: None,
        }
    }
}

impl EndpointHealth {
    /// Fraction of successful calls; an unused endpoint counts as fully reliable
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}

/// Health table for every registered endpoint
#[derive(Debug)]
pub struct HealthTracker {
    records: HashMap<String, Mutex<EndpointHealth>>,
    threshold: u32,
}

impl HealthTracker {
    pub fn new<I, S>(endpoints: I, threshold: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            records: endpoints
                .into_iter()
                .map(|name| (name.into(), Mutex::new(EndpointHealth::default())))
                .collect(),
            threshold: threshold.max(1),
        }
    }

    /// Consecutive failures that open the circuit
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn record_success(&self, endpoint: &str, latency: Duration) {
        let Some(record) = self.records.get(endpoint) else {
            tracing::warn!(endpoint = %endpoint, "Success reported for unknown endpoint");
            return;
        };

        let recovered = {
            let mut health = record.lock();
            let was_healthy = health.healthy;
            health.total_requests += 1;
            health.successful_requests += 1;
            health.total_latency_ms += latency.as_secs_f64() * 1000.0;
            health.avg_latency_ms = health.total_latency_ms / health.successful_requests as f64;
            health.consecutive_failures = 0;
            health.healthy = true;
            health.last_success = Some(Utc::now());
            !was_healthy
        };

        if recovered {
            tracing::info!(endpoint = %endpoint, "Endpoint recovered - circuit closed");
        }
    }

    pub fn record_failure(&self, endpoint: &str, error: &LlmError) {
        let Some(record) = self.records.get(endpoint) else {
            tracing::warn!(endpoint = %endpoint, "Failure reported for unknown endpoint");
            return;
        };

        let opened = {
            let mut health = record.lock();
            health.total_requests += 1;
            health.failed_requests += 1;
            health.consecutive_failures += 1;
            health.last_failure = Some(Utc::now());
            health.last_error = Some(error.to_string());

            if health.healthy && health.consecutive_failures >= self.threshold {
                health.healthy = false;
                Some(health.consecutive_failures)
            } else {
                None
            }
        };

        if let Some(failures) = opened {
            metrics::counter!("relay_circuit_opened_total", "endpoint" => endpoint.to_string())
                .increment(1);
            tracing::warn!(
                endpoint = %endpoint,
                failures,
                error = %error,
                "Circuit opened - failure threshold reached"
            );
        }
    }

    pub fn snapshot(&self, endpoint: &str) -> Option<EndpointHealth> {
        self.records.get(endpoint).map(|r| r.lock().clone())
    }

    /// Snapshots of every endpoint, sorted by name
    pub fn snapshot_all(&self) -> Vec<(String, EndpointHealth)> {
        let mut all: Vec<_> = self
            .records
            .iter()
            .map(|(name, r)| (name.clone(), r.lock().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Re-derive every `healthy` flag from its counters.
    ///
    /// Returns how many records were corrected.
    pub fn reconcile(&self) -> usize {
        let mut corrected = 0;

        for (name, record) in &self.records {
            let mut health = record.lock();
            let expected = health.consecutive_failures < self.threshold;
            if health.healthy != expected {
                tracing::warn!(
                    endpoint = %name,
                    healthy = expected,
                    consecutive_failures = health.consecutive_failures,
                    "Reconciled drifted health flag"
                );
                health.healthy = expected;
                corrected += 1;
            }
        }

        corrected
    }

    /// Run [`reconcile`](Self::reconcile) every `every` until `shutdown` fires
    pub fn spawn_reconciler(
        self: &Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        let every = every.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::debug!(interval_secs = every.as_secs_f64(), "Health reconciler started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let corrected = tracker.reconcile();
                        tracing::trace!(corrected, "Health reconciliation pass");
                    }
                }
            }

            tracing::debug!("Health reconciler stopped");
        })
    }

    #[cfg(test)]
    fn with_record<R>(&self, endpoint: &str, f: impl FnOnce(&mut EndpointHealth) -> R) -> R {
        let record = self.records.get(endpoint).expect("endpoint registered");
        let mut health = record.lock();
        f(&mut health)
    }
}

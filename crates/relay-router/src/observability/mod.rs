//! Observability - per-operation performance metrics and reporting

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::time::Duration;

use crate::cache::CacheStats;
use crate::health::EndpointHealth;

/// Terminal state of one dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    CacheHit,
    Success,
    /// Every candidate failed
    Exhausted,
    /// No healthy candidate to try
    Unavailable,
    DeadlineExceeded,
    /// Rejected before selection (bad model spec, unknown endpoint, empty request)
    Rejected,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CacheHit => "cache_hit",
            Self::Success => "success",
            Self::Exhausted => "exhausted",
            Self::Unavailable => "unavailable",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::CacheHit | Self::Success)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedError {
    pub at: DateTime<Utc>,
    pub outcome: DispatchOutcome,
    pub message: String,
}

/// Aggregates for one logical operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationStats {
    pub count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_duration_ms: f64,
    pub avg_duration_ms: f64,
    /// Most recent errors, oldest first
    pub recent_errors: VecDeque<RecordedError>,
    pub outcomes: BTreeMap<DispatchOutcome, u64>,
}

impl OperationStats {
    pub fn success_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.count as f64
        }
    }
}

/// Per-operation counters owned by one router
#[derive(Debug)]
pub struct PerformanceMetrics {
    operations: Mutex<BTreeMap<String, OperationStats>>,
    max_errors: usize,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new(10)
    }
}

impl PerformanceMetrics {
    /// `max_errors` bounds the error history kept per operation
    pub fn new(max_errors: usize) -> Self {
        Self {
            operations: Mutex::new(BTreeMap::new()),
            max_errors,
        }
    }

    pub fn record(
        &self,
        operation: &str,
        elapsed: Duration,
        outcome: DispatchOutcome,
        error: Option<&str>,
    ) {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;

        {
            let mut operations = self.operations.lock();
            let stats = operations.entry(operation.to_string()).or_default();

            stats.count += 1;
            if outcome.is_success() {
                stats.success_count += 1;
            } else {
                stats.failure_count += 1;
            }
            stats.total_duration_ms += elapsed_ms;
            stats.avg_duration_ms = stats.total_duration_ms / stats.count as f64;
            *stats.outcomes.entry(outcome).or_insert(0) += 1;

            if let Some(message) = error {
                if self.max_errors > 0 {
                    if stats.recent_errors.len() >= self.max_errors {
                        stats.recent_errors.pop_front();
                    }
                    stats.recent_errors.push_back(RecordedError {
                        at: Utc::now(),
                        outcome,
                        message: message.to_string(),
                    });
                }
            }
        }

        metrics::counter!(
            "relay_dispatch_total",
            "operation" => operation.to_string(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        metrics::histogram!(
            "relay_dispatch_duration_seconds",
            "operation" => operation.to_string()
        )
        .record(elapsed.as_secs_f64());
    }

    pub fn operation(&self, operation: &str) -> Option<OperationStats> {
        self.operations.lock().get(operation).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, OperationStats> {
        self.operations.lock().clone()
    }
}

/// Diagnostic view of one endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointStatus {
    pub name: String,
    /// Passed activation (credential and URL usable)
    pub configured: bool,
    pub activation_error: Option<String>,
    pub default_model: String,
    pub priority: u32,
    pub health: EndpointHealth,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub operations: BTreeMap<String, OperationStats>,
    pub cache: CacheStats,
    pub endpoints: Vec<EndpointStatus>,
    pub generated_at: DateTime<Utc>,
}

impl PerformanceReport {
    /// Render in Prometheus text exposition format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        metric_header(
            &mut output,
            "relay_operation_calls_total",
            "counter",
            "Dispatches per operation",
        );
        for (name, stats) in &self.operations {
            let _ = writeln!(
                output,
                "relay_operation_calls_total{{operation=\"{name}\"}} {}",
                stats.count
            );
        }

        metric_header(
            &mut output,
            "relay_operation_failures_total",
            "counter",
            "Failed dispatches per operation",
        );
        for (name, stats) in &self.operations {
            let _ = writeln!(
                output,
                "relay_operation_failures_total{{operation=\"{name}\"}} {}",
                stats.failure_count
            );
        }

        metric_header(
            &mut output,
            "relay_operation_duration_ms_avg",
            "gauge",
            "Mean dispatch wall time in milliseconds",
        );
        for (name, stats) in &self.operations {
            let _ = writeln!(
                output,
                "relay_operation_duration_ms_avg{{operation=\"{name}\"}} {:.3}",
                stats.avg_duration_ms
            );
        }

        metric_header(
            &mut output,
            "relay_cache_entries",
            "gauge",
            "Entries held by the response cache",
        );
        let _ = writeln!(output, "relay_cache_entries {}", self.cache.total_entries);

        metric_header(
            &mut output,
            "relay_cache_hits_total",
            "counter",
            "Response cache hits",
        );
        let _ = writeln!(output, "relay_cache_hits_total {}", self.cache.hits);

        metric_header(
            &mut output,
            "relay_cache_misses_total",
            "counter",
            "Response cache misses",
        );
        let _ = writeln!(output, "relay_cache_misses_total {}", self.cache.misses);

        metric_header(
            &mut output,
            "relay_cache_hit_rate",
            "gauge",
            "Response cache hit rate",
        );
        let _ = writeln!(output, "relay_cache_hit_rate {:.4}", self.cache.hit_rate);

        metric_header(
            &mut output,
            "relay_endpoint_healthy",
            "gauge",
            "1 if the endpoint circuit is closed",
        );
        for endpoint in &self.endpoints {
            let _ = writeln!(
                output,
                "relay_endpoint_healthy{{endpoint=\"{}\"}} {}",
                endpoint.name,
                u8::from(endpoint.configured && endpoint.health.healthy)
            );
        }

        metric_header(
            &mut output,
            "relay_endpoint_requests_total",
            "counter",
            "Attempts per endpoint",
        );
        for endpoint in &self.endpoints {
            let _ = writeln!(
                output,
                "relay_endpoint_requests_total{{endpoint=\"{}\"}} {}",
                endpoint.name, endpoint.health.total_requests
            );
        }

        metric_header(
            &mut output,
            "relay_endpoint_latency_ms_avg",
            "gauge",
            "Mean latency of successful attempts in milliseconds",
        );
        for endpoint in &self.endpoints {
            let _ = writeln!(
                output,
                "relay_endpoint_latency_ms_avg{{endpoint=\"{}\"}} {:.3}",
                endpoint.name, endpoint.health.avg_latency_ms
            );
        }

        output
    }
}

fn metric_header(output: &mut String, name: &str, kind: &str, help: &str) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {kind}");
}

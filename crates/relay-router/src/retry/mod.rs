//! Retry executor - bounded retries with exponential backoff against one endpoint

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use relay_llm::{ChatRequest, ChatResponse, Endpoint, LlmError, Transport};

use crate::config::RetryConfig;
use crate::health::HealthTracker;

/// Retry budget and backoff curve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per endpoint, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure (1-based): base, 2*base, 4*base, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// All attempts against one endpoint failed
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointFailure {
    pub endpoint: String,
    pub attempts: u32,
    /// The last attempt's error
    pub error: LlmError,
}

impl fmt::Display for EndpointFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} attempt{}): {}",
            self.endpoint,
            self.attempts,
            if self.attempts == 1 { "" } else { "s" },
            self.error
        )
    }
}

/// Why [`RetryExecutor::call`] gave up
#[derive(Debug, Clone, PartialEq)]
pub enum CallError {
    /// Retry budget spent, or a non-retryable error
    Exhausted(EndpointFailure),
    /// The caller's deadline passed; carries failures recorded before it did
    DeadlineExceeded(Option<EndpointFailure>),
}

/// One attempt, folded into health and metrics once resolved
struct DispatchAttempt<'a> {
    endpoint: &'a Endpoint,
    number: u32,
    started: Instant,
    outcome: Result<ChatResponse, LlmError>,
}

/// Calls one endpoint with retries, reporting every attempt to the health table
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    transport: Arc<dyn Transport>,
    health: Arc<HealthTracker>,
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        health: Arc<HealthTracker>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            health,
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Call `endpoint` until it succeeds or the retry budget is spent.
    ///
    /// Each attempt is bounded by the endpoint timeout, or by the time left
    /// before `deadline` when that is shorter. Backoff never follows the last
    /// attempt. An attempt cut short by the caller's deadline is not counted
    /// against the endpoint.
    pub async fn call(
        &self,
        endpoint: &Endpoint,
        request: &ChatRequest,
        deadline: Option<Instant>,
    ) -> Result<ChatResponse, CallError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_failure: Option<EndpointFailure> = None;
        let mut number = 0;

        loop {
            number += 1;

            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            if remaining == Some(Duration::ZERO) {
                return Err(CallError::DeadlineExceeded(last_failure));
            }
            let (limit, deadline_bound) = match remaining {
                Some(left) if left < endpoint.timeout => (left, true),
                _ => (endpoint.timeout, false),
            };

            let started = Instant::now();
            let outcome =
                match tokio::time::timeout(limit, self.transport.send(endpoint, request)).await {
                    Ok(Ok(response)) if response.content.trim().is_empty() => {
                        Err(LlmError::EmptyResponse)
                    }
                    Ok(result) => result,
                    Err(_) if deadline_bound => {
                        tracing::debug!(
                            endpoint = %endpoint.name,
                            attempt = number,
                            "Attempt abandoned at dispatch deadline"
                        );
                        return Err(CallError::DeadlineExceeded(last_failure));
                    }
                    Err(_) => Err(LlmError::Timeout(endpoint.timeout)),
                };

            let error = match self.fold(DispatchAttempt {
                endpoint,
                number,
                started,
                outcome,
            }) {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            let retryable = error.is_retryable();
            let failure = EndpointFailure {
                endpoint: endpoint.name.clone(),
                attempts: number,
                error,
            };

            if number >= max_attempts || !retryable {
                return Err(CallError::Exhausted(failure));
            }

            let delay = self.policy.backoff(number);
            if let Some(deadline) = deadline {
                if deadline.saturating_duration_since(Instant::now()) <= delay {
                    return Err(CallError::DeadlineExceeded(Some(failure)));
                }
            }
            last_failure = Some(failure);

            tracing::debug!(
                endpoint = %endpoint.name,
                attempt = number,
                delay_ms = delay.as_millis() as u64,
                "Backing off before retry"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Report a resolved attempt to the health table and metrics
    fn fold(&self, attempt: DispatchAttempt<'_>) -> Result<ChatResponse, LlmError> {
        let name = &attempt.endpoint.name;
        let latency = attempt.started.elapsed();

        match attempt.outcome {
            Ok(response) => {
                self.health.record_success(name, latency);
                tracing::debug!(
                    endpoint = %name,
                    attempt = attempt.number,
                    latency_ms = latency.as_millis() as u64,
                    outcome = "success",
                    "Attempt succeeded"
                );
                Ok(response)
            }
            Err(error) => {
                self.health.record_failure(name, &error);
                metrics::counter!(
                    "relay_attempt_failures_total",
                    "endpoint" => name.clone(),
                    "kind" => error.kind()
                )
                .increment(1);
                tracing::warn!(
                    endpoint = %name,
                    attempt = attempt.number,
                    latency_ms = latency.as_millis() as u64,
                    outcome = error.kind(),
                    error = %error,
                    "Attempt failed"
                );
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_llm::{ChatMessage, Credential, GenerationOptions, MockOutcome, MockTransport};

    fn endpoint(name: &str) -> Endpoint {
        Endpoint::new(name, format!("https://{name}.test/v1"))
            .with_credential(Credential::new("key"))
            .with_timeout(Duration::from_secs(10))
    }

    fn request() -> ChatRequest {
        ChatRequest {
            model: "m".to_string(),
            messages: vec![ChatMessage::user("hi")],
            options: GenerationOptions::default(),
        }
    }

    fn executor(transport: Arc<MockTransport>, health: Arc<HealthTracker>) -> RetryExecutor {
        RetryExecutor::new(transport, health, RetryPolicy::default())
    }

    fn refused() -> MockOutcome {
        MockOutcome::Fail(LlmError::Transport("refused".to_string()))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(5));
        assert_eq!(policy.backoff(40), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventual_success_records_each_attempt() {
        let transport = Arc::new(
            MockTransport::new()
                .script("a", [refused(), refused()])
                .replying("a", "ok"),
        );
        let health = Arc::new(HealthTracker::new(["a"], 5));
        let executor = executor(Arc::clone(&transport), Arc::clone(&health));

        let started = Instant::now();
        let response = executor.call(&endpoint("a"), &request(), None).await.unwrap();

        assert_eq!(response.content, "ok");
        assert_eq!(transport.calls_to("a"), 3);
        // 1s + 2s of backoff
        assert_eq!(started.elapsed(), Duration::from_secs(3));

        let snapshot = health.snapshot("a").unwrap();
        assert_eq!(snapshot.failed_requests, 2);
        assert_eq!(snapshot.successful_requests, 1);
        assert_eq!(snapshot.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_carries_last_error_and_skips_final_backoff() {
        let transport = Arc::new(
            MockTransport::new()
                .script("a", [refused(), refused()])
                .always("a", MockOutcome::Empty),
        );
        let health = Arc::new(HealthTracker::new(["a"], 3));
        let executor = executor(Arc::clone(&transport), Arc::clone(&health));

        let started = Instant::now();
        let err = executor.call(&endpoint("a"), &request(), None).await.unwrap_err();

        assert_eq!(
            err,
            CallError::Exhausted(EndpointFailure {
                endpoint: "a".to_string(),
                attempts: 3,
                error: LlmError::EmptyResponse,
            })
        );
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert!(!health.snapshot("a").unwrap().healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoint_timeout_counts_as_failure() {
        let slow = MockOutcome::Delay(
            Duration::from_secs(30),
            Box::new(MockOutcome::Reply("late".to_string())),
        );
        let transport = Arc::new(MockTransport::new().always("a", slow));
        let health = Arc::new(HealthTracker::new(["a"], 3));
        let executor = RetryExecutor::new(
            transport,
            Arc::clone(&health),
            RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::default()
            },
        );

        let err = executor.call(&endpoint("a"), &request(), None).await.unwrap_err();
        match err {
            CallError::Exhausted(failure) => {
                assert_eq!(failure.error, LlmError::Timeout(Duration::from_secs(10)))
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(health.snapshot("a").unwrap().failed_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_retries() {
        let transport = Arc::new(MockTransport::new().failing("a"));
        let health = Arc::new(HealthTracker::new(["a"], 10));
        let executor = executor(Arc::clone(&transport), Arc::clone(&health));

        // First backoff (1s) would cross the deadline
        let deadline = Instant::now() + Duration::from_millis(500);
        let err = executor
            .call(&endpoint("a"), &request(), Some(deadline))
            .await
            .unwrap_err();

        assert!(matches!(err, CallError::DeadlineExceeded(Some(ref f)) if f.attempts == 1));
        assert_eq!(transport.calls_to("a"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_backoff_against_deadline() {
        let transport = Arc::new(MockTransport::new().failing("a"));
        let health = Arc::new(HealthTracker::new(["a"], 10));
        let executor = RetryExecutor::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            health,
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::MAX,
                max_delay: Duration::MAX,
            },
        );

        let deadline = Instant::now() + Duration::from_secs(30);
        let err = executor
            .call(&endpoint("a"), &request(), Some(deadline))
            .await
            .unwrap_err();

        assert!(matches!(err, CallError::DeadlineExceeded(Some(ref f)) if f.attempts == 1));
        assert_eq!(transport.calls_to("a"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cut_attempt_is_not_a_health_failure() {
        let slow = MockOutcome::Delay(
            Duration::from_secs(5),
            Box::new(MockOutcome::Reply("late".to_string())),
        );
        let transport = Arc::new(MockTransport::new().always("a", slow));
        let health = Arc::new(HealthTracker::new(["a"], 3));
        let executor = executor(transport, Arc::clone(&health));

        let deadline = Instant::now() + Duration::from_secs(2);
        let err = executor
            .call(&endpoint("a"), &request(), Some(deadline))
            .await
            .unwrap_err();

        assert_eq!(err, CallError::DeadlineExceeded(None));
        assert_eq!(health.snapshot("a").unwrap().total_requests, 0);
    }

    #[tokio::test]
    async fn test_not_configured_is_not_retried() {
        let transport = Arc::new(
            MockTransport::new()
                .always("a", MockOutcome::Fail(LlmError::NotConfigured("a".to_string()))),
        );
        let health = Arc::new(HealthTracker::new(["a"], 3));
        let executor = executor(Arc::clone(&transport), health);

        let err = executor.call(&endpoint("a"), &request(), None).await.unwrap_err();
        assert!(matches!(err, CallError::Exhausted(ref f) if f.attempts == 1));
        assert_eq!(transport.calls_to("a"), 1);
    }

    #[test]
    fn test_failure_display() {
        let failure = EndpointFailure {
            endpoint: "openai".to_string(),
            attempts: 3,
            error: LlmError::Timeout(Duration::from_secs(30)),
        };
        assert_eq!(failure.to_string(), "openai (3 attempts): Timed out after 30s");
    }
}

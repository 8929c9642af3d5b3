//! Router - the dispatch façade over registry, health, cache and retries

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use relay_llm::{
    ChatMessage, ChatRequest, ChatResponse, Endpoint, GenerationOptions, HttpTransport, Transport,
};

use crate::balancer::LoadBalancer;
use crate::cache::{fingerprint, CacheStats, ResponseCache};
use crate::config::{ConfigError, RouterConfig};
use crate::health::HealthTracker;
use crate::observability::{DispatchOutcome, PerformanceMetrics, PerformanceReport};
use crate::registry::{EndpointRegistry, RegistryError};
use crate::retry::{CallError, EndpointFailure, RetryExecutor, RetryPolicy};

pub use crate::observability::EndpointStatus;

/// Router errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouterError {
    #[error("Invalid model spec '{0}': expected \"auto\" or \"<provider>/<model>\"")]
    InvalidModelSpec(String),
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),
    #[error("Request has no messages")]
    EmptyRequest,
    #[error("No healthy provider available")]
    AllProvidersUnavailable,
    #[error("All providers failed: {}", summarize(.failures))]
    AllProvidersFailed { failures: Vec<EndpointFailure> },
    #[error("Dispatch deadline of {deadline:?} exceeded{}", failure_suffix(.failures))]
    DeadlineExceeded {
        deadline: Duration,
        failures: Vec<EndpointFailure>,
    },
}

impl From<RegistryError> for RouterError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(name) => RouterError::UnknownEndpoint(name),
        }
    }
}

impl RouterError {
    /// Per-endpoint failures gathered before giving up
    pub fn failures(&self) -> &[EndpointFailure] {
        match self {
            Self::AllProvidersFailed { failures } | Self::DeadlineExceeded { failures, .. } => {
                failures
            }
            _ => &[],
        }
    }

    fn outcome(&self) -> DispatchOutcome {
        match self {
            Self::AllProvidersFailed { .. } => DispatchOutcome::Exhausted,
            Self::AllProvidersUnavailable => DispatchOutcome::Unavailable,
            Self::DeadlineExceeded { .. } => DispatchOutcome::DeadlineExceeded,
            Self::InvalidModelSpec(_)
            | Self::Configuration(_)
            | Self::UnknownEndpoint(_)
            | Self::EmptyRequest => DispatchOutcome::Rejected,
        }
    }
}

fn summarize(failures: &[EndpointFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn failure_suffix(failures: &[EndpointFailure]) -> String {
    if failures.is_empty() {
        String::new()
    } else {
        format!(" after: {}", summarize(failures))
    }
}

/// Which endpoint(s) a dispatch may use
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelSpec {
    /// Let the balancer rank healthy endpoints
    #[default]
    Auto,
    /// One named endpoint and model, no failover
    Explicit { endpoint: String, model: String },
}

impl FromStr for ModelSpec {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = s.trim();
        if spec.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }

        // Only the first '/' separates; model ids may contain more
        match spec.split_once('/') {
            Some((endpoint, model)) if !endpoint.is_empty() && !model.is_empty() => {
                Ok(Self::Explicit {
                    endpoint: endpoint.to_string(),
                    model: model.to_string(),
                })
            }
            _ => Err(RouterError::InvalidModelSpec(s.to_string())),
        }
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Explicit { endpoint, model } => write!(f, "{endpoint}/{model}"),
        }
    }
}

/// One logical request handed to [`Router::dispatch`]
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    pub messages: Vec<ChatMessage>,
    pub model: ModelSpec,
    pub options: GenerationOptions,
    /// Overrides the router's configured dispatch deadline
    pub deadline: Option<Duration>,
}

impl DispatchRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: ModelSpec::Auto,
            options: GenerationOptions::default(),
            deadline: None,
        }
    }

    pub fn with_model(mut self, model: ModelSpec) -> Self {
        self.model = model;
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Routes chat requests across provider endpoints with caching, retries and
/// circuit breaking.
///
/// Dropping the router stops its background reconciler; call
/// [`shutdown`](Self::shutdown) to also wait for it.
#[derive(Debug)]
pub struct Router {
    registry: Arc<EndpointRegistry>,
    health: Arc<HealthTracker>,
    cache: ResponseCache,
    balancer: LoadBalancer,
    executor: RetryExecutor,
    metrics: PerformanceMetrics,
    cache_enabled: bool,
    default_deadline: Option<Duration>,
    shutdown: CancellationToken,
    reconciler: Mutex<Option<JoinHandle<()>>>,
}

impl Router {
    /// Build a router over HTTP transport from a loaded configuration
    pub fn new(config: RouterConfig) -> Result<Self, RouterError> {
        RouterBuilder::new().config(config).build()
    }

    /// Built-in provider table, credentials from the environment
    pub fn from_env() -> Result<Self, RouterError> {
        Self::new(RouterConfig::from_env())
    }

    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Generate text for a single user prompt
    pub async fn generate(
        &self,
        prompt: &str,
        model_spec: &str,
        options: GenerationOptions,
    ) -> Result<String, RouterError> {
        let request = DispatchRequest::new(vec![ChatMessage::user(prompt)]).with_options(options);

        self.dispatch_spec("generate", model_spec, request)
            .await
            .map(|response| response.content)
    }

    /// Complete a conversation and return the structured response
    pub async fn chat_complete(
        &self,
        messages: Vec<ChatMessage>,
        model_spec: &str,
        options: GenerationOptions,
    ) -> Result<ChatResponse, RouterError> {
        let request = DispatchRequest::new(messages).with_options(options);

        self.dispatch_spec("chat_complete", model_spec, request).await
    }

    /// Parse `model_spec` into `request`, counting a malformed spec as a
    /// rejected dispatch
    async fn dispatch_spec(
        &self,
        operation: &str,
        model_spec: &str,
        request: DispatchRequest,
    ) -> Result<ChatResponse, RouterError> {
        match model_spec.parse() {
            Ok(model) => self.dispatch(operation, request.with_model(model)).await,
            Err(err) => Err(self.record_failure(operation, &model_spec, Duration::ZERO, err)),
        }
    }

    /// Run one dispatch and record it under `operation`
    pub async fn dispatch(
        &self,
        operation: &str,
        request: DispatchRequest,
    ) -> Result<ChatResponse, RouterError> {
        let started = Instant::now();
        let result = self.run(&request).await;
        let elapsed = started.elapsed();

        match result {
            Ok((response, outcome)) => {
                self.metrics.record(operation, elapsed, outcome, None);
                tracing::info!(
                    component = "router",
                    operation,
                    model = %request.model,
                    endpoint = %response.endpoint,
                    outcome = outcome.as_str(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Dispatch completed"
                );
                Ok(response)
            }
            Err(err) => Err(self.record_failure(operation, &request.model, elapsed, err)),
        }
    }

    fn record_failure(
        &self,
        operation: &str,
        model: &dyn fmt::Display,
        elapsed: Duration,
        err: RouterError,
    ) -> RouterError {
        let outcome = err.outcome();
        let message = err.to_string();
        self.metrics
            .record(operation, elapsed, outcome, Some(&message));
        tracing::warn!(
            component = "router",
            operation,
            model = %model,
            outcome = outcome.as_str(),
            elapsed_ms = elapsed.as_millis() as u64,
            error = %message,
            "Dispatch failed"
        );
        err
    }

    async fn run(
        &self,
        request: &DispatchRequest,
    ) -> Result<(ChatResponse, DispatchOutcome), RouterError> {
        if request.messages.is_empty() {
            return Err(RouterError::EmptyRequest);
        }

        let budget = request.deadline.or(self.default_deadline);
        // A budget past the end of the clock is no deadline at all
        let deadline = budget.and_then(|d| Instant::now().checked_add(d));

        let key = if self.cache_enabled {
            match fingerprint(&request.messages, &request.model.to_string(), &request.options) {
                Ok(key) => Some(key),
                Err(e) => {
                    tracing::warn!(error = %e, "Request not cacheable");
                    None
                }
            }
        } else {
            None
        };

        if let Some(hit) = key.as_deref().and_then(|k| self.cache.get(k)) {
            metrics::counter!("relay_cache_hits_total").increment(1);
            return Ok((hit, DispatchOutcome::CacheHit));
        }

        let candidates = self.candidates(&request.model)?;
        let mut failures = Vec::new();

        for (endpoint, model) in candidates {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(RouterError::DeadlineExceeded {
                    deadline: budget.unwrap_or_default(),
                    failures,
                });
            }

            let mut options = request.options.clone();
            options.max_tokens = options.max_tokens.min(endpoint.max_output_tokens);
            let call = ChatRequest {
                model: model.unwrap_or_else(|| endpoint.default_model.clone()),
                messages: request.messages.clone(),
                options,
            };

            match self.executor.call(&endpoint, &call, deadline).await {
                Ok(mut response) => {
                    response.endpoint = endpoint.name.clone();
                    if let Some(key) = &key {
                        self.cache.put(key.clone(), response.clone());
                    }
                    return Ok((response, DispatchOutcome::Success));
                }
                Err(CallError::Exhausted(failure)) => {
                    tracing::warn!(
                        component = "router",
                        endpoint = %endpoint.name,
                        attempts = failure.attempts,
                        error = %failure.error,
                        "Endpoint exhausted - trying next candidate"
                    );
                    failures.push(failure);
                }
                Err(CallError::DeadlineExceeded(partial)) => {
                    failures.extend(partial);
                    return Err(RouterError::DeadlineExceeded {
                        deadline: budget.unwrap_or_default(),
                        failures,
                    });
                }
            }
        }

        Err(RouterError::AllProvidersFailed { failures })
    }

    /// Ordered endpoints to try, with the explicit model when one was named
    fn candidates(
        &self,
        spec: &ModelSpec,
    ) -> Result<Vec<(Arc<Endpoint>, Option<String>)>, RouterError> {
        match spec {
            ModelSpec::Auto => {
                let ranked = self.balancer.rank_candidates();
                if ranked.is_empty() {
                    return Err(RouterError::AllProvidersUnavailable);
                }
                Ok(ranked.into_iter().map(|e| (e, None)).collect())
            }
            ModelSpec::Explicit { endpoint, model } => {
                let chosen = self.registry.endpoint(endpoint)?;
                if let Some(err) = self.registry.activation_error(endpoint) {
                    return Err(err.clone().into());
                }
                Ok(vec![(Arc::clone(chosen), Some(model.clone()))])
            }
        }
    }

    /// Diagnostic view of every registered endpoint, in registry order
    pub fn health_status(&self) -> Vec<EndpointStatus> {
        self.registry
            .endpoints()
            .iter()
            .map(|endpoint| EndpointStatus {
                name: endpoint.name.clone(),
                configured: self.registry.is_active(&endpoint.name),
                activation_error: self
                    .registry
                    .activation_error(&endpoint.name)
                    .map(ToString::to_string),
                default_model: endpoint.default_model.clone(),
                priority: endpoint.priority,
                health: self.health.snapshot(&endpoint.name).unwrap_or_default(),
                score: self.balancer.score_of(endpoint).unwrap_or_default(),
            })
            .collect()
    }

    pub fn performance_report(&self) -> PerformanceReport {
        PerformanceReport {
            operations: self.metrics.snapshot(),
            cache: self.cache.stats(),
            endpoints: self.health_status(),
            generated_at: chrono::Utc::now(),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        tracing::debug!(component = "router", "Response cache cleared");
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    /// Stop the background reconciler and wait for it to finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.reconciler.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Health reconciler ended abnormally");
            }
        }
        tracing::debug!(component = "router", "Router shut down");
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Builder for [`Router`]
#[derive(Debug, Default)]
pub struct RouterBuilder {
    config: RouterConfig,
    endpoints: Vec<Endpoint>,
    transport: Option<Arc<dyn Transport>>,
    deadline: Option<Duration>,
    reconcile_interval: Option<Duration>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a loaded configuration
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Add an endpoint alongside any from configuration
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Defaults to [`HttpTransport`]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn circuit_breaker_threshold(mut self, threshold: u32) -> Self {
        self.config.circuit_breaker_threshold = threshold;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.retry.max_retries = max_retries;
        self
    }

    pub fn backoff(mut self, base: Duration, max: Duration) -> Self {
        self.config.retry.base_delay_ms = base.as_millis() as u64;
        self.config.retry.max_delay_ms = max.as_millis() as u64;
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.config.cache.enabled = enabled;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache.ttl_secs = ttl.as_secs();
        self
    }

    pub fn cache_capacity(mut self, max_entries: usize) -> Self {
        self.config.cache.max_entries = max_entries;
        self
    }

    pub fn dispatch_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<Router, RouterError> {
        self.config.validate()?;

        let mut endpoints: Vec<Endpoint> = self
            .config
            .endpoints
            .iter()
            .map(|c| c.to_endpoint())
            .collect();
        endpoints.extend(self.endpoints);

        let registry = Arc::new(EndpointRegistry::new(endpoints)?);
        if registry.active().next().is_none() {
            tracing::warn!(
                endpoints = registry.len(),
                "No active endpoints - auto dispatch will find no candidates"
            );
        }

        let health = Arc::new(HealthTracker::new(
            registry.names(),
            self.config.circuit_breaker_threshold,
        ));
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HttpTransport::new()));

        let shutdown = CancellationToken::new();
        let interval = self
            .reconcile_interval
            .unwrap_or_else(|| self.config.reconcile_interval());
        let reconciler = match tokio::runtime::Handle::try_current() {
            Ok(_) => Some(health.spawn_reconciler(interval, shutdown.clone())),
            Err(_) => {
                tracing::debug!("No tokio runtime - health reconciler not started");
                None
            }
        };

        Ok(Router {
            cache: ResponseCache::new(self.config.cache_ttl(), self.config.cache.max_entries),
            balancer: LoadBalancer::new(Arc::clone(&registry), Arc::clone(&health)),
            executor: RetryExecutor::new(
                transport,
                Arc::clone(&health),
                RetryPolicy::from(&self.config.retry),
            ),
            metrics: PerformanceMetrics::new(self.config.recent_errors),
            cache_enabled: self.config.cache.enabled,
            default_deadline: self.deadline.or_else(|| self.config.dispatch_deadline()),
            registry,
            health,
            shutdown,
            reconciler: Mutex::new(reconciler),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_llm::{Credential, LlmError, MockTransport};

    fn endpoint(name: &str, priority: u32) -> Endpoint {
        Endpoint::new(name, format!("https://{name}.test/v1"))
            .with_credential(Credential::new("key"))
            .with_default_model(format!("{name}-default"))
            .with_priority(priority)
    }

    #[test]
    fn test_model_spec_parsing() {
        assert_eq!("auto".parse::<ModelSpec>().unwrap(), ModelSpec::Auto);
        assert_eq!(" AUTO ".parse::<ModelSpec>().unwrap(), ModelSpec::Auto);
        assert_eq!(
            "openrouter/meta-llama/llama-3-70b".parse::<ModelSpec>().unwrap(),
            ModelSpec::Explicit {
                endpoint: "openrouter".to_string(),
                model: "meta-llama/llama-3-70b".to_string(),
            }
        );

        for bad in ["", "gpt-4o", "/gpt-4o", "openai/"] {
            assert!(matches!(
                bad.parse::<ModelSpec>(),
                Err(RouterError::InvalidModelSpec(_))
            ));
        }

        let spec: ModelSpec = "openai/gpt-4o".parse().unwrap();
        assert_eq!(spec.to_string(), "openai/gpt-4o");
    }

    #[test]
    fn test_error_display() {
        let err = RouterError::AllProvidersFailed {
            failures: vec![
                EndpointFailure {
                    endpoint: "a".to_string(),
                    attempts: 3,
                    error: LlmError::EmptyResponse,
                },
                EndpointFailure {
                    endpoint: "b".to_string(),
                    attempts: 1,
                    error: LlmError::NotConfigured("b".to_string()),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "All providers failed: a (3 attempts): Provider returned an empty response; \
             b (1 attempt): Endpoint not configured: b"
        );
        assert_eq!(err.failures().len(), 2);
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let result = Router::builder()
            .endpoint(endpoint("a", 1))
            .circuit_breaker_threshold(0)
            .build();
        assert!(matches!(result, Err(RouterError::Configuration(_))));

        let result = Router::builder()
            .endpoint(endpoint("a", 1))
            .endpoint(endpoint("a", 2))
            .build();
        assert!(matches!(
            result,
            Err(RouterError::Configuration(ConfigError::DuplicateEndpoint(_)))
        ));
    }

    #[tokio::test]
    async fn test_rejected_requests_make_no_calls() {
        let transport = Arc::new(MockTransport::new());
        let router = Router::builder()
            .endpoint(endpoint("a", 1))
            .endpoint(Endpoint::new("keyless", "https://keyless.test/v1"))
            .transport(transport.clone())
            .build()
            .unwrap();

        let err = router
            .generate("hi", "nope/model", GenerationOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, RouterError::UnknownEndpoint("nope".to_string()));

        let err = router
            .generate("hi", "keyless/model", GenerationOptions::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RouterError::Configuration(ConfigError::MissingCredential("keyless".to_string()))
        );

        let err = router
            .chat_complete(Vec::new(), "auto", GenerationOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, RouterError::EmptyRequest);

        let err = router
            .generate("hi", "gpt-4o", GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::InvalidModelSpec(_)));

        assert_eq!(transport.call_count(), 0);
        let stats = router.performance_report().operations["generate"].clone();
        assert_eq!(stats.outcomes[&DispatchOutcome::Rejected], 3);
        assert!(stats.recent_errors[2].message.contains("Invalid model spec 'gpt-4o'"));

        let err = router
            .chat_complete(vec![ChatMessage::user("hi")], "/", GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::InvalidModelSpec(_)));
        let stats = router.performance_report().operations["chat_complete"].clone();
        assert_eq!(stats.outcomes[&DispatchOutcome::Rejected], 2);
    }

    #[tokio::test]
    async fn test_unbounded_request_deadline() {
        let transport = Arc::new(MockTransport::new());
        let router = Router::builder()
            .endpoint(endpoint("a", 1))
            .transport(transport.clone())
            .build()
            .unwrap();

        let request = DispatchRequest::new(vec![ChatMessage::user("hi")])
            .with_deadline(Duration::MAX);
        let response = router.dispatch("generate", request).await.unwrap();

        assert_eq!(response.endpoint, "a");
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unbounded_configured_deadline() {
        let transport = Arc::new(MockTransport::new());
        let config = RouterConfig {
            dispatch_deadline_secs: Some(u64::MAX),
            ..Default::default()
        };
        let router = Router::builder()
            .config(config)
            .endpoint(endpoint("a", 1))
            .transport(transport.clone())
            .build()
            .unwrap();
        assert_eq!(router.default_deadline, Some(Duration::from_secs(u64::MAX)));

        let answer = router
            .generate("hi", "auto", GenerationOptions::default())
            .await
            .unwrap();

        assert_eq!(answer, "[a] hi");
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_explicit_spec_uses_named_model() {
        let transport = Arc::new(MockTransport::new());
        let router = Router::builder()
            .endpoint(endpoint("a", 1))
            .endpoint(endpoint("b", 2))
            .transport(transport.clone())
            .build()
            .unwrap();

        let response = router
            .chat_complete(
                vec![ChatMessage::user("hello")],
                "b/b-large",
                GenerationOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(response.endpoint, "b");
        assert_eq!(response.model, "b-large");
        assert_eq!(response.content, "[b] hello");
        assert_eq!(transport.call_log(), vec!["b"]);
    }

    #[derive(Debug, Default)]
    struct RecordingTransport {
        seen: Mutex<Vec<ChatRequest>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(
            &self,
            endpoint: &Endpoint,
            request: &ChatRequest,
        ) -> Result<ChatResponse, LlmError> {
            self.seen.lock().push(request.clone());
            Ok(ChatResponse {
                content: "ok".to_string(),
                model: request.model.clone(),
                endpoint: endpoint.name.clone(),
                usage: None,
                finish_reason: None,
                latency_ms: 0,
            })
        }
    }

    #[tokio::test]
    async fn test_max_tokens_clamped_to_endpoint_budget() {
        let transport = Arc::new(RecordingTransport::default());
        let router = Router::builder()
            .endpoint(endpoint("small", 1).with_max_output_tokens(256))
            .transport(transport.clone())
            .build()
            .unwrap();

        router
            .generate("hi", "auto", GenerationOptions::default().with_max_tokens(4000))
            .await
            .unwrap();

        let seen = transport.seen.lock();
        assert_eq!(seen[0].options.max_tokens, 256);
        assert_eq!(seen[0].model, "small-default");
    }

    #[tokio::test]
    async fn test_cache_can_be_disabled() {
        let transport = Arc::new(MockTransport::new());
        let router = Router::builder()
            .endpoint(endpoint("a", 1))
            .transport(transport.clone())
            .cache_enabled(false)
            .build()
            .unwrap();

        for _ in 0..2 {
            router
                .generate("same", "auto", GenerationOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(transport.call_count(), 2);
        assert_eq!(router.cache_stats().total_entries, 0);
    }

    #[tokio::test]
    async fn test_health_status_lists_inactive_endpoints() {
        let router = Router::builder()
            .endpoint(endpoint("a", 1))
            .endpoint(Endpoint::new("keyless", "https://keyless.test/v1").with_priority(2))
            .transport(Arc::new(MockTransport::new()))
            .build()
            .unwrap();

        let status = router.health_status();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].name, "a");
        assert!(status[0].configured);
        assert!((status[0].score - 900.0).abs() < 1e-6);
        assert!(!status[1].configured);
        assert!(status[1]
            .activation_error
            .as_deref()
            .unwrap()
            .contains("no credential"));

        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let router = Router::builder()
            .endpoint(endpoint("a", 1))
            .transport(Arc::new(MockTransport::new()))
            .build()
            .unwrap();

        router.shutdown().await;
        router.shutdown().await;
    }

    #[test]
    fn test_build_without_runtime() {
        let router = Router::builder()
            .endpoint(endpoint("a", 1))
            .transport(Arc::new(MockTransport::new()))
            .build()
            .unwrap();
        assert!(router.reconciler.lock().is_none());
    }
}

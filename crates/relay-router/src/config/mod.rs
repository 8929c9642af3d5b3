//! Configuration for the router
//!
//! Values are layered: built-in defaults, then an optional config file, then
//! `RELAY__`-prefixed environment variables (`RELAY__CACHE__TTL_SECS=60`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use relay_llm::{Credential, Endpoint};

/// Configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Duplicate endpoint name: {0}")]
    DuplicateEndpoint(String),
    #[error("Endpoint '{0}' has no credential configured")]
    MissingCredential(String),
    #[error("Endpoint '{0}' has a malformed credential")]
    MalformedCredential(String),
    #[error("Endpoint '{endpoint}' has an invalid base URL: {reason}")]
    InvalidUrl { endpoint: String, reason: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}

/// One provider endpoint as it appears in configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub base_url: String,
    /// Inline credential; prefer `api_key_env` outside of tests
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Environment variable holding the credential
    #[serde(default)]
    pub api_key_env: Option<String>,
    pub default_model: String,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_priority() -> u32 {
    1
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_output_tokens() -> u32 {
    4096
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_key_env", &self.api_key_env)
            .field("default_model", &self.default_model)
            .field("priority", &self.priority)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_output_tokens", &self.max_output_tokens)
            .finish()
    }
}

impl EndpointConfig {
    pub fn new(name: &str, base_url: &str, default_model: &str) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.to_string(),
            api_key: None,
            api_key_env: None,
            default_model: default_model.to_string(),
            priority: default_priority(),
            timeout_secs: default_timeout_secs(),
            max_output_tokens: default_max_output_tokens(),
        }
    }

    /// Inline credential wins over the environment variable
    pub fn resolve_credential(&self) -> Option<Credential> {
        self.api_key
            .clone()
            .or_else(|| {
                self.api_key_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok())
            })
            .map(Credential::new)
    }

    /// Build the runtime endpoint, resolving its credential
    pub fn to_endpoint(&self) -> Endpoint {
        let mut endpoint = Endpoint::new(&self.name, &self.base_url)
            .with_default_model(&self.default_model)
            .with_priority(self.priority)
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_max_output_tokens(self.max_output_tokens);
        endpoint.credential = self.resolve_credential();
        endpoint
    }
}

/// Response cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300,
            max_entries: 1000,
        }
    }
}

/// Retry/backoff settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per endpoint, including the first
    pub max_retries: u32,
    /// Delay after the first failed attempt; doubles each time
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

/// Main router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Provider endpoints; empty means the built-in provider table
    pub endpoints: Vec<EndpointConfig>,
    /// Consecutive failures that mark an endpoint unhealthy
    pub circuit_breaker_threshold: u32,
    /// Seconds between passive health reconciliation passes
    pub reconcile_interval_secs: u64,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    /// Overall per-dispatch deadline across all retries and candidates
    pub dispatch_deadline_secs: Option<u64>,
    /// Errors kept per operation in the performance report
    pub recent_errors: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            circuit_breaker_threshold: 3,
            reconcile_interval_secs: 60,
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            dispatch_deadline_secs: None,
            recent_errors: 10,
        }
    }
}

impl RouterConfig {
    /// Built-in provider table with credentials read from the environment
    pub fn from_env() -> Self {
        Self {
            endpoints: default_endpoints(),
            ..Default::default()
        }
    }

    /// Load layered configuration from an optional file plus `RELAY__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("RELAY")
                .separator("__")
                .try_parsing(true),
        );

        let mut loaded: RouterConfig = builder.build()?.try_deserialize()?;
        if loaded.endpoints.is_empty() {
            loaded.endpoints = default_endpoints();
        }

        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject values that would make the router unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.circuit_breaker_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker_threshold must be at least 1".to_string(),
            ));
        }
        if self.retry.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_retries must be at least 1".to_string(),
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_entries must be at least 1".to_string(),
            ));
        }
        if self.reconcile_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "reconcile_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.base_delay_ms exceeds retry.max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn dispatch_deadline(&self) -> Option<Duration> {
        self.dispatch_deadline_secs.map(Duration::from_secs)
    }
}

/// OpenAI-compatible providers known out of the box
pub fn default_endpoints() -> Vec<EndpointConfig> {
    vec![
        EndpointConfig {
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            priority: 1,
            ..EndpointConfig::new("openai", "https://api.openai.com/v1", "gpt-4o-mini")
        },
        EndpointConfig {
            api_key_env: Some("DEEPSEEK_API_KEY".to_string()),
            priority: 2,
            ..EndpointConfig::new("deepseek", "https://api.deepseek.com/v1", "deepseek-chat")
        },
        EndpointConfig {
            api_key_env: Some("MISTRAL_API_KEY".to_string()),
            priority: 3,
            ..EndpointConfig::new(
                "mistral",
                "https://api.mistral.ai/v1",
                "mistral-small-latest",
            )
        },
    ]
}

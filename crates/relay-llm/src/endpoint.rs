//! Provider endpoints and their credential material

use std::fmt;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Opaque API credential, wiped from memory on drop and never printed
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Expose the secret for building an auth header
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Blank or whitespace-padded credentials are rejected at activation
    pub fn is_well_formed(&self) -> bool {
        !self.0.is_empty() && self.0.trim() == self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// A provider endpoint. Immutable once the registry is built.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Unique endpoint name (e.g. "openai")
    pub name: String,
    /// Base URL, without the `/chat/completions` suffix
    pub base_url: String,
    /// API credential; `None` leaves the endpoint inactive
    pub credential: Option<Credential>,
    /// Model used when the caller does not name one
    pub default_model: String,
    /// Lower is preferred
    pub priority: u32,
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Upper bound on `max_tokens` sent to this endpoint
    pub max_output_tokens: u32,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            credential: None,
            default_model: String::new(),
            priority: 1,
            timeout: Duration::from_secs(60),
            max_output_tokens: 4096,
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    /// Check that the base URL parses and uses http(s)
    pub fn validate_url(&self) -> Result<(), String> {
        let url = reqwest::Url::parse(&self.base_url).map_err(|e| e.to_string())?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            other => Err(format!("unsupported scheme '{other}'")),
        }
    }

    /// Full chat-completions URL
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

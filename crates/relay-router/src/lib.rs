//! Relay Router - health-aware failover across LLM providers
//!
//! Routes chat requests over a fixed set of OpenAI-compatible endpoints.
//! Each dispatch checks a TTL response cache, ranks healthy endpoints by
//! success rate, latency and priority, retries each with exponential backoff,
//! and fails over to the next candidate when one is exhausted. Endpoints that
//! fail repeatedly are taken out of rotation until they succeed again.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use relay_llm::{Credential, Endpoint, GenerationOptions, MockTransport};
//! use relay_router::Router;
//!
//! #[tokio::main]
//! async fn main() {
//!     let router = Router::builder()
//!         .endpoint(
//!             Endpoint::new("local", "http://localhost:8000/v1")
//!                 .with_credential(Credential::new("dev-key")),
//!         )
//!         .transport(Arc::new(MockTransport::new().replying("local", "4")))
//!         .build()
//!         .unwrap();
//!
//!     let answer = router
//!         .generate("What is 2+2?", "auto", GenerationOptions::default())
//!         .await
//!         .unwrap();
//!     assert_eq!(answer, "4");
//!
//!     router.shutdown().await;
//! }
//! ```
//!
//! ## Model specs
//!
//! | Spec | Behaviour |
//! |------|-----------|
//! | `auto` | Ranked healthy endpoints, failover in order |
//! | `<endpoint>/<model>` | That endpoint only, even when unhealthy |

pub mod balancer;
pub mod cache;
pub mod config;
pub mod health;
pub mod observability;
pub mod registry;
pub mod retry;
pub mod router;

pub use balancer::{LoadBalancer, RankedEndpoint, ScoreWeights};
pub use cache::{fingerprint, CacheStats, ResponseCache};
pub use config::{CacheConfig, ConfigError, EndpointConfig, RetryConfig, RouterConfig};
pub use health::{EndpointHealth, HealthTracker};
pub use observability::{
    DispatchOutcome, EndpointStatus, OperationStats, PerformanceMetrics, PerformanceReport,
};
pub use registry::{EndpointRegistry, RegistryError};
pub use retry::{CallError, EndpointFailure, RetryExecutor, RetryPolicy};
pub use router::{DispatchRequest, ModelSpec, Router, RouterBuilder, RouterError};

pub use relay_llm::{ChatMessage, ChatResponse, GenerationOptions, LlmError};

//! # Relay LLM
//!
//! Provider-facing layer for relay: chat message types, generation options,
//! endpoint definitions, and the transports that talk to providers.
//!
//! ## Transports
//!
//! | Transport | Use |
//! |-----------|-----|
//! | [`HttpTransport`] | Any OpenAI-compatible `/chat/completions` endpoint |
//! | [`MockTransport`] | Scripted outcomes for tests |
//!
//! ## Quick Start
//!
//! ```rust
//! use relay_llm::{
//!     ChatMessage, ChatRequest, Endpoint, GenerationOptions, MockTransport, Transport,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let transport = MockTransport::new().replying("local", "hello");
//!     let endpoint = Endpoint::new("local", "http://localhost:8000/v1");
//!
//!     let request = ChatRequest {
//!         model: "local-model".to_string(),
//!         messages: vec![ChatMessage::user("hi")],
//!         options: GenerationOptions::default(),
//!     };
//!
//!     let response = transport.send(&endpoint, &request).await.unwrap();
//!     assert_eq!(response.content, "hello");
//! }
//! ```

pub mod endpoint;
pub mod mock;
pub mod openai;
pub mod provider;

pub use endpoint::{Credential, Endpoint};
pub use mock::{MockOutcome, MockTransport};
pub use openai::HttpTransport;
pub use provider::{
    ChatMessage, ChatRequest, ChatResponse, GenerationOptions, LlmError, Role, Transport, Usage,
};

//! Client for the backend's JSON HTTP API.
//!
//! # Structure
//!
//! - `error` - Error taxonomy (`Error`, `ApiError`)
//! - `base_url` - Backend endpoint validation
//! - `retry` - Retry policy, error classification and backoff
//! - `proxy` - Per-request proxy selection
//! - `transport` - Connection pool and timeout settings
//! - `stream` - Incremental decoding of streamed responses
//! - `client` - `OllamaClient` and its operations
//! - `types` - Request and response shapes
//! - `format` - Table rendering for model listings

mod base_url;
mod client;
mod error;
pub mod format;
mod proxy;
pub mod retry;
pub mod stream;
mod transport;
pub mod types;

pub use base_url::BaseUrl;
pub use client::OllamaClient;
pub use error::{ApiError, Error, Result};
pub use proxy::{AmbientProxy, ProxyDecision, ProxySelector};
pub use retry::{RetryPolicy, is_retryable, next_delay};
pub use transport::ClientOptions;

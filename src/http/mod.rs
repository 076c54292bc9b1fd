//! HTTP request pipeline: rate limiting, retry with circuit breaking,
//! response parsing, pagination, and OAuth 2.0 / PKCE.

pub mod circuit_breaker;
pub mod client;
pub mod oauth;
pub mod pagination;
pub mod parser;
pub mod retry;
pub mod token_bucket;

pub use circuit_breaker::CircuitBreaker;
pub use client::{HttpClient, HttpEnvelope, HttpError, ParserConfig, RequestOptions};
pub use oauth::{OAuthError, OAuthManager, OAuthTokens};
pub use pagination::PaginationPattern;
pub use parser::{ParseError, ResponseFormat};
pub use retry::{RetryConfig, RetryOutcome};
pub use token_bucket::{RateLimitRegistry, TokenBucket};

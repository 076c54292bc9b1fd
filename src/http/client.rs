//! Orchestrates a single HTTP call through rate limiting, retry with
//! circuit breaking, response parsing, and optional pagination.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::Value;
use thiserror::Error;

use super::circuit_breaker::CircuitBreaker;
use super::pagination::{self, NextRequestCursorState, PageResponse, PaginationPattern};
use super::parser::{self, ParseError, ResponseFormat, SchemaValidator, SelectorMap};
use super::retry::{self, AttemptError, RetryConfig};
use super::token_bucket::{RateLimitRegistry, TokenBucket};

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

#[derive(Debug, Clone, Default)]
pub struct PaginationConfig {
    pub forced_pattern: Option<PaginationPattern>,
    pub max_pages: Option<u32>,
    pub item_path: Option<String>,
}

pub struct ParserConfig {
    pub format: Option<ResponseFormat>,
    pub selectors: Option<SelectorMap>,
    pub schema: Option<Arc<dyn SchemaValidator>>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            format: None,
            selectors: None,
            schema: None,
        }
    }
}

pub struct RequestOptions {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Option<Value>,
    pub timeout_ms: u64,
    pub retry_config: RetryConfig,
    pub parser_config: ParserConfig,
    pub rate_limit_key: Option<String>,
    pub rate_limit_api: Option<String>,
    pub pagination: Option<PaginationConfig>,
}

impl RequestOptions {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HashMap::new(),
            query: HashMap::new(),
            body: None,
            timeout_ms: 30_000,
            retry_config: RetryConfig::default(),
            parser_config: ParserConfig::default(),
            rate_limit_key: None,
            rate_limit_api: None,
            pagination: None,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HttpErrorBody {
    pub code: String,
    pub message: String,
    pub status: Option<u16>,
    pub retryable: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HttpMetadata {
    pub attempts: u32,
    pub total_delay_ms: u64,
    pub format: Option<String>,
}

/// The pipeline's error envelope (§6). Success carries `data`; failure
/// carries `error`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HttpEnvelope {
    pub success: bool,
    pub status: Option<u16>,
    pub status_text: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub data: Option<Value>,
    pub error: Option<HttpErrorBody>,
    pub metadata: HttpMetadata,
}

pub struct HttpClient {
    client: reqwest::Client,
    pub rate_limits: RateLimitRegistry,
    pub circuit_breaker: CircuitBreaker,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            rate_limits: RateLimitRegistry::new(),
            circuit_breaker: CircuitBreaker::default(),
        }
    }

    pub async fn post_form(&self, url: &str, form: &HashMap<&str, &str>) -> Result<Value, HttpError> {
        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        let bytes = response.bytes().await.map_err(|e| HttpError::Transport(e.to_string()))?;
        Ok(parser::parse_json(&bytes)?)
    }

    /// Execute one logical request, including its rate-limit wait and
    /// retry/circuit-breaker wrapping. Does not paginate -- see
    /// `execute_paginated` for the drive loop.
    pub async fn execute(&self, options: &RequestOptions) -> HttpEnvelope {
        if let Some(key) = &options.rate_limit_key {
            self.rate_limits.wait_and_consume(key, options.rate_limit_api.as_deref()).await;
        } else if let Some(api_key) = &options.rate_limit_api {
            self.rate_limits.wait_and_consume("", Some(api_key)).await;
        }

        let context = format!("{} {}", options.method, options.url);
        let timeout_ms = options.timeout_ms;
        let outcome = retry::execute_with_retry(&self.circuit_breaker, &context, &options.retry_config, || {
            self.attempt(options, timeout_ms)
        })
        .await;

        match outcome.data {
            Some(success) => HttpEnvelope {
                success: true,
                status: Some(success.status),
                status_text: Some(success.status_text),
                headers: Some(success.headers),
                data: Some(success.data),
                error: None,
                metadata: HttpMetadata {
                    attempts: outcome.attempts,
                    total_delay_ms: outcome.total_delay_ms,
                    format: Some(success.format),
                },
            },
            None => {
                let message = outcome.error.unwrap_or_else(|| "request failed".to_string());
                let (code, status, retryable) = classify_error(&message);
                HttpEnvelope {
                    success: false,
                    status,
                    status_text: None,
                    headers: None,
                    data: None,
                    error: Some(HttpErrorBody {
                        code,
                        message,
                        status,
                        retryable,
                    }),
                    metadata: HttpMetadata {
                        attempts: outcome.attempts,
                        total_delay_ms: outcome.total_delay_ms,
                        format: None,
                    },
                }
            }
        }
    }

    async fn attempt(&self, options: &RequestOptions, timeout_ms: u64) -> Result<AttemptSuccess, AttemptError> {
        let mut request = self
            .client
            .request(options.method.clone(), &options.url)
            .timeout(Duration::from_millis(timeout_ms));

        for (k, v) in &options.headers {
            request = request.header(k, v);
        }
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        if let Some(body) = &options.body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                AttemptError::Retryable(format!("transport error: {e}"))
            } else {
                AttemptError::Terminal(format!("transport error: {e}"))
            }
        })?;

        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();

        self.apply_header_rate_limit_updates(&options.url, &headers).await;

        if !status.is_success() {
            let code = status.as_u16();
            let message = format!("HTTP_{code}");
            if retry::is_retryable_status(code) {
                return Err(AttemptError::Retryable(message));
            }
            return Err(AttemptError::Terminal(message));
        }

        let content_type = headers.get("content-type").map(String::as_str);
        let format = parser::resolve_format(content_type, options.parser_config.format);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AttemptError::Terminal(format!("transport error: {e}")))?;

        let parsed = parse_body(format, &bytes, &options.parser_config)
            .map_err(|e| AttemptError::Terminal(e.to_string()))?;

        if let Some(validator) = &options.parser_config.schema {
            parser::validate(&parsed, Some(validator.as_ref())).map_err(|e| AttemptError::Terminal(e.to_string()))?;
        }

        Ok(AttemptSuccess {
            status: code_or(status),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            data: parsed,
            format: format_name(format).to_string(),
        })
    }

    async fn apply_header_rate_limit_updates(&self, url: &str, headers: &HashMap<String, String>) {
        let get = |name: &str| headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.clone());

        if let Some(retry_after) = get("retry-after") {
            if let Ok(secs) = retry_after.parse::<f64>() {
                self.rate_limits
                    .set_endpoint_bucket(url, TokenBucket::with_window(1, secs.max(1.0)))
                    .await;
                return;
            }
        }

        let (limit, remaining, reset) = (get("x-ratelimit-limit"), get("x-ratelimit-remaining"), get("x-ratelimit-reset"));
        if let (Some(limit), Some(_remaining), Some(reset)) = (limit, remaining, reset) {
            if let (Ok(limit), Ok(reset)) = (limit.parse::<u64>(), reset.parse::<i64>()) {
                let now = chrono::Utc::now().timestamp();
                let window = (reset - now).max(1) as f64;
                self.rate_limits.set_endpoint_bucket(url, TokenBucket::with_window(limit, window)).await;
            }
        }
    }

    /// Drive pagination per the detected or forced pattern, fetching each
    /// page through `execute`. The fetch/pattern/next-request sequence
    /// itself lives in `pagination::drive`; this only adapts it to issue
    /// real requests.
    pub async fn execute_paginated(&self, base: RequestOptions) -> Vec<Value> {
        let config = base.pagination.clone().unwrap_or_default();
        let max_pages = config.max_pages.unwrap_or(10);

        let mut url = base.url.clone();
        let mut query = base.query.clone();

        pagination::drive(max_pages, config.forced_pattern, config.item_path.as_deref(), |state| {
            match state {
                Some(NextRequestCursorState::Cursor(cursor)) => {
                    query.insert("cursor".to_string(), cursor);
                }
                Some(NextRequestCursorState::OffsetLimit(offset, limit)) => {
                    query.insert("offset".to_string(), offset.to_string());
                    query.insert("limit".to_string(), limit.to_string());
                }
                Some(NextRequestCursorState::Page(page)) => {
                    query.insert("page".to_string(), page.to_string());
                }
                Some(NextRequestCursorState::Url(next_url)) => {
                    url = next_url;
                    query.clear();
                }
                None => {}
            }

            let options = RequestOptions {
                url: url.clone(),
                query: query.clone(),
                method: base.method.clone(),
                headers: base.headers.clone(),
                body: base.body.clone(),
                timeout_ms: base.timeout_ms,
                retry_config: base.retry_config,
                parser_config: ParserConfig {
                    format: base.parser_config.format,
                    selectors: base.parser_config.selectors.clone(),
                    schema: base.parser_config.schema.clone(),
                },
                rate_limit_key: base.rate_limit_key.clone(),
                rate_limit_api: base.rate_limit_api.clone(),
                pagination: None,
            };

            async move {
                let envelope = self.execute(&options).await;
                if !envelope.success {
                    return PageResponse {
                        body: Value::Null,
                        link_header: None,
                    };
                }
                let body = envelope.data.unwrap_or(Value::Null);
                let link_header = envelope.headers.as_ref().and_then(|h| h.get("link").cloned());
                PageResponse { body, link_header }
            }
        })
        .await
    }
}

struct AttemptSuccess {
    status: u16,
    status_text: String,
    headers: HashMap<String, String>,
    data: Value,
    format: String,
}

fn code_or(status: StatusCode) -> u16 {
    status.as_u16()
}

/// Classify a retry-manager error string into an envelope code/status/retryable
/// triple. "Circuit breaker open", `HTTP_<code>`, and the parser's own
/// `PARSE_ERROR`/`SCHEMA_VALIDATION_FAILED` prefixes are the structured
/// shapes produced by `attempt`; anything else is a transport failure.
fn classify_error(message: &str) -> (String, Option<u16>, bool) {
    if message == "Circuit breaker open" {
        return ("CIRCUIT_OPEN".to_string(), None, false);
    }
    if let Some(code) = message.strip_prefix("HTTP_").and_then(|s| s.parse::<u16>().ok()) {
        return ("HTTP_ERROR".to_string(), Some(code), retry::is_retryable_status(code));
    }
    if message.starts_with("PARSE_ERROR") {
        return ("PARSE_ERROR".to_string(), None, false);
    }
    if message.starts_with("SCHEMA_VALIDATION_FAILED") {
        return ("SCHEMA_VALIDATION_FAILED".to_string(), None, false);
    }
    ("TRANSPORT_ERROR".to_string(), None, true)
}

fn format_name(format: ResponseFormat) -> &'static str {
    match format {
        ResponseFormat::Json => "json",
        ResponseFormat::Xml => "xml",
        ResponseFormat::Html => "html",
        ResponseFormat::Text => "text",
        ResponseFormat::Binary => "binary",
    }
}

fn parse_body(format: ResponseFormat, bytes: &[u8], config: &ParserConfig) -> Result<Value, ParseError> {
    match format {
        ResponseFormat::Json => parser::parse_json(bytes),
        ResponseFormat::Xml => parser::parse_xml(&String::from_utf8_lossy(bytes)),
        ResponseFormat::Html => parser::parse_html(&String::from_utf8_lossy(bytes), config.selectors.as_ref()),
        ResponseFormat::Text => Ok(Value::String(String::from_utf8_lossy(bytes).to_string())),
        ResponseFormat::Binary => Ok(Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))),
    }
}

use base64::Engine as _;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retries_500_then_succeeds() {
        let mut server = mockito::Server::new_async().await;
        let mock_fail = server
            .mock("GET", "/flaky")
            .with_status(500)
            .expect(2)
            .create_async()
            .await;
        let mock_ok = server
            .mock("GET", "/flaky")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true}"#)
            .expect(1)
            .create_async()
            .await;

        let client = HttpClient::new();
        let mut options = RequestOptions::get(format!("{}/flaky", server.url()));
        options.retry_config = RetryConfig {
            base_delay_ms: 5,
            max_delay_ms: 50,
            jitter_factor: 0.0,
            max_retries: 5,
        };

        let envelope = client.execute(&options).await;
        assert!(envelope.success);
        assert_eq!(envelope.metadata.attempts, 3);

        mock_fail.assert_async().await;
        mock_ok.assert_async().await;
    }

    #[tokio::test]
    async fn non_retryable_status_fails_fast() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/missing").with_status(404).create_async().await;

        let client = HttpClient::new();
        let options = RequestOptions::get(format!("{}/missing", server.url()));
        let envelope = client.execute(&options).await;

        assert!(!envelope.success);
        assert_eq!(envelope.metadata.attempts, 1);
        assert_eq!(envelope.error.unwrap().code, "HTTP_ERROR");
    }

    #[tokio::test]
    async fn malformed_json_body_is_a_non_retryable_parse_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/garbled")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("{not json")
            .create_async()
            .await;

        let client = HttpClient::new();
        let options = RequestOptions::get(format!("{}/garbled", server.url()));
        let envelope = client.execute(&options).await;

        assert!(!envelope.success);
        assert_eq!(envelope.metadata.attempts, 1);
        let error = envelope.error.unwrap();
        assert_eq!(error.code, "PARSE_ERROR");
        assert!(!error.retryable);
    }

    #[tokio::test]
    async fn api_only_rate_limit_bucket_is_actually_consulted() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/a").with_status(200).with_body("{}").create_async().await;
        server.mock("GET", "/b").with_status(200).with_body("{}").create_async().await;

        let client = HttpClient::new();
        client.rate_limits.set_api_bucket("acme", TokenBucket::new(1, 1.0)).await;

        let mut first = RequestOptions::get(format!("{}/a", server.url()));
        first.rate_limit_api = Some("acme".to_string());
        let mut second = RequestOptions::get(format!("{}/b", server.url()));
        second.rate_limit_api = Some("acme".to_string());

        client.execute(&first).await;

        let t0 = std::time::Instant::now();
        client.execute(&second).await;
        assert!(t0.elapsed().as_millis() >= 400, "second api-only call should have waited on the shared bucket");
    }
}

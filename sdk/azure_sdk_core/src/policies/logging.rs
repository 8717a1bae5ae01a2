//! Request/response logging through `tracing`.
//!
//! Placed after the retry policy so every attempt is recorded with its try
//! number and timings. Header and query values are redacted unless
//! allow-listed; `Authorization` is always redacted. The policy observes
//! outcomes and never alters them.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use http::header::AUTHORIZATION;
use http::HeaderMap;
use tokio::time::Instant;
use url::Url;

use crate::context::Context;
use crate::error::{sanitize_message, Result};
use crate::pipeline::{Next, Policy};
use crate::policies::retry::RetryAttempt;
use crate::request::Request;
use crate::response::Response;

const REDACTED: &str = "REDACTED";

/// Headers whose values are logged by default.
pub const DEFAULT_ALLOWED_HEADERS: &[&str] = &[
    "accept",
    "cache-control",
    "connection",
    "content-length",
    "content-type",
    "date",
    "etag",
    "expires",
    "if-match",
    "if-modified-since",
    "if-none-match",
    "if-unmodified-since",
    "last-modified",
    "ms-cv",
    "pragma",
    "request-id",
    "retry-after",
    "server",
    "traceparent",
    "transfer-encoding",
    "user-agent",
    "www-authenticate",
    "x-ms-request-id",
    "x-ms-client-request-id",
    "x-ms-return-client-request-id",
];

/// Query parameters whose values are logged by default.
pub const DEFAULT_ALLOWED_QUERY_PARAMS: &[&str] = &["api-version"];

/// Maximum number of body bytes written to a log record.
const MAX_LOGGED_BODY: usize = 2048;

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LoggingOptions {
    /// Extra headers whose values may be logged.
    pub allowed_headers: Vec<String>,
    /// Extra query parameters whose values may be logged.
    pub allowed_query_params: Vec<String>,
    /// Log request and response bodies.
    pub include_body: bool,
}

/// Records each attempt at debug level and failures at warn level.
#[derive(Debug, Clone)]
pub struct LoggingPolicy {
    allowed_headers: HashSet<String>,
    allowed_query_params: HashSet<String>,
    include_body: bool,
}

impl LoggingPolicy {
    pub fn new(options: &LoggingOptions) -> Self {
        let allowed_headers = DEFAULT_ALLOWED_HEADERS
            .iter()
            .map(|h| h.to_string())
            .chain(options.allowed_headers.iter().map(|h| h.to_ascii_lowercase()))
            .filter(|h| h != AUTHORIZATION.as_str())
            .collect();
        let allowed_query_params = DEFAULT_ALLOWED_QUERY_PARAMS
            .iter()
            .map(|q| q.to_string())
            .chain(options.allowed_query_params.iter().map(|q| q.to_ascii_lowercase()))
            .collect();
        Self {
            allowed_headers,
            allowed_query_params,
            include_body: options.include_body,
        }
    }

    fn headers<'a>(&'a self, headers: &'a HeaderMap) -> RedactedHeaders<'a> {
        RedactedHeaders {
            headers,
            allowed: &self.allowed_headers,
        }
    }

    /// The URL with every non-allow-listed query value replaced.
    pub(crate) fn redact_url(&self, url: &Url) -> String {
        if url.query().is_none() {
            return url.to_string();
        }
        let mut redacted = url.clone();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| {
                let value = if self.allowed_query_params.contains(&k.to_ascii_lowercase()) {
                    v.into_owned()
                } else {
                    REDACTED.to_string()
                };
                (k.into_owned(), value)
            })
            .collect();
        redacted.query_pairs_mut().clear().extend_pairs(pairs);
        redacted.to_string()
    }

    fn body_preview(bytes: &[u8]) -> String {
        let cut = bytes.len().min(MAX_LOGGED_BODY);
        let text = String::from_utf8_lossy(&bytes[..cut]);
        sanitize_message(&text)
    }
}

impl Default for LoggingPolicy {
    fn default() -> Self {
        Self::new(&LoggingOptions::default())
    }
}

struct RedactedHeaders<'a> {
    headers: &'a HeaderMap,
    allowed: &'a HashSet<String>,
}

impl fmt::Display for RedactedHeaders<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in self.headers {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            let shown = if self.allowed.contains(name.as_str()) {
                value.to_str().unwrap_or("<binary>")
            } else {
                REDACTED
            };
            write!(f, "{}: {}", name, shown)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Policy for LoggingPolicy {
    async fn send(&self, ctx: &Context, request: &mut Request, next: Next<'_>) -> Result<Response> {
        let attempt = request.value::<RetryAttempt>().copied();
        let try_count = attempt.map_or(1, |a| a.try_number);

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                try_count,
                method = %request.method(),
                url = %self.redact_url(request.url()),
                headers = %self.headers(request.headers()),
                "==> outgoing request"
            );
            if self.include_body && request.body().is_some() {
                let body = request.body_bytes()?;
                request.rewind_body()?;
                tracing::debug!(try_count, body = %Self::body_preview(&body), "request body");
            }
        }

        let start = Instant::now();
        let outcome = next.run(ctx, request).await;
        let try_elapsed_ms = start.elapsed().as_millis() as u64;
        let op_elapsed_ms = attempt
            .map_or(try_elapsed_ms, |a| a.operation_start.elapsed().as_millis() as u64);

        match &outcome {
            Ok(response) => {
                tracing::debug!(
                    try_count,
                    status = response.status().as_u16(),
                    try_elapsed_ms,
                    op_elapsed_ms,
                    headers = %self.headers(response.headers()),
                    "<== response received"
                );
                if self.include_body {
                    if let Some(body) = response.bytes().filter(|b| !b.is_empty()) {
                        tracing::debug!(try_count, body = %Self::body_preview(body), "response body");
                    }
                }
            }
            Err(err) => {
                tracing::warn!(
                    try_count,
                    try_elapsed_ms,
                    op_elapsed_ms,
                    error = %sanitize_message(&err.to_string()),
                    "<== request failed"
                );
            }
        }
        outcome
    }
}

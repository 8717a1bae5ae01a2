use std::fmt;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use thiserror::Error;
use url::Url;

use crate::response::Response;

/// Boxed error used by custom transports and credentials.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by the pipeline, its policies and the pollers.
#[derive(Error, Debug)]
pub enum Error {
    /// The HTTP request failed at the transport level.
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    /// A custom transport failed.
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    /// The transport completed without producing a response or an error.
    #[error("transport returned neither a response nor an error")]
    NoResponse,

    /// The service answered with an unexpected status code.
    #[error(transparent)]
    Response(Box<ResponseError>),

    /// Wraps an error that must never be retried.
    #[error(transparent)]
    NonRetriable(BoxError),

    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Reading or seeking a request body failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A payload could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A URL could not be parsed or is unusable.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid configuration, detected at construction time.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The long-running operation state is invalid.
    #[error("Poller error: {0}")]
    Poller(String),

    /// The operation's context was cancelled.
    #[error("context canceled")]
    Canceled,

    /// The operation's context deadline elapsed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Mark `err` as non-retriable. The retry policy returns it after the first attempt.
    pub fn non_retriable(err: impl Into<BoxError>) -> Self {
        Self::NonRetriable(err.into())
    }

    /// Wrap an error raised by a custom transport.
    pub fn transport(err: impl Into<BoxError>) -> Self {
        Self::Transport(err.into())
    }

    /// Returns `true` if this error carries the non-retriable marker.
    pub fn is_non_retriable(&self) -> bool {
        matches!(self, Self::NonRetriable(_) | Self::Config(_))
    }

    /// Returns `true` for cancellation and deadline errors.
    pub fn is_context(&self) -> bool {
        matches!(self, Self::Canceled | Self::DeadlineExceeded)
    }

    /// The response error, if this error wraps one.
    pub fn as_response_error(&self) -> Option<&ResponseError> {
        match self {
            Self::Response(err) => Some(err),
            Self::NonRetriable(inner) => inner
                .downcast_ref::<Error>()
                .and_then(Error::as_response_error),
            _ => None,
        }
    }

    /// HTTP status of the wrapped response error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.as_response_error().map(ResponseError::status)
    }
}

impl From<ResponseError> for Error {
    fn from(err: ResponseError) -> Self {
        Self::Response(Box::new(err))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

const SEPARATOR: &str =
    "--------------------------------------------------------------------------------";

/// An HTTP response whose status code the caller did not expect.
///
/// Keeps a buffered copy of the raw response so callers can inspect
/// exactly what the service returned.
#[derive(Debug, Clone)]
pub struct ResponseError {
    status: StatusCode,
    error_code: Option<String>,
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Bytes,
}

impl ResponseError {
    /// Build an error from a response. The body must already be buffered;
    /// a streaming body is treated as empty.
    pub fn from_response(response: &Response) -> Self {
        let body = response.bytes().cloned().unwrap_or_default();
        let error_code = error_code(response.headers(), &body);
        Self {
            status: response.status(),
            error_code,
            method: response.request_method().clone(),
            url: response.request_url().clone(),
            headers: response.headers().clone(),
            body,
        }
    }

    /// The HTTP status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The service error code, from `x-ms-error-code` or the JSON body.
    pub fn error_code(&self) -> Option<&str> {
        self.error_code.as_deref()
    }

    /// Method of the request that failed.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// URL of the request that failed.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The raw response body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Rebuild the raw response.
    pub fn raw_response(&self) -> Response {
        Response::from_parts(
            self.status,
            self.headers.clone(),
            self.body.clone(),
            self.method.clone(),
            self.url.clone(),
        )
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut url = self.url.clone();
        url.set_query(None);
        url.set_fragment(None);
        writeln!(f, "{} {}", self.method, url)?;
        writeln!(f, "{SEPARATOR}")?;
        let reason = self.status.canonical_reason().unwrap_or("");
        writeln!(
            f,
            "RESPONSE {}: {} {}",
            self.status.as_u16(),
            self.status.as_u16(),
            reason
        )?;
        match &self.error_code {
            Some(code) => writeln!(f, "ERROR CODE: {code}")?,
            None => writeln!(f, "ERROR CODE UNAVAILABLE")?,
        }
        writeln!(f, "{SEPARATOR}")?;
        if self.body.is_empty() {
            writeln!(f, "Response contained no body")?;
        } else {
            let rendered = match serde_json::from_slice::<serde_json::Value>(&self.body) {
                Ok(value) => serde_json::to_string_pretty(&value)
                    .unwrap_or_else(|_| String::from_utf8_lossy(&self.body).into_owned()),
                Err(_) => String::from_utf8_lossy(&self.body).into_owned(),
            };
            writeln!(f, "{}", sanitize_message(&rendered))?;
        }
        writeln!(f, "{SEPARATOR}")
    }
}

impl std::error::Error for ResponseError {}

/// Header carrying the service error code.
pub const ERROR_CODE_HEADER: &str = "x-ms-error-code";

fn error_code(headers: &HeaderMap, body: &[u8]) -> Option<String> {
    if let Some(code) = headers
        .get(ERROR_CODE_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return Some(code.to_string());
    }
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let code = value
        .get("error")
        .and_then(|e| e.get("code"))
        .or_else(|| {
            value
                .get("odata.error")
                .and_then(|e| e.get("code"))
        })
        .or_else(|| value.get("code"))?;
    code.as_str().map(str::to_string)
}

/// Maximum length for rendered error messages.
const MAX_ERROR_MESSAGE_LEN: usize = 4096;

/// Redact credentials that may appear in error text or log lines.
///
/// Covers bearer tokens and HMAC signatures.
pub(crate) fn sanitize_message(msg: &str) -> String {
    let mut result = redact_after(msg, "Bearer ");
    result = redact_after(&result, "Signature=");
    if result.len() > MAX_ERROR_MESSAGE_LEN {
        let mut cut = MAX_ERROR_MESSAGE_LEN;
        while !result.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}... (truncated)", &result[..cut])
    } else {
        result
    }
}

const REDACTED: &str = "[REDACTED]";

fn redact_after(msg: &str, marker: &str) -> String {
    let mut result = msg.to_string();
    // Offset keeps the scan moving past replacements.
    let mut search_start = 0;
    while search_start < result.len() {
        let Some(relative_pos) = result[search_start..].find(marker) else {
            break;
        };
        let value_start = search_start + relative_pos + marker.len();
        if value_start >= result.len() {
            break;
        }
        if result[value_start..].starts_with(REDACTED) {
            search_start = value_start + REDACTED.len();
            continue;
        }
        let value_end = result[value_start..]
            .find(|c: char| c.is_whitespace() || c == '"' || c == '\'' || c == ',')
            .map(|pos| value_start + pos)
            .unwrap_or(result.len());
        if value_end > value_start {
            result.replace_range(value_start..value_end, REDACTED);
            search_start = value_start + REDACTED.len();
        } else {
            search_start = value_start;
        }
    }
    result
}

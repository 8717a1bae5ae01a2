//! Test helpers shared with sibling crates through the `test-support` feature.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use url::Url;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use crate::transport::Transport;

#[cfg(feature = "test-support")]
pub use wiremock;

/// A request as seen by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
enum Reply {
    Response {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
    Error(String),
    NonRetriable(String),
    Nothing,
}

#[derive(Debug, Default)]
struct MockState {
    replies: VecDeque<Reply>,
    fallback: Option<Reply>,
    requests: Vec<RecordedRequest>,
    latency: Option<Duration>,
}

/// A scriptable in-process transport.
///
/// Replies are consumed in order; once the queue is empty the fallback set
/// with [`repeat_status`](Self::repeat_status) is used, or a transport error
/// is returned.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, reply: Reply) {
        self.lock().replies.push_back(reply);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Queue a response with no headers and no body.
    pub fn push_status(&self, status: StatusCode) {
        self.push_response(status, &[], Bytes::new());
    }

    /// Queue a response.
    pub fn push_response(&self, status: StatusCode, headers: &[(&str, &str)], body: impl Into<Bytes>) {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                map.append(name, value);
            }
        }
        self.push(Reply::Response {
            status,
            headers: map,
            body: body.into(),
        });
    }

    /// Queue a JSON response.
    pub fn push_json(&self, status: StatusCode, headers: &[(&str, &str)], body: serde_json::Value) {
        let mut all: Vec<(&str, &str)> = vec![("content-type", "application/json")];
        all.extend_from_slice(headers);
        self.push_response(status, &all, body.to_string());
    }

    /// Queue a retriable transport failure.
    pub fn push_error(&self, message: &str) {
        self.push(Reply::Error(message.to_string()));
    }

    /// Queue a failure marked non-retriable.
    pub fn push_non_retriable(&self, message: &str) {
        self.push(Reply::NonRetriable(message.to_string()));
    }

    /// Queue an exchange that yields neither a response nor an error.
    pub fn push_no_response(&self) {
        self.push(Reply::Nothing);
    }

    /// Answer with `status` whenever the queue is empty.
    pub fn repeat_status(&self, status: StatusCode) {
        self.lock().fallback = Some(Reply::Response {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        });
    }

    /// Fail with a transport error whenever the queue is empty.
    pub fn repeat_error(&self, message: &str) {
        self.lock().fallback = Some(Reply::Error(message.to_string()));
    }

    /// Delay every reply by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    /// Number of requests received.
    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// Every request received, oldest first.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, ctx: &Context, request: &Request) -> Result<Response> {
        let body = request.body_bytes()?;
        let (reply, latency) = {
            let mut state = self.lock();
            state.requests.push(RecordedRequest {
                method: request.method().clone(),
                url: request.url().clone(),
                headers: request.headers().clone(),
                body,
            });
            let reply = state
                .replies
                .pop_front()
                .or_else(|| state.fallback.clone());
            (reply, state.latency)
        };
        if let Some(latency) = latency {
            ctx.sleep(latency).await?;
        }
        match reply {
            Some(Reply::Response {
                status,
                headers,
                body,
            }) => Ok(Response::from_parts(
                status,
                headers,
                body,
                request.method().clone(),
                request.url().clone(),
            )),
            Some(Reply::Error(message)) => Err(Error::transport(message)),
            Some(Reply::NonRetriable(message)) => {
                Err(Error::non_retriable(Error::transport(message)))
            }
            Some(Reply::Nothing) => Err(Error::NoResponse),
            None => Err(Error::transport("mock transport has no more replies")),
        }
    }
}

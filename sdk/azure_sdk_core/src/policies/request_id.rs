//! Client request ids.

use async_trait::async_trait;

use crate::context::Context;
use crate::error::Result;
use crate::pipeline::{Next, Policy};
use crate::request::Request;
use crate::response::Response;

/// Header carrying the client-generated request id.
pub const CLIENT_REQUEST_ID: &str = "x-ms-client-request-id";

/// Sets `x-ms-client-request-id` to a random UUID unless the caller set one.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdPolicy;

impl RequestIdPolicy {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Policy for RequestIdPolicy {
    async fn send(&self, ctx: &Context, request: &mut Request, next: Next<'_>) -> Result<Response> {
        if !request.headers().contains_key(CLIENT_REQUEST_ID) {
            request.insert_header(CLIENT_REQUEST_ID, uuid::Uuid::new_v4().to_string())?;
        }
        next.run(ctx, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::retry::{RetryOptions, RetryPolicy};
    use crate::test_support::MockTransport;
    use crate::Pipeline;
    use http::{Method, StatusCode};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn generates_id_once_per_operation() {
        let transport = MockTransport::new();
        transport.push_status(StatusCode::SERVICE_UNAVAILABLE);
        transport.push_status(StatusCode::OK);
        let retry = RetryPolicy::new(&RetryOptions {
            retry_delay: Some(Duration::from_millis(1)),
            max_retry_delay: Some(Duration::from_millis(2)),
            ..Default::default()
        })
        .unwrap();
        let pipeline = Pipeline::new(
            Arc::new(transport.clone()),
            vec![Arc::new(RequestIdPolicy::new()), Arc::new(retry)],
        );

        let mut req = Request::parse(Method::GET, "https://contoso.com/").unwrap();
        pipeline.send(&Context::new(), &mut req).await.unwrap();

        let sent = transport.requests();
        assert_eq!(sent.len(), 2);
        let first = sent[0].headers[CLIENT_REQUEST_ID].to_str().unwrap();
        let second = sent[1].headers[CLIENT_REQUEST_ID].to_str().unwrap();
        assert_eq!(first, second);
        assert!(uuid::Uuid::parse_str(first).is_ok());
    }

    #[tokio::test]
    async fn never_overwrites_caller_id() {
        let transport = MockTransport::new();
        transport.push_status(StatusCode::OK);
        let pipeline = Pipeline::new(
            Arc::new(transport.clone()),
            vec![Arc::new(RequestIdPolicy::new())],
        );

        let mut req = Request::parse(Method::GET, "https://contoso.com/").unwrap();
        req.insert_header(CLIENT_REQUEST_ID, "caller-id").unwrap();
        pipeline.send(&Context::new(), &mut req).await.unwrap();

        assert_eq!(transport.requests()[0].headers[CLIENT_REQUEST_ID], "caller-id");
    }
}

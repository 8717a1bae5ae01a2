//! Pipeline construction for service clients.
//!
//! Service clients describe themselves with a module name and version, add
//! their own policies (usually authentication), and pass the caller's
//! [`ClientOptions`] through. The resulting policy order is fixed:
//!
//! 1. telemetry (`User-Agent`)
//! 2. request id (`x-ms-client-request-id`)
//! 3. per-call policies, client first, then caller
//! 4. retry
//! 5. per-retry policies, client first, then caller
//! 6. logging
//! 7. body download
//! 8. transport
//!
//! # Example
//!
//! ```rust,no_run
//! use azure_sdk_core::client::{ClientOptions, PipelineBuilder};
//! use azure_sdk_core::policies::RetryOptions;
//!
//! # fn example() -> azure_sdk_core::Result<()> {
//! let options = ClientOptions {
//!     retry: RetryOptions {
//!         max_tries: Some(2),
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//! let pipeline = PipelineBuilder::new("appconfig", "0.1.0")
//!     .options(options)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::pipeline::{Pipeline, Policy};
use crate::policies::{
    BodyDownloadPolicy, LoggingOptions, LoggingPolicy, RequestIdPolicy, RetryOptions, RetryPolicy,
    TelemetryOptions, TelemetryPolicy,
};
use crate::transport::{ReqwestTransport, Transport};

/// Caller configuration shared by every client.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub retry: RetryOptions,
    pub telemetry: TelemetryOptions,
    pub logging: LoggingOptions,
    /// Replaces the default shared [`ReqwestTransport`].
    pub transport: Option<Arc<dyn Transport>>,
    /// Run once per operation, before retry.
    pub per_call_policies: Vec<Arc<dyn Policy>>,
    /// Run once per attempt, after retry.
    pub per_retry_policies: Vec<Arc<dyn Policy>>,
}

/// Builder for the standard [`Pipeline`].
#[derive(Debug)]
pub struct PipelineBuilder {
    module: String,
    version: String,
    options: ClientOptions,
    per_call: Vec<Arc<dyn Policy>>,
    per_retry: Vec<Arc<dyn Policy>>,
    transport: Option<Arc<dyn Transport>>,
}

impl PipelineBuilder {
    /// Start a builder for a client called `module` at `version`.
    pub fn new(module: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            version: version.into(),
            options: ClientOptions::default(),
            per_call: Vec::new(),
            per_retry: Vec::new(),
            transport: None,
        }
    }

    /// Apply the caller's options.
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Add a client policy that runs once per operation.
    pub fn per_call(mut self, policy: Arc<dyn Policy>) -> Self {
        self.per_call.push(policy);
        self
    }

    /// Add a client policy that runs on every attempt.
    pub fn per_retry(mut self, policy: Arc<dyn Policy>) -> Self {
        self.per_retry.push(policy);
        self
    }

    /// Client default transport. A transport in [`ClientOptions`] takes precedence.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Validate the options and assemble the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty module name, invalid retry
    /// options or an invalid telemetry value, and [`Error::Request`] if the
    /// default HTTP client cannot be created.
    pub fn build(self) -> Result<Pipeline> {
        if self.module.trim().is_empty() {
            return Err(Error::Config("module name is required".into()));
        }
        let telemetry = TelemetryPolicy::new(&self.module, &self.version, &self.options.telemetry)?;
        let retry = RetryPolicy::new(&self.options.retry)?;

        let transport: Arc<dyn Transport> = match self.options.transport.or(self.transport) {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::shared()?),
        };

        let mut policies: Vec<Arc<dyn Policy>> = Vec::with_capacity(
            6 + self.per_call.len()
                + self.options.per_call_policies.len()
                + self.per_retry.len()
                + self.options.per_retry_policies.len(),
        );
        policies.push(Arc::new(telemetry));
        policies.push(Arc::new(RequestIdPolicy::new()));
        policies.extend(self.per_call);
        policies.extend(self.options.per_call_policies);
        policies.push(Arc::new(retry));
        policies.extend(self.per_retry);
        policies.extend(self.options.per_retry_policies);
        policies.push(Arc::new(LoggingPolicy::new(&self.options.logging)));
        policies.push(Arc::new(BodyDownloadPolicy::new()));

        tracing::debug!(
            module = %self.module,
            version = %self.version,
            policies = policies.len() + 1,
            "pipeline built"
        );
        Ok(Pipeline::new(transport, policies))
    }
}

impl ClientOptions {
    /// Returns `true` if no transport override is configured.
    pub fn uses_default_transport(&self) -> bool {
        self.transport.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::pipeline::Next;
    use crate::policies::CLIENT_REQUEST_ID;
    use crate::request::Request;
    use crate::response::Response;
    use crate::test_support::MockTransport;
    use async_trait::async_trait;
    use http::header::USER_AGENT;
    use http::{Method, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Tag(&'static str, Arc<AtomicUsize>);

    impl Tag {
        fn new(name: &'static str) -> (Arc<Self>, Arc<AtomicUsize>) {
            let count = Arc::new(AtomicUsize::new(0));
            (Arc::new(Self(name, Arc::clone(&count))), count)
        }
    }

    #[async_trait]
    impl Policy for Tag {
        async fn send(&self, ctx: &Context, request: &mut Request, next: Next<'_>) -> Result<Response> {
            self.1.fetch_add(1, Ordering::SeqCst);
            next.run(ctx, request).await
        }
    }

    fn kinds(pipeline: &Pipeline) -> Vec<String> {
        pipeline
            .policies()
            .iter()
            .map(|p| {
                let debug = format!("{p:?}");
                debug
                    .split(|c: char| c == ' ' || c == '{' || c == ',')
                    .next()
                    .unwrap_or_default()
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn policies_are_assembled_in_order() {
        let (client_call, _) = Tag::new("client-call");
        let (caller_call, _) = Tag::new("caller-call");
        let (client_retry, _) = Tag::new("client-retry");
        let (caller_retry, _) = Tag::new("caller-retry");

        let pipeline = PipelineBuilder::new("appconfig", "0.1.0")
            .options(ClientOptions {
                transport: Some(Arc::new(MockTransport::new())),
                per_call_policies: vec![caller_call],
                per_retry_policies: vec![caller_retry],
                ..Default::default()
            })
            .per_call(client_call)
            .per_retry(client_retry)
            .build()
            .unwrap();

        assert_eq!(
            kinds(&pipeline),
            vec![
                "TelemetryPolicy",
                "RequestIdPolicy",
                "Tag(\"client-call\"",
                "Tag(\"caller-call\"",
                "RetryPolicy",
                "Tag(\"client-retry\"",
                "Tag(\"caller-retry\"",
                "LoggingPolicy",
                "BodyDownloadPolicy",
                "TransportPolicy",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn per_call_runs_once_and_per_retry_every_attempt() {
        let transport = MockTransport::new();
        transport.push_status(StatusCode::SERVICE_UNAVAILABLE);
        transport.push_status(StatusCode::SERVICE_UNAVAILABLE);
        transport.push_status(StatusCode::OK);
        let (per_call, call_count) = Tag::new("call");
        let (per_retry, retry_count) = Tag::new("retry");

        let pipeline = Pipeline::builder("appconfig", "0.1.0")
            .transport(Arc::new(transport.clone()))
            .per_call(per_call)
            .per_retry(per_retry)
            .build()
            .unwrap();

        let mut req = Request::parse(Method::GET, "https://contoso.com/kv").unwrap();
        let resp = pipeline.send(&Context::new(), &mut req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert_eq!(retry_count.load(Ordering::SeqCst), 3);

        let sent = transport.requests();
        let ua = sent[0].headers[USER_AGENT].to_str().unwrap();
        assert!(ua.starts_with("azsdk-rust-appconfig/0.1.0 ("), "unexpected user agent {ua}");
        assert!(sent.iter().all(|r| r.headers.contains_key(CLIENT_REQUEST_ID)));
    }

    #[tokio::test]
    async fn caller_transport_wins_over_client_default() {
        let client_transport = MockTransport::new();
        let caller_transport = MockTransport::new();
        caller_transport.push_status(StatusCode::OK);
        let options = ClientOptions {
            transport: Some(Arc::new(caller_transport.clone())),
            ..Default::default()
        };
        assert!(!options.uses_default_transport());

        let pipeline = PipelineBuilder::new("appconfig", "0.1.0")
            .transport(Arc::new(client_transport.clone()))
            .options(options)
            .build()
            .unwrap();
        let mut req = Request::parse(Method::GET, "https://contoso.com/").unwrap();
        pipeline.send(&Context::new(), &mut req).await.unwrap();

        assert_eq!(caller_transport.request_count(), 1);
        assert_eq!(client_transport.request_count(), 0);
    }

    #[test]
    fn invalid_retry_options_fail_at_build() {
        let err = PipelineBuilder::new("appconfig", "0.1.0")
            .options(ClientOptions {
                retry: RetryOptions {
                    max_tries: Some(0),
                    ..Default::default()
                },
                transport: Some(Arc::new(MockTransport::new())),
                ..Default::default()
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn module_name_is_required() {
        let err = PipelineBuilder::new(" ", "0.1.0")
            .transport(Arc::new(MockTransport::new()))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn with_options_uses_defaults() {
        let transport = MockTransport::new();
        transport.push_status(StatusCode::NO_CONTENT);
        let pipeline = Pipeline::with_options(
            "appconfig",
            "0.1.0",
            ClientOptions {
                transport: Some(Arc::new(transport.clone())),
                ..Default::default()
            },
        )
        .unwrap();

        let mut req = Request::parse(Method::DELETE, "https://contoso.com/kv/a").unwrap();
        let resp = pipeline.send(&Context::new(), &mut req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(transport.request_count(), 1);
    }
}

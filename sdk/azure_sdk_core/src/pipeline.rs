//! The policy chain.
//!
//! A [`Pipeline`] is an immutable, shared list of [`Policy`] values ending in
//! a transport. Each call walks the list once through a [`Next`] cursor; a
//! policy may invoke `next` zero, one or many times (the retry policy
//! re-enters the remainder of the chain once per attempt).

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::client::{ClientOptions, PipelineBuilder};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use crate::transport::{Transport, TransportPolicy};

/// One unit of middleware.
///
/// Implementations must tolerate running more than once per logical call.
#[async_trait]
pub trait Policy: Send + Sync + fmt::Debug {
    /// Process `request`, usually by delegating to `next` and inspecting the outcome.
    async fn send(&self, ctx: &Context, request: &mut Request, next: Next<'_>) -> Result<Response>;
}

/// Cursor over the policies that have not run yet.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    policies: &'a [Arc<dyn Policy>],
}

impl<'a> Next<'a> {
    pub(crate) fn new(policies: &'a [Arc<dyn Policy>]) -> Self {
        Self { policies }
    }

    /// Invoke the head of the remaining chain.
    pub async fn run(self, ctx: &Context, request: &mut Request) -> Result<Response> {
        let (head, tail) = self
            .policies
            .split_first()
            .ok_or_else(|| Error::Config("policy chain ended without a transport".into()))?;
        head.send(ctx, request, Next::new(tail)).await
    }

    /// Number of policies left, including the transport.
    pub fn remaining(&self) -> usize {
        self.policies.len()
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.policies.len())
            .finish()
    }
}

/// An ordered policy chain terminated by a transport. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Pipeline {
    policies: Arc<[Arc<dyn Policy>]>,
}

impl Pipeline {
    /// A raw pipeline: `policies` run in the given order, then `transport`.
    pub fn new(transport: Arc<dyn Transport>, policies: Vec<Arc<dyn Policy>>) -> Self {
        let mut chain = policies;
        chain.push(Arc::new(TransportPolicy::new(transport)));
        Self {
            policies: chain.into(),
        }
    }

    /// Start building the standard pipeline for a client module.
    pub fn builder(module: impl Into<String>, version: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(module, version)
    }

    /// The standard pipeline with default options.
    pub fn with_options(
        module: impl Into<String>,
        version: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self> {
        PipelineBuilder::new(module, version).options(options).build()
    }

    /// Send `request` through every policy.
    pub async fn send(&self, ctx: &Context, request: &mut Request) -> Result<Response> {
        Next::new(&self.policies).run(ctx, request).await
    }

    /// The policies in execution order, transport last.
    pub fn policies(&self) -> &[Arc<dyn Policy>] {
        &self.policies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockTransport;
    use http::{Method, StatusCode};
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Policy for Recorder {
        async fn send(
            &self,
            ctx: &Context,
            request: &mut Request,
            next: Next<'_>,
        ) -> Result<Response> {
            self.log.lock().unwrap().push(format!("{} >", self.name));
            let result = next.run(ctx, request).await;
            self.log.lock().unwrap().push(format!("{} <", self.name));
            result
        }
    }

    #[derive(Debug)]
    struct Twice;

    #[async_trait]
    impl Policy for Twice {
        async fn send(
            &self,
            ctx: &Context,
            request: &mut Request,
            next: Next<'_>,
        ) -> Result<Response> {
            let mut first = request.clone();
            next.run(ctx, &mut first).await?;
            next.run(ctx, request).await
        }
    }

    #[tokio::test]
    async fn policies_run_in_order_around_transport() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let transport = MockTransport::new();
        transport.push_status(StatusCode::OK);
        let pipeline = Pipeline::new(
            Arc::new(transport.clone()),
            vec![
                Arc::new(Recorder { name: "a", log: Arc::clone(&log) }),
                Arc::new(Recorder { name: "b", log: Arc::clone(&log) }),
            ],
        );

        let mut req = Request::parse(Method::GET, "https://contoso.com/").unwrap();
        let resp = pipeline.send(&Context::new(), &mut req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(*log.lock().unwrap(), vec!["a >", "b >", "b <", "a <"]);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn chain_can_be_reentered() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let transport = MockTransport::new();
        transport.push_status(StatusCode::OK);
        transport.push_status(StatusCode::ACCEPTED);
        let pipeline = Pipeline::new(
            Arc::new(transport.clone()),
            vec![
                Arc::new(Twice),
                Arc::new(Recorder { name: "inner", log: Arc::clone(&log) }),
            ],
        );

        let mut req = Request::parse(Method::GET, "https://contoso.com/").unwrap();
        let resp = pipeline.send(&Context::new(), &mut req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(log.lock().unwrap().len(), 4);
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn empty_chain_is_a_config_error() {
        let mut req = Request::parse(Method::GET, "https://contoso.com/").unwrap();
        let err = Next::new(&[]).run(&Context::new(), &mut req).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}

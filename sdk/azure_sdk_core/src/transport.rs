//! The leaf of every pipeline: the component that performs the network call.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::pipeline::{Next, Policy};
use crate::request::Request;
use crate::response::Response;

/// Default connection timeout (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends a request over the network.
///
/// Implementations are substitutable for testing or custom networking.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Perform one HTTP exchange.
    async fn send(&self, ctx: &Context, request: &Request) -> Result<Response>;
}

/// Transport backed by a pooled [`reqwest::Client`] with TLS 1.2 or newer.
///
/// Clones share the connection pool.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

impl ReqwestTransport {
    /// A transport using the process-wide shared client.
    pub fn shared() -> Result<Self> {
        if let Some(client) = SHARED_CLIENT.get() {
            return Ok(Self::from_client(client.clone()));
        }
        let client = Self::default_client_builder().build()?;
        // A concurrent initializer may win the race; either client works.
        let client = SHARED_CLIENT.get_or_init(|| client);
        Ok(Self::from_client(client.clone()))
    }

    /// A transport with its own connection pool.
    pub fn new() -> Result<Self> {
        Ok(Self::from_client(Self::default_client_builder().build()?))
    }

    /// Wrap an existing client, keeping its proxy, timeout and TLS settings.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// The builder used for the default client.
    pub fn default_client_builder() -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, _ctx: &Context, request: &Request) -> Result<Response> {
        let mut builder = self
            .client
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone());
        if request.body().is_some() {
            builder = builder.body(request.body_bytes()?);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let stream = response.bytes_stream().map_err(Error::from);

        Ok(Response::from_stream(
            status,
            headers,
            Box::pin(stream),
            request.method().clone(),
            request.url().clone(),
        ))
    }
}

/// Terminal policy handing the request to a [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportPolicy {
    transport: Arc<dyn Transport>,
}

impl TransportPolicy {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Policy for TransportPolicy {
    async fn send(&self, ctx: &Context, request: &mut Request, _next: Next<'_>) -> Result<Response> {
        ctx.run(self.transport.send(ctx, request)).await
    }
}

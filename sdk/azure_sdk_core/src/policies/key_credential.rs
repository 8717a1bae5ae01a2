//! API key authentication.

use async_trait::async_trait;
use http::HeaderValue;
use secrecy::ExposeSecret;

use crate::auth::KeyCredential;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::pipeline::{Next, Policy};
use crate::request::Request;
use crate::response::Response;

/// Writes a [`KeyCredential`] into a request header, optionally prefixed.
#[derive(Debug, Clone)]
pub struct KeyCredentialPolicy {
    credential: KeyCredential,
    header: http::HeaderName,
    prefix: Option<String>,
    allow_http: bool,
}

impl KeyCredentialPolicy {
    pub fn new(credential: KeyCredential, header: &str) -> Result<Self> {
        let header = http::HeaderName::from_bytes(header.as_bytes())
            .map_err(|e| Error::Config(format!("invalid header name {header:?}: {e}")))?;
        Ok(Self {
            credential,
            header,
            prefix: None,
            allow_http: false,
        })
    }

    /// Prefix the key, e.g. `"Bearer "` or `"SharedAccessKey "`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Permit sending the key over plain http. Intended for local testing.
    pub fn insecure_allow_credential_with_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }
}

/// Fail unless `request` targets https or `allow_http` is set.
pub(crate) fn require_https(request: &Request, allow_http: bool) -> Result<()> {
    if allow_http || request.url().scheme() == "https" {
        return Ok(());
    }
    Err(Error::non_retriable(Error::Auth(
        "authenticated requests are not permitted for non TLS protected (https) endpoints".into(),
    )))
}

#[async_trait]
impl Policy for KeyCredentialPolicy {
    async fn send(&self, ctx: &Context, request: &mut Request, next: Next<'_>) -> Result<Response> {
        require_https(request, self.allow_http)?;
        let key = self.credential.current();
        let raw = match &self.prefix {
            Some(prefix) => format!("{prefix}{}", key.expose_secret()),
            None => key.expose_secret().to_string(),
        };
        let mut value = HeaderValue::from_str(&raw)
            .map_err(|_| Error::non_retriable(Error::Auth("key is not a valid header value".into())))?;
        value.set_sensitive(true);
        request.headers_mut().insert(self.header.clone(), value);
        next.run(ctx, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockTransport;
    use crate::Pipeline;
    use http::{Method, StatusCode};
    use std::sync::Arc;

    #[tokio::test]
    async fn sets_prefixed_header() {
        let transport = MockTransport::new();
        transport.push_status(StatusCode::OK);
        let credential = KeyCredential::new("k1");
        let policy = KeyCredentialPolicy::new(credential.clone(), "authorization")
            .unwrap()
            .with_prefix("SharedKey ");
        let pipeline = Pipeline::new(Arc::new(transport.clone()), vec![Arc::new(policy)]);

        let mut req = Request::parse(Method::GET, "https://contoso.com/").unwrap();
        pipeline.send(&Context::new(), &mut req).await.unwrap();
        assert_eq!(transport.requests()[0].headers["authorization"], "SharedKey k1");

        credential.update("k2");
        transport.push_status(StatusCode::OK);
        let mut req = Request::parse(Method::GET, "https://contoso.com/").unwrap();
        pipeline.send(&Context::new(), &mut req).await.unwrap();
        assert_eq!(transport.requests()[1].headers["authorization"], "SharedKey k2");
    }

    #[tokio::test]
    async fn rejects_plain_http() {
        let transport = MockTransport::new();
        transport.repeat_status(StatusCode::OK);
        let policy = KeyCredentialPolicy::new(KeyCredential::new("k"), "api-key").unwrap();
        let pipeline = Pipeline::new(Arc::new(transport.clone()), vec![Arc::new(policy)]);

        let mut req = Request::parse(Method::GET, "http://contoso.com/").unwrap();
        let err = pipeline.send(&Context::new(), &mut req).await.unwrap_err();
        assert!(err.is_non_retriable());
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn plain_http_allowed_when_opted_in() {
        let transport = MockTransport::new();
        transport.push_status(StatusCode::OK);
        let policy = KeyCredentialPolicy::new(KeyCredential::new("k"), "api-key")
            .unwrap()
            .insecure_allow_credential_with_http(true);
        let pipeline = Pipeline::new(Arc::new(transport.clone()), vec![Arc::new(policy)]);

        let mut req = Request::parse(Method::GET, "http://localhost/").unwrap();
        pipeline.send(&Context::new(), &mut req).await.unwrap();
        assert_eq!(transport.requests()[0].headers["api-key"], "k");
    }
}

//! HMAC-SHA256 request signing for connection-string clients.
//!
//! Each attempt is signed over
//! `"{METHOD}\n{path?query}\n{x-ms-date};{host};{x-ms-content-sha256}"`
//! with the base64-decoded store secret.

use std::fmt;
use std::time::SystemTime;

use async_trait::async_trait;
use azure_sdk_core::context::Context;
use azure_sdk_core::error::{Error, Result};
use azure_sdk_core::pipeline::{Next, Policy};
use azure_sdk_core::request::Request;
use azure_sdk_core::response::Response;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use http::HeaderValue;
use secrecy::{ExposeSecret, SecretSlice};
use sha2::{Digest, Sha256};

use crate::connection_string::ConnectionString;

pub const X_MS_DATE: &str = "x-ms-date";
pub const X_MS_CONTENT_SHA256: &str = "x-ms-content-sha256";

const SIGNED_HEADERS: &str = "x-ms-date;host;x-ms-content-sha256";

type HmacSha256 = Hmac<Sha256>;

/// Signs requests with a store access key id and secret.
pub struct HmacCredentialPolicy {
    id: String,
    secret: SecretSlice<u8>,
    allow_http: bool,
}

impl HmacCredentialPolicy {
    pub fn new(id: impl Into<String>, secret: SecretSlice<u8>) -> Self {
        Self {
            id: id.into(),
            secret,
            allow_http: false,
        }
    }

    pub fn from_connection_string(cs: ConnectionString) -> Self {
        Self::new(cs.id, cs.secret)
    }

    /// Permit signing requests to plain http endpoints. Intended for local testing.
    pub fn insecure_allow_credential_with_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    fn sign(&self, request: &mut Request, date: &str) -> Result<()> {
        let body = request.body_bytes()?;
        request.rewind_body()?;
        let content_hash = STANDARD.encode(Sha256::digest(&body));

        let url = request.url();
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(Error::InvalidUrl(format!("{url} has no host"))),
        };
        let path_and_query = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_string(),
        };
        let string_to_sign = format!(
            "{}\n{path_and_query}\n{date};{host};{content_hash}",
            request.method()
        );

        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret())
            .map_err(|e| Error::non_retriable(Error::Auth(format!("invalid HMAC key: {e}"))))?;
        mac.update(string_to_sign.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        request.insert_header(X_MS_DATE, date)?;
        request.insert_header(X_MS_CONTENT_SHA256, &content_hash)?;
        let mut authorization = HeaderValue::from_str(&format!(
            "HMAC-SHA256 Credential={}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
            self.id
        ))
        .map_err(|_| Error::non_retriable(Error::Auth("credential id is not a valid header value".into())))?;
        authorization.set_sensitive(true);
        request.headers_mut().insert(http::header::AUTHORIZATION, authorization);
        Ok(())
    }
}

impl fmt::Debug for HmacCredentialPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacCredentialPolicy")
            .field("id", &self.id)
            .field("secret", &"****")
            .field("allow_http", &self.allow_http)
            .finish()
    }
}

#[async_trait]
impl Policy for HmacCredentialPolicy {
    async fn send(&self, ctx: &Context, request: &mut Request, next: Next<'_>) -> Result<Response> {
        if !self.allow_http && request.url().scheme() != "https" {
            return Err(Error::non_retriable(Error::Auth(
                "authenticated requests are not permitted for non TLS protected (https) endpoints".into(),
            )));
        }
        let date = httpdate::fmt_http_date(SystemTime::now());
        self.sign(request, &date)?;
        next.run(ctx, request).await
    }
}

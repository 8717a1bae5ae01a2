//! The App Configuration client and its builder.
//!
//! A [`ConfigurationClient`] owns one [`Pipeline`]. Authentication and sync
//! tokens run per retry so every attempt is freshly signed and carries the
//! newest tokens.
//!
//! ```rust,no_run
//! use azure_sdk_appconfig::client::ConfigurationClient;
//!
//! # fn example() -> azure_sdk_core::Result<()> {
//! // Reads AZURE_APPCONFIG_CONNECTION_STRING.
//! let client = ConfigurationClient::from_env()?;
//! println!("{}", client.endpoint());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use azure_sdk_core::auth::TokenCredential;
use azure_sdk_core::client::{ClientOptions, PipelineBuilder};
use azure_sdk_core::context::Context;
use azure_sdk_core::error::{Error, ResponseError, Result};
use azure_sdk_core::pipeline::{Pipeline, Policy};
use azure_sdk_core::policies::BearerTokenPolicy;
use azure_sdk_core::request::Request;
use azure_sdk_core::response::Response;
use http::{Method, StatusCode};
use url::Url;

use crate::auth::HmacCredentialPolicy;
use crate::connection_string::ConnectionString;
use crate::models::API_VERSION;
use crate::sync_token::{SyncTokenCache, SyncTokenPolicy};

/// Environment variable consulted when no credential is configured.
pub const CONNECTION_STRING_ENV: &str = "AZURE_APPCONFIG_CONNECTION_STRING";

const MODULE: &str = "azappconfig";

enum Credential {
    Token(Arc<dyn TokenCredential>),
    ConnectionString(String),
}

/// Client for one configuration store. Cheap to clone.
#[derive(Clone)]
pub struct ConfigurationClient {
    endpoint: Url,
    pipeline: Pipeline,
    sync_tokens: SyncTokenCache,
}

/// Builder for [`ConfigurationClient`].
#[derive(Default)]
pub struct ConfigurationClientBuilder {
    endpoint: Option<String>,
    credential: Option<Credential>,
    options: ClientOptions,
    allow_http: bool,
}

impl ConfigurationClient {
    pub fn builder() -> ConfigurationClientBuilder {
        ConfigurationClientBuilder::default()
    }

    /// Build a client from the connection string in
    /// `AZURE_APPCONFIG_CONNECTION_STRING`.
    pub fn from_env() -> Result<Self> {
        let raw = std::env::var(CONNECTION_STRING_ENV)
            .map_err(|_| Error::Config(format!("{CONNECTION_STRING_ENV} is not set")))?;
        Self::builder().connection_string(raw).build()
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Merge a `Sync-Token` value obtained elsewhere, such as from an Event
    /// Grid notification, so the next request observes that change.
    pub fn set_sync_token(&self, raw: &str) -> Result<()> {
        self.sync_tokens.update(raw)
    }

    pub fn sync_tokens(&self) -> &SyncTokenCache {
        &self.sync_tokens
    }

    /// A request for `segments` under the endpoint, with the api-version set.
    ///
    /// Segments are percent-encoded individually, so keys may contain `/`.
    pub(crate) fn request(&self, method: Method, segments: &[&str]) -> Result<Request> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(format!("{} cannot be a base", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        Request::new(method, url)
    }

    /// Send `request`, failing with [`Error::Response`] unless the status is
    /// one of `expected`.
    pub(crate) async fn send(&self, ctx: &Context, request: &mut Request, expected: &[StatusCode]) -> Result<Response> {
        let response = self.pipeline.send(ctx, request).await?;
        if !response.has_status_code(expected) {
            return Err(Error::Response(Box::new(ResponseError::from_response(&response))));
        }
        Ok(response)
    }
}

impl fmt::Debug for ConfigurationClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationClient")
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

impl ConfigurationClientBuilder {
    /// The store endpoint, e.g. `https://contoso.azconfig.io`. Required with
    /// [`credential`](Self::credential); taken from the connection string otherwise.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Authenticate with Microsoft Entra ID tokens.
    pub fn credential(mut self, credential: Arc<dyn TokenCredential>) -> Self {
        self.credential = Some(Credential::Token(credential));
        self
    }

    /// Authenticate with a store access key.
    pub fn connection_string(mut self, connection_string: impl Into<String>) -> Self {
        self.credential = Some(Credential::ConnectionString(connection_string.into()));
        self
    }

    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Permit credentials over plain http. Intended for local emulators and tests.
    pub fn insecure_allow_credential_with_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    /// Build the client.
    ///
    /// Without an explicit credential the connection string is read from
    /// `AZURE_APPCONFIG_CONNECTION_STRING`.
    pub fn build(self) -> Result<ConfigurationClient> {
        let credential = match self.credential {
            Some(credential) => credential,
            None => std::env::var(CONNECTION_STRING_ENV)
                .map(Credential::ConnectionString)
                .map_err(|_| {
                    Error::Config(format!(
                        "a credential is required. Set it via builder or {CONNECTION_STRING_ENV} env var."
                    ))
                })?,
        };

        let (endpoint, auth): (String, Arc<dyn Policy>) = match credential {
            Credential::ConnectionString(raw) => {
                let cs = ConnectionString::parse(&raw)?;
                let endpoint = self.endpoint.unwrap_or_else(|| cs.endpoint.clone());
                let policy = HmacCredentialPolicy::from_connection_string(cs)
                    .insecure_allow_credential_with_http(self.allow_http);
                let policy: Arc<dyn Policy> = Arc::new(policy);
                (endpoint, policy)
            }
            Credential::Token(credential) => {
                let endpoint = self
                    .endpoint
                    .ok_or_else(|| Error::Config("endpoint is required with a token credential".into()))?;
                let audience = audience(&parse_endpoint(&endpoint)?);
                let policy = BearerTokenPolicy::new(credential, [format!("{audience}/.default")])?
                    .insecure_allow_credential_with_http(self.allow_http);
                let policy: Arc<dyn Policy> = Arc::new(policy);
                (endpoint, policy)
            }
        };
        let endpoint = parse_endpoint(&endpoint)?;

        let sync_tokens = SyncTokenCache::new();
        let pipeline = PipelineBuilder::new(MODULE, env!("CARGO_PKG_VERSION"))
            .options(self.options)
            .per_retry(auth)
            .per_retry(Arc::new(SyncTokenPolicy::new(sync_tokens.clone())))
            .build()?;

        tracing::debug!(endpoint = %endpoint, "configuration client built");
        Ok(ConfigurationClient {
            endpoint,
            pipeline,
            sync_tokens,
        })
    }
}

fn parse_endpoint(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| Error::InvalidUrl(format!("invalid endpoint {raw:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(Error::InvalidUrl(format!("endpoint {raw:?} must be an http(s) URL with a host")));
    }
    Ok(url)
}

/// `scheme://host[:port]` of the store, the token audience.
fn audience(endpoint: &Url) -> String {
    let host = endpoint.host_str().unwrap_or_default();
    match endpoint.port() {
        Some(port) => format!("{}://{host}:{port}", endpoint.scheme()),
        None => format!("{}://{host}", endpoint.scheme()),
    }
}

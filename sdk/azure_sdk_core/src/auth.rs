//! Credential types used by the authentication policies.

use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use time::{Duration, OffsetDateTime};

use crate::context::Context;
use crate::error::Result;

/// Tokens expiring within this window are refreshed.
pub const REFRESH_WINDOW: Duration = Duration::minutes(5);

/// An OAuth access token.
#[derive(Clone)]
pub struct AccessToken {
    /// The bearer token.
    pub token: SecretString,
    /// When the token stops being accepted.
    pub expires_on: OffsetDateTime,
    /// When the issuer suggests refreshing, if it said so.
    pub refresh_on: Option<OffsetDateTime>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_on: OffsetDateTime) -> Self {
        Self {
            token: SecretString::from(token.into()),
            expires_on,
            refresh_on: None,
        }
    }

    /// Set the suggested refresh time.
    pub fn with_refresh_on(mut self, refresh_on: OffsetDateTime) -> Self {
        self.refresh_on = Some(refresh_on);
        self
    }

    /// Returns `true` once `refresh_on` has passed or expiry is within [`REFRESH_WINDOW`].
    pub fn should_refresh(&self, now: OffsetDateTime) -> bool {
        if self.refresh_on.is_some_and(|refresh_on| now >= refresh_on) {
            return true;
        }
        self.expires_on - now < REFRESH_WINDOW
    }

    /// Returns `true` once the token can no longer be used.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_on <= now
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"****")
            .field("expires_on", &self.expires_on)
            .field("refresh_on", &self.refresh_on)
            .finish()
    }
}

/// Source of OAuth access tokens.
///
/// Return [`Error::non_retriable`](crate::Error::non_retriable) for failures
/// that retrying cannot fix.
#[async_trait]
pub trait TokenCredential: Send + Sync + fmt::Debug {
    /// Acquire a token for `scopes`.
    async fn get_token(&self, ctx: &Context, scopes: &[String]) -> Result<AccessToken>;
}

/// A shared API key that can be rotated in place.
///
/// Clones share the key, so [`update`](Self::update) reaches every pipeline
/// built from the same credential.
#[derive(Clone)]
pub struct KeyCredential {
    key: Arc<RwLock<SecretString>>,
}

impl KeyCredential {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: Arc::new(RwLock::new(SecretString::from(key.into()))),
        }
    }

    /// Replace the key.
    pub fn update(&self, key: impl Into<String>) {
        let mut guard = self
            .key
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = SecretString::from(key.into());
    }

    /// The current key. Callers must not log it.
    pub(crate) fn current(&self) -> SecretString {
        self.key
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Create a credential from an environment variable.
    pub fn from_env(var: &str) -> Option<Self> {
        match std::env::var(var) {
            Ok(key) if !key.is_empty() => Some(Self::new(key)),
            _ => None,
        }
    }
}

impl fmt::Debug for KeyCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyCredential(****)")
    }
}

impl PartialEq<str> for KeyCredential {
    fn eq(&self, other: &str) -> bool {
        self.current().expose_secret() == other
    }
}

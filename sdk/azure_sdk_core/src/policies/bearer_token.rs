//! OAuth bearer token authentication.
//!
//! Tokens are cached per policy. When the cached token needs refreshing,
//! exactly one caller asks the credential for a new one. The others wait if
//! there is no usable token, or keep sending the old token while it has not
//! expired yet.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use http::header::AUTHORIZATION;
use http::HeaderValue;
use secrecy::{ExposeSecret, SecretString};
use time::OffsetDateTime;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::auth::{AccessToken, TokenCredential};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::pipeline::{Next, Policy};
use crate::policies::key_credential::require_https;
use crate::request::Request;
use crate::response::Response;

#[derive(Debug, Default)]
struct CacheState {
    token: Option<AccessToken>,
    refreshing: bool,
}

#[derive(Debug, Default)]
struct TokenCache {
    state: Mutex<CacheState>,
    refreshed: Notify,
}

enum Acquire<'a> {
    Ready(SecretString),
    Refresh,
    Wait(Notified<'a>),
}

/// Clears the refreshing flag and wakes waiters, even if the refresh future is dropped.
struct RefreshGuard<'a> {
    cache: &'a TokenCache,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.cache.lock().refreshing = false;
        self.cache.refreshed.notify_waiters();
    }
}

impl TokenCache {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn acquire(&self) -> Acquire<'_> {
        let mut state = self.lock();
        let now = OffsetDateTime::now_utc();
        if let Some(token) = state.token.as_ref().filter(|t| !t.should_refresh(now)) {
            return Acquire::Ready(token.token.clone());
        }
        if !state.refreshing {
            state.refreshing = true;
            return Acquire::Refresh;
        }
        if let Some(token) = state.token.as_ref().filter(|t| !t.is_expired(now)) {
            return Acquire::Ready(token.token.clone());
        }
        // Registered before the lock is released so the wakeup cannot be missed.
        Acquire::Wait(self.refreshed.notified())
    }

    async fn get(
        &self,
        ctx: &Context,
        credential: &dyn TokenCredential,
        scopes: &[String],
    ) -> Result<SecretString> {
        loop {
            match self.acquire() {
                Acquire::Ready(token) => return Ok(token),
                Acquire::Wait(notified) => {
                    ctx.run(async {
                        notified.await;
                        Ok(())
                    })
                    .await?;
                }
                Acquire::Refresh => {
                    let _guard = RefreshGuard { cache: self };
                    tracing::debug!(scopes = ?scopes, "acquiring access token");
                    let token = credential.get_token(ctx, scopes).await?;
                    let secret = token.token.clone();
                    tracing::debug!(expires_on = %token.expires_on, "access token acquired");
                    self.lock().token = Some(token);
                    return Ok(secret);
                }
            }
        }
    }
}

/// Sets `Authorization: Bearer <token>` from a [`TokenCredential`].
///
/// Clones share the token cache.
#[derive(Debug, Clone)]
pub struct BearerTokenPolicy {
    credential: Arc<dyn TokenCredential>,
    scopes: Arc<[String]>,
    cache: Arc<TokenCache>,
    allow_http: bool,
}

impl BearerTokenPolicy {
    pub fn new<S>(credential: Arc<dyn TokenCredential>, scopes: impl IntoIterator<Item = S>) -> Result<Self>
    where
        S: Into<String>,
    {
        let scopes: Arc<[String]> = scopes.into_iter().map(Into::into).collect();
        if scopes.is_empty() {
            return Err(Error::Config("at least one scope is required".into()));
        }
        Ok(Self {
            credential,
            scopes,
            cache: Arc::new(TokenCache::default()),
            allow_http: false,
        })
    }

    /// Permit sending tokens over plain http. Intended for local testing.
    pub fn insecure_allow_credential_with_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    /// The current token, refreshed if needed.
    pub async fn token(&self, ctx: &Context) -> Result<SecretString> {
        self.cache.get(ctx, self.credential.as_ref(), &self.scopes).await
    }

    /// Refresh the cached token every `interval` on a background task.
    ///
    /// Requires a running tokio runtime. The task stops when the returned
    /// handle is stopped or dropped.
    pub fn spawn_background_refresh(&self, interval: Duration) -> BackgroundRefresh {
        let cancel = CancellationToken::new();
        let policy = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let ctx = Context::new();
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if let Err(err) = policy.token(&ctx).await {
                    tracing::warn!(error = %err, "background token refresh failed");
                }
            }
            tracing::debug!("background token refresh stopped");
        });
        BackgroundRefresh {
            cancel,
            handle: Some(handle),
        }
    }
}

#[async_trait]
impl Policy for BearerTokenPolicy {
    async fn send(&self, ctx: &Context, request: &mut Request, next: Next<'_>) -> Result<Response> {
        require_https(request, self.allow_http)?;
        let token = self.token(ctx).await?;
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|_| Error::non_retriable(Error::Auth("token is not a valid header value".into())))?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);
        next.run(ctx, request).await
    }
}

/// Handle to a background refresh task.
#[derive(Debug)]
pub struct BackgroundRefresh {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundRefresh {
    /// Stop the task and wait for it to finish.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for BackgroundRefresh {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

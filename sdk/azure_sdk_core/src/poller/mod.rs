//! Long-running operation pollers.
//!
//! A [`Poller`] is built from the first response of a PUT, PATCH, POST or
//! DELETE. It picks a tracking strategy from that response's headers and
//! body, then polls until the service reports a terminal status. Callers
//! can poll step by step with [`Poller::poll`] or hand the loop over to
//! [`Poller::poll_until_done`]. A poller that is still running can be saved
//! with [`Poller::resume_token`] and rebuilt later, in another process, with
//! [`Poller::from_resume_token`].
//!
//! ```rust,no_run
//! use azure_sdk_core::poller::{Poller, PollerOptions, PollerType};
//! use azure_sdk_core::{Context, Pipeline, Response};
//!
//! #[derive(Default, serde::Deserialize)]
//! struct Widget {
//!     size: u32,
//! }
//!
//! # async fn example(pipeline: Pipeline, initial: Response) -> azure_sdk_core::Result<()> {
//! let ctx = Context::new();
//! let options = PollerOptions::new(PollerType::new("widgets", "Create")?);
//! let poller = Poller::<Widget>::new(&ctx, initial, pipeline, options).await?;
//! let outcome = poller.poll_until_done(&ctx, None).await?;
//! println!("size {}", outcome.value.size);
//! # Ok(())
//! # }
//! ```

mod strategy;
mod token;

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::{Error, ResponseError, Result};
use crate::pipeline::Pipeline;
use crate::request::Request;
use crate::response::Response;
use strategy::{Progress, Tracker, VALID_STATUS_CODES};

/// Wait between polls when the service sends no `Retry-After`.
pub const DEFAULT_POLL_FREQUENCY: Duration = Duration::from_secs(30);

/// Turns an unexpected or failed response into the caller's error type.
pub type ErrorHandler = Arc<dyn Fn(&Response) -> Error + Send + Sync>;

fn default_error_handler() -> ErrorHandler {
    Arc::new(|response: &Response| Error::from(ResponseError::from_response(response)))
}

/// Lifecycle of a long-running operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    InProgress,
    Succeeded,
    Failed,
    Canceled,
}

impl OperationStatus {
    /// Case-insensitive parse. Any unknown value counts as in progress.
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("succeeded") {
            Self::Succeeded
        } else if raw.eq_ignore_ascii_case("failed") {
            Self::Failed
        } else if raw.eq_ignore_ascii_case("canceled") {
            Self::Canceled
        } else {
            Self::InProgress
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// Where the final resource is fetched from, overriding the per-strategy default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinalStateVia {
    AzureAsyncOperation,
    Location,
    OriginalUri,
    OperationLocation,
}

/// Identifies the operation a poller tracks: `"{client}.{operation}"`.
///
/// Resume tokens carry this value and are only accepted by a poller of the
/// same type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PollerType(String);

impl PollerType {
    pub fn new(client: &str, operation: &str) -> Result<Self> {
        let valid = |part: &str| !part.is_empty() && !part.contains(['.', ';']);
        if !valid(client) || !valid(operation) {
            return Err(Error::Config(format!(
                "invalid poller type {client:?}.{operation:?}: parts must be non-empty and contain no '.' or ';'"
            )));
        }
        Ok(Self(format!("{client}.{operation}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PollerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Poller configuration.
#[derive(Clone)]
pub struct PollerOptions {
    poller_type: PollerType,
    final_state_via: Option<FinalStateVia>,
    error_handler: Option<ErrorHandler>,
}

impl PollerOptions {
    pub fn new(poller_type: PollerType) -> Self {
        Self {
            poller_type,
            final_state_via: None,
            error_handler: None,
        }
    }

    pub fn with_final_state_via(mut self, via: FinalStateVia) -> Self {
        self.final_state_via = Some(via);
        self
    }

    /// Replace the default handler, which produces [`Error::Response`].
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Response) -> Error + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for PollerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollerOptions")
            .field("poller_type", &self.poller_type)
            .field("final_state_via", &self.final_state_via)
            .field("custom_error_handler", &self.error_handler.is_some())
            .finish()
    }
}

/// Terminal result of a successful operation.
#[derive(Debug)]
pub struct Outcome<T> {
    /// The final resource, or `T::default()` for an empty body.
    pub value: T,
    /// The response `value` was read from.
    pub response: Response,
}

/// Tracks one long-running operation.
pub struct Poller<T> {
    pipeline: Pipeline,
    poller_type: PollerType,
    error_handler: ErrorHandler,
    /// `None` for an operation that finished in its first response.
    tracker: Option<Tracker>,
    last: Option<Response>,
    _value: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for Poller<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("poller_type", &self.poller_type)
            .field("tracker", &self.tracker)
            .field("last_status", &self.last.as_ref().map(Response::status))
            .finish()
    }
}

impl<T: DeserializeOwned + Default> Poller<T> {
    /// Build a poller from the first response of an operation.
    ///
    /// The response body is buffered. A status other than 200, 201, 202 or
    /// 204 is passed to the error handler.
    #[tracing::instrument(name = "core::poller::new", skip_all, fields(poller_type = %options.poller_type))]
    pub async fn new(ctx: &Context, mut response: Response, pipeline: Pipeline, options: PollerOptions) -> Result<Self> {
        response.download(ctx).await?;
        let error_handler = options.error_handler.unwrap_or_else(default_error_handler);
        if !response.has_status_code(&VALID_STATUS_CODES) {
            return Err(error_handler(&response));
        }
        let tracker = Tracker::detect(&response, options.final_state_via)?;
        tracing::debug!(
            status = response.status().as_u16(),
            strategy = tracker.as_ref().map_or("nop", |t| t.strategy.kind()),
            "created poller"
        );
        Ok(Self {
            pipeline,
            poller_type: options.poller_type,
            error_handler,
            tracker,
            last: Some(response),
            _value: PhantomData,
        })
    }

    /// Rebuild a poller from [`resume_token`](Self::resume_token) output.
    ///
    /// The token must have been produced by a poller of the same
    /// [`PollerType`]. The first [`poll`](Self::poll) refreshes the status.
    pub fn from_resume_token(token: &str, pipeline: Pipeline, options: PollerOptions) -> Result<Self> {
        let tracker = token::decode(token, &options.poller_type)?;
        tracing::debug!(
            poller_type = %options.poller_type,
            strategy = tracker.strategy.kind(),
            "resumed poller"
        );
        Ok(Self {
            pipeline,
            poller_type: options.poller_type,
            error_handler: options.error_handler.unwrap_or_else(default_error_handler),
            tracker: Some(tracker),
            last: None,
            _value: PhantomData,
        })
    }

    pub fn poller_type(&self) -> &PollerType {
        &self.poller_type
    }

    /// Current status. An operation that finished in its first response is `Succeeded`.
    pub fn status(&self) -> OperationStatus {
        self.tracker
            .as_ref()
            .map_or(OperationStatus::Succeeded, Tracker::status)
    }

    /// Returns `true` once the operation reached a terminal status.
    pub fn is_done(&self) -> bool {
        self.status().is_terminal()
    }

    /// The most recent response, if any was received by this instance.
    pub fn last_response(&self) -> Option<&Response> {
        self.last.as_ref()
    }

    /// Serialize the polling state. Fails once the operation is done.
    pub fn resume_token(&self) -> Result<String> {
        match &self.tracker {
            Some(tracker) if !tracker.is_done() => token::encode(&self.poller_type, tracker),
            _ => Err(Error::Poller(
                "cannot create a resume token for an operation in a terminal state".into(),
            )),
        }
    }

    /// Issue one status request unless the operation is already done.
    ///
    /// Returns the response that was received, or the latest one if no
    /// request was needed. Errors are not retried here; the pipeline's
    /// retry policy applies to the request itself.
    pub async fn poll(&mut self, ctx: &Context) -> Result<&Response> {
        let poll_url = match &self.tracker {
            Some(tracker) if !tracker.is_done() => tracker.state.poll_url.clone(),
            _ => return self.latest(),
        };

        let mut request = Request::parse(Method::GET, &poll_url)?;
        let mut response = self.pipeline.send(ctx, &mut request).await?;
        response.download(ctx).await?;

        if let Some(tracker) = self.tracker.as_mut() {
            if tracker.update(&response)? == Progress::UnexpectedStatus {
                return Err((self.error_handler)(&response));
            }
            tracing::debug!(
                poller_type = %self.poller_type,
                http_status = response.status().as_u16(),
                status = %tracker.state.status,
                "polled operation"
            );
        }
        self.last = Some(response);
        self.latest()
    }

    /// Fetch the final value of a finished operation.
    ///
    /// Fails if the operation is still running. A `Failed` or `Canceled`
    /// operation yields the error handler's error for the last response.
    pub async fn result(self, ctx: &Context) -> Result<Outcome<T>> {
        let Self {
            pipeline,
            error_handler,
            tracker,
            last,
            ..
        } = self;

        let final_url = match &tracker {
            None => None,
            Some(tracker) => match tracker.status() {
                OperationStatus::InProgress => {
                    return Err(Error::Poller("the operation has not reached a terminal state".into()))
                }
                OperationStatus::Failed | OperationStatus::Canceled => {
                    let response = last.as_ref().ok_or_else(no_response)?;
                    return Err(error_handler(response));
                }
                OperationStatus::Succeeded => tracker.final_get_url(),
            },
        };

        let response = match final_url {
            Some(url) => {
                tracing::debug!(url = %url, "fetching final resource");
                let mut request = Request::parse(Method::GET, &url)?;
                let mut response = pipeline.send(ctx, &mut request).await?;
                response.download(ctx).await?;
                if !response.status().is_success() {
                    return Err(error_handler(&response));
                }
                response
            }
            None => last.ok_or_else(no_response)?,
        };

        let value = match response.bytes() {
            Some(body) if !body.is_empty() => response.json()?,
            _ => T::default(),
        };
        Ok(Outcome { value, response })
    }

    /// Poll until the operation is done, then return [`result`](Self::result).
    ///
    /// The first poll is immediate. Later polls wait for the last response's
    /// `Retry-After`, or `frequency` (default [`DEFAULT_POLL_FREQUENCY`]).
    pub async fn poll_until_done(mut self, ctx: &Context, frequency: Option<Duration>) -> Result<Outcome<T>> {
        let frequency = frequency.unwrap_or(DEFAULT_POLL_FREQUENCY);
        loop {
            if self.is_done() {
                break;
            }
            if let Some(err) = ctx.err() {
                return Err(err);
            }
            let retry_after = self.poll(ctx).await?.retry_after();
            if self.is_done() {
                break;
            }
            let delay = retry_after.unwrap_or(frequency);
            tracing::trace!(delay_ms = delay.as_millis() as u64, "waiting before next poll");
            ctx.sleep(delay).await?;
        }
        self.result(ctx).await
    }

    fn latest(&self) -> Result<&Response> {
        self.last.as_ref().ok_or_else(no_response)
    }
}

fn no_response() -> Error {
    Error::Poller("no response has been received for this operation yet".into())
}

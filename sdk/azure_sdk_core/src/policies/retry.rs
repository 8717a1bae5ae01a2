//! Retry with backoff.
//!
//! Every attempt rewinds the request body (the first one included), runs the
//! rest of the chain under a per-try timeout nested in the caller's context,
//! and stops on success, on a non-retriable error, when the caller's context
//! is done, or after `max_tries` attempts. Exhausting the attempts returns
//! the last outcome unchanged so callers see exactly what the server said.

use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use tokio::time::Instant;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::pipeline::{Next, Policy};
use crate::request::Request;
use crate::response::Response;

/// Default number of attempts, the first one included.
pub const DEFAULT_MAX_TRIES: u32 = 4;

/// Default timeout for a single attempt.
pub const DEFAULT_TRY_TIMEOUT: Duration = Duration::from_secs(60);

/// Default base delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(4);

/// Default upper bound for the delay between attempts.
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(120);

/// Status codes retried by default.
pub const DEFAULT_RETRY_STATUS_CODES: [StatusCode; 6] = [
    StatusCode::REQUEST_TIMEOUT,
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Determines if an HTTP status code is retried by default.
#[inline]
pub fn is_retriable_status(status: StatusCode) -> bool {
    DEFAULT_RETRY_STATUS_CODES.contains(&status)
}

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryMode {
    /// `(2^try - 1) * retry_delay`, jittered and capped at `max_retry_delay`.
    #[default]
    Exponential,
    /// A constant `retry_delay`.
    Fixed,
}

/// Retry configuration. Unset fields resolve to the `DEFAULT_*` constants.
///
/// A value stored on a request with [`Request::insert_value`] overrides the
/// pipeline's options for that operation.
#[derive(Debug, Clone, Default)]
pub struct RetryOptions {
    pub mode: Option<RetryMode>,
    /// Attempts including the first. Must be at least 1.
    pub max_tries: Option<u32>,
    pub try_timeout: Option<Duration>,
    pub retry_delay: Option<Duration>,
    pub max_retry_delay: Option<Duration>,
    pub status_codes: Option<Vec<StatusCode>>,
}

impl RetryOptions {
    /// Resolve defaults and validate.
    pub fn resolve(&self) -> Result<ResolvedRetryOptions> {
        let max_tries = self.max_tries.unwrap_or(DEFAULT_MAX_TRIES);
        if max_tries == 0 {
            return Err(Error::Config("max_tries must be at least 1".into()));
        }
        let retry_delay = self.retry_delay.unwrap_or(DEFAULT_RETRY_DELAY);
        let max_retry_delay = self.max_retry_delay.unwrap_or(DEFAULT_MAX_RETRY_DELAY);
        if retry_delay > max_retry_delay {
            return Err(Error::Config(format!(
                "retry_delay ({retry_delay:?}) must not exceed max_retry_delay ({max_retry_delay:?})"
            )));
        }
        let try_timeout = self.try_timeout.unwrap_or(DEFAULT_TRY_TIMEOUT);
        if try_timeout.is_zero() {
            return Err(Error::Config("try_timeout must be positive".into()));
        }
        Ok(ResolvedRetryOptions {
            mode: self.mode.unwrap_or_default(),
            max_tries,
            try_timeout,
            retry_delay,
            max_retry_delay,
            status_codes: self
                .status_codes
                .clone()
                .unwrap_or_else(|| DEFAULT_RETRY_STATUS_CODES.to_vec()),
        })
    }
}

/// Validated retry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRetryOptions {
    pub mode: RetryMode,
    pub max_tries: u32,
    pub try_timeout: Duration,
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub status_codes: Vec<StatusCode>,
}

impl ResolvedRetryOptions {
    /// Backoff before the attempt following `try_number` (1-based).
    pub fn calc_delay(&self, try_number: u32) -> Duration {
        match self.mode {
            RetryMode::Fixed => self.retry_delay,
            RetryMode::Exponential => {
                let factor = 2u32.saturating_pow(try_number).saturating_sub(1);
                let raw = self.retry_delay.saturating_mul(factor);
                if raw >= self.max_retry_delay {
                    return self.max_retry_delay;
                }
                // [0.8, 1.3)
                let jitter = fastrand::f64() / 2.0 + 0.8;
                Duration::try_from_secs_f64(raw.as_secs_f64() * jitter)
                    .map_or(self.max_retry_delay, |d| d.min(self.max_retry_delay))
            }
        }
    }
}

/// Per-attempt bookkeeping shared with the logging policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryAttempt {
    /// 1-based attempt number.
    pub try_number: u32,
    /// When the first attempt started.
    pub operation_start: Instant,
}

/// Retries failed attempts with backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    options: ResolvedRetryOptions,
}

impl RetryPolicy {
    pub fn new(options: &RetryOptions) -> Result<Self> {
        Ok(Self {
            options: options.resolve()?,
        })
    }

    pub fn options(&self) -> &ResolvedRetryOptions {
        &self.options
    }

    fn delay_for(options: &ResolvedRetryOptions, outcome: &Result<Response>, try_number: u32) -> Duration {
        outcome
            .as_ref()
            .ok()
            .and_then(Response::retry_after)
            .unwrap_or_else(|| options.calc_delay(try_number))
    }
}

#[async_trait]
impl Policy for RetryPolicy {
    async fn send(&self, ctx: &Context, request: &mut Request, next: Next<'_>) -> Result<Response> {
        let options = match request.value::<RetryOptions>() {
            Some(overrides) => overrides.resolve()?,
            None => self.options.clone(),
        };
        let operation_start = Instant::now();
        let mut try_number = 1;

        loop {
            request.rewind_body()?;
            let mut attempt = request.clone();
            attempt.insert_value(RetryAttempt {
                try_number,
                operation_start,
            });

            let try_ctx = ctx.with_timeout(options.try_timeout);
            tracing::trace!(try_number, "retry: attempt");
            let outcome = next.run(&try_ctx, &mut attempt).await;

            if let Ok(response) = &outcome {
                if !response.has_status_code(&options.status_codes) {
                    tracing::trace!(try_number, "retry: exit due to non-retriable status code");
                    return outcome;
                }
            }

            if let Some(err) = ctx.err() {
                tracing::debug!(try_number, error = %err, "retry: abort, context is done");
                if let Ok(mut response) = outcome {
                    response.drain().await;
                }
                return Err(err);
            }

            if let Err(err) = &outcome {
                if err.is_non_retriable() {
                    tracing::debug!(try_number, error = %err, "retry: non-retriable error");
                    return outcome;
                }
            }

            if try_number >= options.max_tries {
                tracing::debug!(max_tries = options.max_tries, "retry: max tries reached");
                return outcome;
            }

            let delay = Self::delay_for(&options, &outcome, try_number);
            match outcome {
                Ok(mut response) => {
                    tracing::debug!(
                        try_number,
                        status = response.status().as_u16(),
                        delay_ms = delay.as_millis() as u64,
                        "retry: retriable status"
                    );
                    response.drain().await;
                }
                Err(err) => {
                    tracing::debug!(
                        try_number,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "retry: retriable error"
                    );
                }
            }

            ctx.sleep(delay).await?;
            try_number += 1;
        }
    }
}

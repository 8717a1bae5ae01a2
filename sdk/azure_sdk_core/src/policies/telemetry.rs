//! `User-Agent` telemetry.

use async_trait::async_trait;
use http::header::{HeaderValue, USER_AGENT};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::pipeline::{Next, Policy};
use crate::request::Request;
use crate::response::Response;

/// Longest application id kept in the `User-Agent` prefix.
pub const MAX_APPLICATION_ID_LEN: usize = 24;

/// Telemetry configuration.
#[derive(Debug, Clone, Default)]
pub struct TelemetryOptions {
    /// Prefix identifying the calling application.
    pub application_id: Option<String>,
    /// Skip setting `User-Agent` entirely.
    pub disabled: bool,
}

/// Prepends `azsdk-rust-{module}/{version} ({os}; {arch})` to `User-Agent`.
#[derive(Debug, Clone)]
pub struct TelemetryPolicy {
    value: Option<String>,
}

impl TelemetryPolicy {
    pub fn new(module: &str, version: &str, options: &TelemetryOptions) -> Result<Self> {
        if options.disabled {
            return Ok(Self { value: None });
        }
        let mut value = String::new();
        if let Some(app_id) = options.application_id.as_deref().filter(|id| !id.is_empty()) {
            let app_id: String = app_id
                .chars()
                .take(MAX_APPLICATION_ID_LEN)
                .map(|c| if c == ' ' { '/' } else { c })
                .collect();
            value.push_str(&app_id);
            value.push(' ');
        }
        value.push_str(&format!(
            "azsdk-rust-{module}/{version} ({}; {})",
            std::env::consts::OS,
            std::env::consts::ARCH
        ));
        HeaderValue::from_str(&value)
            .map_err(|e| Error::Config(format!("invalid telemetry value {value:?}: {e}")))?;
        Ok(Self { value: Some(value) })
    }

    /// The value this policy prepends, if enabled.
    pub fn user_agent(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

#[async_trait]
impl Policy for TelemetryPolicy {
    async fn send(&self, ctx: &Context, request: &mut Request, next: Next<'_>) -> Result<Response> {
        if let Some(value) = &self.value {
            let combined = match request.headers().get(USER_AGENT).and_then(|v| v.to_str().ok()) {
                Some(existing) if !existing.is_empty() => format!("{value} {existing}"),
                _ => value.clone(),
            };
            request.insert_header(USER_AGENT.as_str(), combined)?;
        }
        next.run(ctx, request).await
    }
}

//! Response body buffering.

use async_trait::async_trait;

use crate::context::Context;
use crate::error::Result;
use crate::pipeline::{Next, Policy};
use crate::request::{Request, SkipBodyDownload};
use crate::response::Response;

/// Buffers every response body unless the request carries [`SkipBodyDownload`].
///
/// Runs inside the retry loop, so a failed download is retried like any
/// other transport failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct BodyDownloadPolicy;

impl BodyDownloadPolicy {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Policy for BodyDownloadPolicy {
    async fn send(&self, ctx: &Context, request: &mut Request, next: Next<'_>) -> Result<Response> {
        let mut response = next.run(ctx, request).await?;
        if request.value::<SkipBodyDownload>().is_some() {
            return Ok(response);
        }
        response.download(ctx).await?;
        Ok(response)
    }
}

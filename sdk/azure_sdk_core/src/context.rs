//! Cancellation and deadline scope for pipeline calls.
//!
//! Every blocking operation in this crate (sending a request, sleeping
//! between retries, waiting between polls) takes a [`Context`] and returns
//! promptly once the context is cancelled or its deadline elapses.
//!
//! ```rust,no_run
//! use azure_sdk_core::Context;
//! use std::time::Duration;
//!
//! # async fn example() -> azure_sdk_core::Result<()> {
//! let ctx = Context::new().with_timeout(Duration::from_secs(30));
//! ctx.sleep(Duration::from_millis(10)).await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// A cancellation token plus an optional deadline.
///
/// Children created with [`with_timeout`](Self::with_timeout) or
/// [`with_deadline`](Self::with_deadline) are cancelled with their parent
/// and never outlive its deadline.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// A child context that expires after `timeout`, or at the parent's deadline if earlier.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// A child context that expires at `deadline`, or at the parent's deadline if earlier.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// A child context that can be cancelled independently of its parent.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancel this context and all of its children.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns `true` once the context is cancelled or past its deadline.
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// The reason this context is done, or `None` while it is live.
    pub fn err(&self) -> Option<Error> {
        if self.token.is_cancelled() {
            return Some(Error::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    /// Drive `fut` to completion unless the context ends first.
    ///
    /// A context that is already done never polls `fut`.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Canceled),
            _ = deadline => Err(Error::DeadlineExceeded),
            result = fut => result,
        }
    }

    /// Sleep for `duration`, returning early with the context error.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn new_context_is_live() {
        let ctx = Context::new();
        assert!(!ctx.is_done());
        assert!(ctx.deadline().is_none());
        ctx.sleep(Duration::from_secs(3600)).await.expect("not cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_expires() {
        let ctx = Context::new().with_timeout(Duration::from_secs(1));
        let err = ctx.sleep(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded));
        assert!(ctx.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn child_never_extends_parent_deadline() {
        let parent = Context::new().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());

        let shorter = parent.with_timeout(Duration::from_millis(10));
        assert!(shorter.deadline() < parent.deadline());
    }

    #[tokio::test]
    async fn cancelling_parent_cancels_child_only_downwards() {
        let parent = Context::new();
        let child = parent.with_timeout(Duration::from_secs(60));
        child.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());

        let child = parent.child();
        parent.cancel();
        assert!(matches!(child.err(), Some(Error::Canceled)));
    }

    #[tokio::test]
    async fn run_skips_future_when_done() {
        let ctx = Context::new();
        ctx.cancel();
        let mut polled = false;
        let result = ctx
            .run(async {
                polled = true;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::Canceled)));
        assert!(!polled);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_sleep() {
        let ctx = Context::new();
        let handle = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.sleep(Duration::from_secs(3600)).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        ctx.cancel();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(Error::Canceled)));
    }
}

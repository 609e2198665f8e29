//! Cancellable operation context
//!
//! Every blocking step of a side-channel resolution (waiting for the cache
//! guard, dialing, the CONNECT exchange, the security handshake) runs under a
//! [`Context`]. When the context is cancelled or its deadline passes, the
//! running future is dropped, which closes any socket it owns.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Context errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation token plus optional deadline, passed to every handshake
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// Create a context that is never cancelled on its own
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context that expires after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().timeout(timeout)
    }

    /// Create a context driven by an existing cancellation token
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Set a deadline `timeout` from now, keeping an earlier one if present.
    ///
    /// A timeout too large to represent leaves the deadline unchanged.
    pub fn timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.deadline_at(deadline),
            None => self,
        }
    }

    /// Set an absolute deadline, keeping an earlier one if present
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// Derive a context cancelled together with this one
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancel this context and every child derived from it
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Check the context without waiting
    pub fn check(&self) -> Result<(), ContextError> {
        if self.token.is_cancelled() {
            return Err(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Err(ContextError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Drive `fut` to completion unless the context ends first.
    ///
    /// On cancellation or deadline expiry `fut` is dropped before returning.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, ContextError>
    where
        F: Future<Output = T>,
    {
        self.check()?;

        let sleep = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(ContextError::Cancelled),
            _ = sleep => Err(ContextError::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes() {
        let ctx = Context::new();
        let out = ctx.run(async { 7 }).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_is_ignored() {
        let ctx = Context::with_timeout(Duration::from_secs(u64::MAX));
        assert_eq!(ctx.deadline(), None);

        let ctx = Context::with_timeout(Duration::from_secs(60)).timeout(Duration::MAX);
        assert!(ctx.deadline().is_some());
        assert_eq!(ctx.run(async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let ctx = Context::new();
        ctx.cancel();
        let out = ctx.run(async { 7 }).await;
        assert_eq!(out, Err(ContextError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_future() {
        let ctx = Context::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let out = ctx.run(std::future::pending::<()>()).await;
        assert_eq!(out, Err(ContextError::Cancelled));
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let ctx = Context::with_timeout(Duration::from_millis(20));
        let out = ctx.run(std::future::pending::<()>()).await;
        assert_eq!(out, Err(ContextError::DeadlineExceeded));
    }

    #[test]
    fn test_earlier_deadline_wins() {
        let now = Instant::now();
        let ctx = Context::new()
            .deadline_at(now + Duration::from_secs(5))
            .deadline_at(now + Duration::from_secs(60));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(5)));
    }

    #[test]
    fn test_child_follows_parent() {
        let parent = Context::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
        assert_eq!(child.check(), Err(ContextError::Cancelled));
    }
}

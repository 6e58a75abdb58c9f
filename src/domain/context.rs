//! Call Context
//!
//! Cancellation and deadline carried through every cache call. Each tier
//! runs its network operations through [`CallContext::run`], so a cancelled
//! or timed-out caller gets an error instead of a hanging warehouse query.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Cancellation token plus optional deadline.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that is never cancelled and has no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Wrap an existing token (for example one owned by a request handler).
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Derive a context cancelled together with this one, optionally with a
    /// tighter deadline.
    pub fn child(&self, timeout: Option<Duration>) -> Self {
        let deadline = match (self.deadline, timeout) {
            (Some(parent), Some(t)) => Some(parent.min(Instant::now() + t)),
            (None, Some(t)) => Some(Instant::now() + t),
            (parent, None) => parent,
        };
        Self {
            token: self.token.child_token(),
            deadline,
        }
    }

    /// Cancel this context and all of its children.
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

    /// Run `fut` unless the context ends first.
    ///
    /// Cancellation wins ties so a cancelled caller never observes a result.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::DeadlineExceeded);
            }
        }

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => Err(Error::Cancelled),
                    _ = tokio::time::sleep_until(deadline) => Err(Error::DeadlineExceeded),
                    result = fut => result,
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => Err(Error::Cancelled),
                    result = fut => result,
                }
            }
        }
    }
}

// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

/// A cloneable handle used for cooperative cancellation of long-running tasks.
///
/// Every clone observes the same cancellation state. Tokens derived with [`child_token`](Self::child_token)
/// get cancelled whenever their parent is, but cancelling a child has no effect on its parent.
#[derive(Clone, Default)]
pub struct ShutdownToken {
    name: Option<Arc<str>>,
    inner: CancellationToken,
}

impl Debug for ShutdownToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownToken")
            .field("name", &self.name)
            .field("cancelled", &self.inner.is_cancelled())
            .finish()
    }
}

impl ShutdownToken {
    pub fn new(name: impl Into<String>) -> Self {
        ShutdownToken {
            name: Some(Arc::from(name.into())),
            inner: CancellationToken::new(),
        }
    }

    /// Creates an unnamed token that is not attached to any parent.
    /// Mostly useful in tests or for tasks whose lifetime is managed by hand.
    pub fn ephemeral() -> Self {
        ShutdownToken::default()
    }

    /// Derive a named child token. The name is appended to the name of the parent.
    #[must_use]
    pub fn child_token(&self, child_name: &str) -> Self {
        let name = match &self.name {
            Some(parent) => format!("{parent}-{child_name}"),
            None => child_name.to_string(),
        };

        ShutdownToken {
            name: Some(Arc::from(name)),
            inner: self.inner.child_token(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn cancel(&self) {
        debug!("cancelling {}", self.name().unwrap_or("unnamed token"));
        self.inner.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.cancelled()
    }

    /// Runs the provided future until either it completes or the token gets cancelled,
    /// whichever happens first. Cancellation takes precedence if both are ready.
    pub async fn run_until_cancelled<F>(&self, fut: F) -> Option<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.inner.cancelled() => None,
            res = fut => Some(res),
        }
    }
}

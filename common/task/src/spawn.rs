// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use tracing::{trace, Instrument};

pub type JoinHandle<F> = tokio::task::JoinHandle<F>;

#[track_caller]
pub fn spawn_future<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(future)
}

/// Spawns the future inside a tracing span carrying the provided name,
/// so that any events emitted by the task can be attributed to it.
#[track_caller]
pub fn spawn_named_future<F>(future: F, name: &str) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    trace!("spawning task '{name}'");
    let span = tracing::debug_span!("task", name = %name);
    tokio::spawn(future.instrument(span))
}

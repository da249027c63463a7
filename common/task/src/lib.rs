// Copyright 2022 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

pub mod cancellation;
pub mod spawn;

pub use cancellation::ShutdownToken;
pub use spawn::{spawn_future, spawn_named_future, JoinHandle};

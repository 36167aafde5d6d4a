// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Kernel synchronisation primitives.

pub mod dispatch_lock;

pub use dispatch_lock::{DispatchGuard, DispatchLock};

// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: User-level runtime for exokernel environments
//! OWNERS: @runtime
//! PUBLIC API: Platform, Runtime, sys::*, set_pgfault_handler, fork, sfork, ipc_send, ipc_recv,
//!             exit, wait, this_env, console::cputs
//! DEPENDS_ON: exo_abi (syscall numbers, layout, error codes)
//! INVARIANTS: Every kernel interaction goes through `Platform::syscall`; page tables are
//!             only read through the uvpd/uvpt views; fork policy lives entirely here
//!
//! Programs receive a `&mut dyn Platform` that stands for "the current environment": its
//! syscall gate, its memory, and its read-only views of kernel state.

pub mod console;
pub mod fork;
pub mod ipc;
pub mod pgfault;
pub mod platform;
pub mod process;
pub mod sys;

pub use fork::{fork, sfork, Forked};
pub use ipc::{ipc_recv, ipc_send, Received};
pub use pgfault::{set_pgfault_handler, PgfaultHandler};
pub use platform::{Platform, Runtime};
pub use process::{exit, this_env, wait};

#[cfg(test)]
mod fake;

// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel/user ABI shared by the exokernel core and its user runtime
//! OWNERS: @kernel-team
//! PUBLIC API: Error, EnvId, EnvStatus, EnvRecord, Perm, Pte, Pde, Syscall, UTrapframe,
//!   layout constants
//! DEPENDS_ON: bitflags
//! INVARIANTS: Error codes, syscall numbers and status values are stable;
//!   UTrapframe is 52 bytes LE

#![cfg_attr(not(test), no_std)]
#![deny(clippy::all, missing_docs)]
#![forbid(unsafe_code)]

pub mod env;
pub mod error;
pub mod mmu;
pub mod syscall;
pub mod trap;

pub use env::{EnvId, EnvRecord, EnvStatus};
pub use error::{Error, Result};
pub use mmu::{Pde, Perm, Pte};
pub use syscall::Syscall;
pub use trap::{PushRegs, UTrapframe};

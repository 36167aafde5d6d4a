// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Exokernel protection and communication core
//! OWNERS: @kernel-team
//! PUBLIC API: Kernel, KernelState, KernelConfig, Resume, TrapFrame, CpuId, Devices
//! DEPENDS_ON: exo_abi (ABI constants and types), spin (dispatch lock, log ring)
//! INVARIANTS: All kernel state sits behind one dispatch lock; user space sees it only
//!             through syscalls and the read-only uvpd/uvpt/envs views
//!
//! The core is hosted: a CPU driver (bare metal or a simulator) feeds traps into
//! [`Kernel::trap`] and acts on the returned [`Resume`] decision.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), forbid(clippy::unwrap_used))]

extern crate alloc;

pub mod config;
pub mod diag;
pub mod env;
pub mod hal;
pub mod ipc;
mod kernel;
pub mod mm;
pub mod sched;
pub mod sync;
pub mod syscall;
pub mod trap;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, IpcConfig, IpcMode, KernelConfig, SenderOrder};
pub use hal::{host::HostHandles, Devices};
pub use kernel::{Cpu, EnvImage, Kernel, KernelState, PageFault, Segment};
pub use trap::{Resume, TrapFrame};
pub use types::CpuId;

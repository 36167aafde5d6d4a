// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Syscall numbers. The number travels in `eax`, arguments in `edx, ecx, ebx, edi, esi`
//! and the result comes back in `eax`.

/// Stable syscall numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Syscall {
    /// Print a user buffer on the console.
    Cputs = 0,
    /// Non-blocking console read.
    Cgetc = 1,
    /// Identifier of the caller.
    GetEnvId = 2,
    /// Destroy the caller or one of its children.
    EnvDestroy = 3,
    /// Give up the CPU.
    Yield = 4,
    /// Create a blank child environment.
    Exofork = 5,
    /// Set a child's status to runnable or not runnable.
    EnvSetStatus = 6,
    /// Allocate a zeroed page.
    PageAlloc = 7,
    /// Share a page between two address spaces.
    PageMap = 8,
    /// Remove a mapping.
    PageUnmap = 9,
    /// Register the page-fault upcall entry.
    EnvSetPgfaultUpcall = 10,
    /// Send a value and optionally a page.
    IpcTrySend = 11,
    /// Receive a value and optionally a page.
    IpcRecv = 12,
}

impl Syscall {
    /// Number of defined syscalls.
    pub const COUNT: usize = 13;

    /// Raw number written to `eax`.
    pub const fn number(self) -> u32 {
        self as u32
    }
}

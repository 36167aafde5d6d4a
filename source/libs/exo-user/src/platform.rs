// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! The seam between user code and whatever runs it (hardware or a simulator).

use exo_abi::env::{EnvId, EnvRecord};
use exo_abi::mmu::{Pde, Pte};
use exo_abi::Syscall;

use crate::pgfault::PgfaultHandler;

/// Per-environment runtime state kept in user memory.
#[derive(Clone, Copy, Default)]
pub struct Runtime {
    /// Cached identifier of the running environment (`thisenv`).
    pub this_env: Option<EnvId>,
    /// Handler invoked by the page-fault upcall.
    pub pgfault_handler: Option<PgfaultHandler>,
}

/// Execution context of one environment.
pub trait Platform {
    /// Traps into the kernel with `num` in `eax` and `args` in `edx, ecx, ebx, edi, esi`.
    fn syscall(&mut self, num: Syscall, args: [u32; 5]) -> i32;

    /// User-mode load. Faults are delivered to the page-fault upcall before this returns.
    fn read(&mut self, va: u32, buf: &mut [u8]);

    /// User-mode store. Faults are delivered to the page-fault upcall before this returns.
    fn write(&mut self, va: u32, data: &[u8]);

    /// Read-only page directory view.
    fn uvpd(&self, pdx: usize) -> Pde;

    /// Read-only page table view, indexed by linear page number.
    fn uvpt(&self, pgnum: usize) -> Pte;

    /// Read-only environment table view.
    fn env(&self, index: usize) -> EnvRecord;

    /// Address of the assembly trampoline registered as the page-fault upcall.
    fn upcall_entry(&self) -> u32;

    /// Runtime state of this environment.
    fn runtime(&mut self) -> &mut Runtime;
}

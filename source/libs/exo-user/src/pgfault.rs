// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! User-level page-fault handling.
//!
//! The kernel pushes a [`UTrapframe`] on the exception stack and enters the upcall
//! trampoline, which calls [`upcall`] and then resumes the faulting context.

use exo_abi::env::EnvId;
use exo_abi::mmu::{Perm, PGSIZE, UXSTACKTOP};
use exo_abi::trap::UTrapframe;
use exo_abi::Result;

use crate::platform::Platform;
use crate::{console, process, sys};

/// A user-level page-fault handler.
pub type PgfaultHandler = fn(&mut dyn Platform, &UTrapframe);

/// Installs `handler`. The first registration maps the exception stack and points the
/// kernel at the upcall trampoline.
pub fn set_pgfault_handler(p: &mut dyn Platform, handler: PgfaultHandler) -> Result<()> {
    if p.runtime().pgfault_handler.is_none() {
        sys::page_alloc(
            p,
            EnvId::SELF,
            UXSTACKTOP - PGSIZE,
            Perm::PRESENT | Perm::USER | Perm::WRITABLE,
        )?;
        let entry = p.upcall_entry();
        sys::env_set_pgfault_upcall(p, EnvId::SELF, entry)?;
    }
    p.runtime().pgfault_handler = Some(handler);
    Ok(())
}

/// Body of the upcall trampoline: dispatches to the registered handler.
pub fn upcall(p: &mut dyn Platform, utf: &UTrapframe) {
    match p.runtime().pgfault_handler {
        Some(handler) => handler(p, utf),
        None => {
            console::print(
                p,
                format_args!("unhandled page fault va {:08x} ip {:08x}\n", utf.fault_va, utf.eip),
            );
            process::exit(p);
        }
    }
}

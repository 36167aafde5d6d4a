// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Copy-on-write fork built from exokernel primitives
//! OWNERS: @runtime
//! PUBLIC API: fork, sfork, Forked, cow_fault
//! DEPENDS_ON: sys (exofork/page_map/page_alloc/env_set_*), pgfault, uvpd/uvpt views
//! INVARIANTS: A writable or COW page is remapped COW in the child before the parent's own
//!             mapping is downgraded; sfork un-COWs a page before sharing it; the exception
//!             stack is never duplicated; the child is made RUNNABLE only after its address
//!             space and upcall are complete

use exo_abi::env::{EnvId, EnvStatus};
use exo_abi::mmu::{
    page_round_down, pdx, pgnum, FaultCode, Perm, NPTENTRIES, PFTEMP, PGSHIFT, PGSIZE, PTSIZE,
    USTACKTOP, UTOP, UXSTACKTOP,
};
use exo_abi::trap::UTrapframe;
use exo_abi::Result;

use crate::pgfault::set_pgfault_handler;
use crate::platform::Platform;
use crate::{console, process, sys};

/// Which side of a fork the caller is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forked {
    /// Returned in the parent with the new child's id.
    Parent(EnvId),
    /// Returned in the child.
    Child,
}

/// How one parent page is duplicated into the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dup {
    /// Map verbatim in the child.
    Share(Perm),
    /// Map COW read-only in the child, then in the parent.
    Cow(Perm),
    /// Map read-only in the child.
    ReadOnly(Perm),
}

pub(crate) fn plan(pte_perm: Perm) -> Dup {
    let perm = pte_perm & Perm::SYSCALL;
    if perm.contains(Perm::SHARED) {
        Dup::Share(perm)
    } else if perm.intersects(Perm::WRITABLE | Perm::COW) {
        Dup::Cow(perm.difference(Perm::WRITABLE) | Perm::COW)
    } else {
        Dup::ReadOnly(perm)
    }
}

fn duppage(p: &mut dyn Platform, child: EnvId, va: u32, dup: Dup) -> Result<()> {
    match dup {
        Dup::Share(perm) | Dup::ReadOnly(perm) => {
            sys::page_map(p, EnvId::SELF, va, child, va, perm)
        }
        Dup::Cow(perm) => {
            sys::page_map(p, EnvId::SELF, va, child, va, perm)?;
            sys::page_map(p, EnvId::SELF, va, EnvId::SELF, va, perm)
        }
    }
}

fn in_stack(va: u32) -> bool {
    (USTACKTOP - PTSIZE..USTACKTOP).contains(&va)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Sharing {
    /// Every page COW (or verbatim when marked SHARED).
    Private,
    /// Every page shared verbatim except the normal stack.
    AllButStack,
}

/// Classic copy-on-write fork.
pub fn fork(p: &mut dyn Platform) -> Result<Forked> {
    fork_with(p, Sharing::Private)
}

/// Shared-memory fork: the child shares every page with the parent except the stack,
/// which is copy-on-write.
pub fn sfork(p: &mut dyn Platform) -> Result<Forked> {
    fork_with(p, Sharing::AllButStack)
}

fn fork_with(p: &mut dyn Platform, sharing: Sharing) -> Result<Forked> {
    set_pgfault_handler(p, cow_fault)?;
    let child = sys::exofork(p)?;
    if child.is_self() {
        let id = sys::getenvid(p);
        let runtime = p.runtime();
        runtime.this_env = Some(id);
        runtime.pgfault_handler = Some(cow_fault);
        return Ok(Forked::Child);
    }
    if let Err(err) = populate(p, child, sharing) {
        let _ = sys::env_destroy(p, child);
        return Err(err);
    }
    Ok(Forked::Parent(child))
}

/// A COW page would stop being shared at the first write, so it is made private first.
fn shareable(p: &mut dyn Platform, va: u32, pte_perm: Perm) -> Result<Dup> {
    let perm = pte_perm & Perm::SYSCALL;
    if perm.contains(Perm::COW) && !perm.contains(Perm::SHARED) {
        copy_private(p, va)?;
        return Ok(Dup::Share(Perm::PRESENT | Perm::USER | Perm::WRITABLE));
    }
    Ok(Dup::Share(perm))
}

fn populate(p: &mut dyn Platform, child: EnvId, sharing: Sharing) -> Result<()> {
    for dir in 0..pdx(UTOP) {
        if !p.uvpd(dir).is_present() {
            continue;
        }
        for slot in 0..NPTENTRIES {
            let page = dir * NPTENTRIES + slot;
            let va = (page as u32) << PGSHIFT;
            if va >= UTOP || va == UXSTACKTOP - PGSIZE {
                continue;
            }
            let pte = p.uvpt(page);
            if !pte.is_present() || !pte.perm().contains(Perm::USER) {
                continue;
            }
            let dup = match sharing {
                Sharing::AllButStack if !in_stack(va) => shareable(p, va, pte.perm())?,
                _ => plan(pte.perm()),
            };
            duppage(p, child, va, dup)?;
        }
    }

    sys::page_alloc(p, child, UXSTACKTOP - PGSIZE, Perm::PRESENT | Perm::USER | Perm::WRITABLE)?;
    let entry = p.upcall_entry();
    sys::env_set_pgfault_upcall(p, child, entry)?;
    sys::env_set_status(p, child, EnvStatus::Runnable)
}

/// Page-fault handler that resolves writes to copy-on-write pages.
///
/// Anything other than a write to a COW page is fatal for the environment.
pub fn cow_fault(p: &mut dyn Platform, utf: &UTrapframe) {
    let va = utf.fault_va;
    let code = FaultCode::from_bits_truncate(utf.err);
    let pte = if p.uvpd(pdx(va)).is_present() { p.uvpt(pgnum(va)) } else { Default::default() };
    if !code.contains(FaultCode::WRITE) || !pte.is_present() || !pte.perm().contains(Perm::COW) {
        let env = process::this_env(p);
        console::print(
            p,
            format_args!(
                "[{}] user fault va {:08x} ip {:08x}: not a copy-on-write write\n",
                env,
                va,
                utf.eip
            ),
        );
        process::exit(p);
        return;
    }
    if let Err(err) = copy_private(p, page_round_down(va)) {
        console::print(p, format_args!("cow fault at {:08x}: {}\n", va, err));
        process::exit(p);
    }
}

fn copy_private(p: &mut dyn Platform, page: u32) -> Result<()> {
    let rw = Perm::PRESENT | Perm::USER | Perm::WRITABLE;
    sys::page_alloc(p, EnvId::SELF, PFTEMP, rw)?;
    let mut buf = [0u8; PGSIZE as usize];
    p.read(page, &mut buf);
    p.write(PFTEMP, &buf);
    sys::page_map(p, EnvId::SELF, PFTEMP, EnvId::SELF, page, rw)?;
    sys::page_unmap(p, EnvId::SELF, PFTEMP)
}

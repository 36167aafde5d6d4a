// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Per-environment two-level address space
//! OWNERS: @kernel-mm-team
//! PUBLIC API: AddressSpace (new/lookup/insert/remove/user_mem_check/check_access/read/write/
//!   pde/pte/destroy)
//! DEPENDS_ON: mm::FramePool, mm::PageTable, exo_abi::mmu
//! INVARIANTS: Directory and table pages are frames owned by the space; every present PTE
//!             holds one frame reference; teardown releases all of them

extern crate alloc;

use alloc::collections::BTreeMap;

use exo_abi::mmu::{
    page_round_down, pdx, ptx, FaultCode, Pde, Perm, Pte, NPTENTRIES, PDXSHIFT, PGSHIFT, PGSIZE,
    ULIM,
};

use super::{Frame, FramePool, MapError, PageTable};

/// Tracks the mappings of a single environment.
pub struct AddressSpace {
    directory: Frame,
    tables: BTreeMap<usize, PageTable>,
}

impl AddressSpace {
    /// Allocates the page directory.
    pub fn new(frames: &mut FramePool) -> Result<Self, MapError> {
        let directory = frames.alloc()?;
        frames.incref(directory);
        Ok(Self { directory, tables: BTreeMap::new() })
    }

    /// Present entry mapping `va`, if any.
    pub fn lookup(&self, va: u32) -> Option<Pte> {
        let pte = self.tables.get(&pdx(va))?.get(ptx(va));
        pte.is_present().then_some(pte)
    }

    /// Maps `frame` at the page containing `va`, replacing any previous mapping.
    ///
    /// The new reference is taken before the old mapping is dropped so re-inserting the
    /// frame already mapped at `va` never frees it.
    pub fn insert(
        &mut self,
        frames: &mut FramePool,
        frame: Frame,
        va: u32,
        perm: Perm,
    ) -> Result<(), MapError> {
        let table = match self.tables.entry(pdx(va)) {
            alloc::collections::btree_map::Entry::Occupied(entry) => entry.into_mut(),
            alloc::collections::btree_map::Entry::Vacant(entry) => {
                let table_frame = frames.alloc()?;
                frames.incref(table_frame);
                entry.insert(PageTable::new(table_frame))
            }
        };
        frames.incref(frame);
        let old = table.replace(ptx(va), Pte::new(frame.addr(), perm | Perm::PRESENT));
        if old.is_present() {
            frames.decref(Frame::from_addr(old.addr()));
        }
        Ok(())
    }

    /// Unmaps the page containing `va`. Returns false if nothing was mapped.
    /// The page table stays allocated until the space is destroyed.
    pub fn remove(&mut self, frames: &mut FramePool, va: u32) -> bool {
        let Some(table) = self.tables.get_mut(&pdx(va)) else {
            return false;
        };
        let old = table.replace(ptx(va), Pte::EMPTY);
        if !old.is_present() {
            return false;
        }
        frames.decref(Frame::from_addr(old.addr()));
        true
    }

    /// Checks that `[va, va+len)` is mapped with at least `perm | PRESENT` and lies below
    /// `ULIM`. On failure returns the first offending address.
    pub fn user_mem_check(&self, va: u32, len: u32, perm: Perm) -> Result<(), u32> {
        let need = perm | Perm::PRESENT;
        let start = page_round_down(va) as u64;
        let end = (va as u64 + len as u64 + PGSIZE as u64 - 1) & !(PGSIZE as u64 - 1);
        let mut addr = start;
        while addr < end {
            let bad = core::cmp::max(addr, va as u64) as u32;
            if addr >= ULIM as u64 {
                return Err(bad);
            }
            match self.lookup(addr as u32) {
                Some(pte) if pte.perm().contains(need) => {}
                _ => return Err(bad),
            }
            addr += PGSIZE as u64;
        }
        Ok(())
    }

    /// MMU check for one user-mode access; returns the fault error code on failure.
    pub fn check_access(&self, va: u32, write: bool) -> Result<Pte, FaultCode> {
        let mut code = FaultCode::USER;
        if write {
            code |= FaultCode::WRITE;
        }
        if va >= ULIM {
            return Err(code | FaultCode::PROTECTION);
        }
        let pte = self.lookup(va).ok_or(code)?;
        let perm = pte.perm();
        if !perm.contains(Perm::USER) || (write && !perm.contains(Perm::WRITABLE)) {
            return Err(code | FaultCode::PROTECTION);
        }
        Ok(pte)
    }

    /// Copies user memory out without permission checks; fails on the first unmapped page.
    pub fn read(&self, frames: &FramePool, va: u32, buf: &mut [u8]) -> Result<(), u32> {
        let mut done = 0usize;
        while done < buf.len() {
            let cur = va.wrapping_add(done as u32);
            let offset = (cur % PGSIZE) as usize;
            let chunk = core::cmp::min(buf.len() - done, PGSIZE as usize - offset);
            let pte = self.lookup(cur).ok_or(cur)?;
            let data = frames.data(Frame::from_addr(pte.addr())).ok_or(cur)?;
            buf[done..done + chunk].copy_from_slice(&data[offset..offset + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Copies into user memory without permission checks; fails on the first unmapped page.
    pub fn write(&self, frames: &mut FramePool, va: u32, src: &[u8]) -> Result<(), u32> {
        let mut done = 0usize;
        while done < src.len() {
            let cur = va.wrapping_add(done as u32);
            let offset = (cur % PGSIZE) as usize;
            let chunk = core::cmp::min(src.len() - done, PGSIZE as usize - offset);
            let pte = self.lookup(cur).ok_or(cur)?;
            let data = frames.data_mut(Frame::from_addr(pte.addr())).ok_or(cur)?;
            data[offset..offset + chunk].copy_from_slice(&src[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// User-visible directory entry for slot `index`.
    pub fn pde(&self, index: usize) -> Pde {
        self.tables.get(&index).map_or(Pde::EMPTY, |table| {
            Pde::new(table.frame().addr(), Perm::PRESENT | Perm::WRITABLE | Perm::USER)
        })
    }

    /// User-visible entry for linear page number `pgnum`.
    pub fn pte(&self, pgnum: usize) -> Pte {
        let va = (pgnum as u32) << PGSHIFT;
        self.tables.get(&pdx(va)).map_or(Pte::EMPTY, |table| table.get(ptx(va)))
    }

    /// All present mappings as `(va, pte)` in address order.
    pub fn mappings(&self) -> impl Iterator<Item = (u32, Pte)> + '_ {
        self.tables.iter().flat_map(|(dir, table)| {
            let base = (*dir as u32) << PDXSHIFT;
            table.present().map(move |(index, pte)| (base | ((index as u32) << PGSHIFT), pte))
        })
    }

    /// Frames consumed by the directory and its tables.
    pub fn overhead_frames(&self) -> usize {
        1 + self.tables.len()
    }

    /// Releases every mapping, table and the directory.
    pub fn destroy(self, frames: &mut FramePool) {
        for (_, table) in self.tables.iter() {
            for (_, pte) in table.present() {
                frames.decref(Frame::from_addr(pte.addr()));
            }
            frames.decref(table.frame());
        }
        frames.decref(self.directory);
    }
}

static_assertions::const_assert_eq!(NPTENTRIES as u32 * PGSIZE, 1 << PDXSHIFT);

// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Second-level page table page and mapping errors.

extern crate alloc;

use alloc::boxed::Box;

use exo_abi::mmu::{Pte, NPTENTRIES};

use super::Frame;

/// Error returned by mapping operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// No physical frame for the page or for an intermediate table.
    NoMem,
    /// Source address has no mapping.
    NotMapped,
    /// Writable mapping requested from a read-only source.
    WriteEscalation,
}

/// One page table page; its backing frame is accounted in the frame pool.
pub struct PageTable {
    frame: Frame,
    entries: Box<[Pte; NPTENTRIES]>,
}

impl PageTable {
    pub fn new(frame: Frame) -> Self {
        Self { frame, entries: Box::new([Pte::EMPTY; NPTENTRIES]) }
    }

    pub fn frame(&self) -> Frame {
        self.frame
    }

    pub fn get(&self, index: usize) -> Pte {
        self.entries[index]
    }

    /// Stores `pte` at `index` and returns the previous entry.
    pub fn replace(&mut self, index: usize, pte: Pte) -> Pte {
        core::mem::replace(&mut self.entries[index], pte)
    }

    pub fn present(&self) -> impl Iterator<Item = (usize, Pte)> + '_ {
        self.entries.iter().copied().enumerate().filter(|(_, pte)| pte.is_present())
    }
}

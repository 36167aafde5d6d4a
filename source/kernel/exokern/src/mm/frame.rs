// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Reference-counted physical frame pool
//! OWNERS: @kernel-mm-team
//! PUBLIC API: Frame, FramePool (alloc/incref/decref/free/refs/data/data_mut)
//! DEPENDS_ON: alloc
//! INVARIANTS: A frame returns to the pool exactly when its last reference is dropped;
//!             freshly allocated frames are zero-filled and carry no references

extern crate alloc;

use alloc::{boxed::Box, vec::Vec};

use exo_abi::mmu::{PGSHIFT, PGSIZE};

use super::MapError;

/// Contents of one physical frame.
pub type FrameData = [u8; PGSIZE as usize];

/// Physical frame number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Frame(u32);

impl Frame {
    pub const fn from_addr(pa: u32) -> Self {
        Self(pa >> PGSHIFT)
    }

    pub const fn number(self) -> u32 {
        self.0
    }

    /// Physical address of the first byte.
    pub const fn addr(self) -> u32 {
        self.0 << PGSHIFT
    }
}

#[derive(Default)]
struct FrameSlot {
    refs: u32,
    data: Option<Box<FrameData>>,
}

/// Fixed-size pool of physical frames.
pub struct FramePool {
    slots: Vec<FrameSlot>,
    free: Vec<u32>,
    fail_after: Option<usize>,
}

impl FramePool {
    pub fn new(pages: usize) -> Self {
        let mut slots = Vec::with_capacity(pages);
        slots.resize_with(pages, FrameSlot::default);
        // Lowest frame number on top of the stack.
        let free = (0..pages as u32).rev().collect();
        Self { slots, free, fail_after: None }
    }

    /// Takes a zero-filled frame with no references.
    pub fn alloc(&mut self) -> Result<Frame, MapError> {
        if let Some(remaining) = self.fail_after.as_mut() {
            if *remaining == 0 {
                self.fail_after = None;
                return Err(MapError::NoMem);
            }
            *remaining -= 1;
        }
        let number = self.free.pop().ok_or(MapError::NoMem)?;
        let slot = &mut self.slots[number as usize];
        slot.refs = 0;
        slot.data = Some(Box::new([0u8; PGSIZE as usize]));
        Ok(Frame(number))
    }

    /// Returns an unreferenced frame to the pool.
    pub fn free(&mut self, frame: Frame) {
        let slot = &mut self.slots[frame.0 as usize];
        if slot.data.is_none() {
            panic!("double free of frame {:#x}", frame.addr());
        }
        if slot.refs != 0 {
            panic!("freeing frame {:#x} with {} references", frame.addr(), slot.refs);
        }
        slot.data = None;
        self.free.push(frame.0);
    }

    pub fn incref(&mut self, frame: Frame) {
        self.slots[frame.0 as usize].refs += 1;
    }

    /// Drops one reference, freeing the frame when none remain.
    pub fn decref(&mut self, frame: Frame) {
        let slot = &mut self.slots[frame.0 as usize];
        slot.refs = slot
            .refs
            .checked_sub(1)
            .unwrap_or_else(|| panic!("reference underflow on frame {:#x}", frame.addr()));
        if slot.refs == 0 {
            self.free(frame);
        }
    }

    pub fn refs(&self, frame: Frame) -> u32 {
        self.slots.get(frame.0 as usize).map_or(0, |slot| slot.refs)
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn data(&self, frame: Frame) -> Option<&FrameData> {
        self.slots.get(frame.0 as usize)?.data.as_deref()
    }

    pub fn data_mut(&mut self, frame: Frame) -> Option<&mut FrameData> {
        self.slots.get_mut(frame.0 as usize)?.data.as_deref_mut()
    }

    /// Lets the next `allocations` succeed, then fails exactly one.
    #[cfg(any(test, feature = "failpoints"))]
    pub fn fail_after(&mut self, allocations: usize) {
        self.fail_after = Some(allocations);
    }
}

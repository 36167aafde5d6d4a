// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Environment table: fixed arena of generation-tagged environment slots
//! OWNERS: @kernel-team
//! PUBLIC API: EnvTable (alloc/resolve/get/get_mut/mark_dying/take_dying/release/record), Env,
//!             Mailbox, Outgoing, EnvError, Check
//! DEPENDS_ON: mm::{AddressSpace, FramePool}, trap::TrapFrame, exo_abi::env
//! INVARIANTS: Every identifier resolves through `resolve`; a stale identifier never reaches
//!             a reused slot; a slot returns to the free list only after its address space
//!             and IPC state are torn down

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt;

use exo_abi::env::{EnvId, EnvRecord, EnvStatus};

use crate::mm::{AddressSpace, FramePool, MapError};
use crate::trap::TrapFrame;

/// Errors reported by environment lookup and allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum EnvError {
    /// Identifier is stale, free, or not controllable by the caller.
    BadEnv,
    /// Every slot is in use.
    NoFreeEnv,
    /// The address space could not be allocated.
    NoMem,
}

impl From<MapError> for EnvError {
    fn from(_: MapError) -> Self {
        Self::NoMem
    }
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Whether `resolve` restricts the target to the caller and its direct children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    SelfOrChild,
    Any,
}

/// Send parked on a blocked sender until a receiver completes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outgoing {
    /// Environment the send is addressed to.
    pub target: EnvId,
    pub value: u32,
    pub src_va: u32,
    pub perm: u32,
}

/// IPC state of one environment.
#[derive(Debug, Default)]
pub struct Mailbox {
    pub recving: bool,
    pub dst_va: u32,
    pub from: EnvId,
    pub value: u32,
    pub perm: u32,
    pub(crate) senders: VecDeque<EnvId>,
    pub(crate) outgoing: Option<Outgoing>,
}

impl Mailbox {
    /// Senders currently parked on this environment.
    pub fn pending(&self) -> impl Iterator<Item = EnvId> + '_ {
        self.senders.iter().copied()
    }
}

pub struct Env {
    pub id: EnvId,
    pub parent_id: EnvId,
    pub status: EnvStatus,
    pub tf: TrapFrame,
    pub pgfault_upcall: u32,
    pub ipc: Mailbox,
    pub runs: u32,
    space: Option<AddressSpace>,
}

impl Env {
    fn vacant() -> Self {
        Self {
            id: EnvId::SELF,
            parent_id: EnvId::SELF,
            status: EnvStatus::Free,
            tf: TrapFrame::default(),
            pgfault_upcall: 0,
            ipc: Mailbox::default(),
            runs: 0,
            space: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.status != EnvStatus::Free
    }

    pub fn space(&self) -> &AddressSpace {
        match self.space.as_ref() {
            Some(space) => space,
            None => panic!("env {} has no address space", self.id),
        }
    }

    pub fn space_mut(&mut self) -> &mut AddressSpace {
        match self.space.as_mut() {
            Some(space) => space,
            None => panic!("env {} has no address space", self.id),
        }
    }
}

/// State handed back by [`EnvTable::release`] for IPC cleanup.
pub struct Released {
    pub id: EnvId,
    /// Senders that were parked on the released environment.
    pub stranded: VecDeque<EnvId>,
}

/// Fixed-capacity environment arena.
pub struct EnvTable {
    slots: Vec<Env>,
    free: VecDeque<usize>,
    dying: Vec<EnvId>,
}

impl EnvTable {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Env::vacant);
        Self { slots, free: (0..capacity).collect(), dying: Vec::new() }
    }

    /// Allocates a slot for a child of `parent` with a fresh identifier.
    ///
    /// The new environment is RUNNABLE with a zeroed user frame and an empty address space.
    pub fn alloc(&mut self, frames: &mut FramePool, parent: EnvId) -> Result<EnvId, EnvError> {
        let index = *self.free.front().ok_or(EnvError::NoFreeEnv)?;
        let space = AddressSpace::new(frames)?;
        self.free.pop_front();

        let slot = &mut self.slots[index];
        let id = EnvId::next_generation(slot.id, index);
        *slot = Env {
            id,
            parent_id: parent,
            status: EnvStatus::Runnable,
            tf: TrapFrame::user_entry(0),
            pgfault_upcall: 0,
            ipc: Mailbox::default(),
            runs: 0,
            space: Some(space),
        };
        Ok(id)
    }

    /// Resolves `id` on behalf of `caller`; identifier 0 means the caller itself.
    pub fn resolve(&self, id: EnvId, caller: EnvId, check: Check) -> Result<EnvId, EnvError> {
        if id.is_self() {
            return Ok(caller);
        }
        let env = self.slots.get(id.index()).ok_or(EnvError::BadEnv)?;
        if !env.is_live() || env.id != id {
            return Err(EnvError::BadEnv);
        }
        if check == Check::SelfOrChild && env.id != caller && env.parent_id != caller {
            return Err(EnvError::BadEnv);
        }
        Ok(env.id)
    }

    /// Live environment with exactly this identifier.
    pub fn get(&self, id: EnvId) -> Option<&Env> {
        self.slots.get(id.index()).filter(|env| env.is_live() && env.id == id)
    }

    pub fn get_mut(&mut self, id: EnvId) -> Option<&mut Env> {
        self.slots.get_mut(id.index()).filter(|env| env.is_live() && env.id == id)
    }

    pub fn slot(&self, index: usize) -> Option<&Env> {
        self.slots.get(index)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn iter_live(&self) -> impl Iterator<Item = &Env> + '_ {
        self.slots.iter().filter(|env| env.is_live())
    }

    pub(crate) fn iter_live_mut(&mut self) -> impl Iterator<Item = &mut Env> + '_ {
        self.slots.iter_mut().filter(|env| env.is_live())
    }

    /// Marks `id` DYING; it is reclaimed at the next safe point.
    pub fn mark_dying(&mut self, id: EnvId) {
        if let Some(env) = self.get_mut(id) {
            if env.status != EnvStatus::Dying {
                env.status = EnvStatus::Dying;
                self.dying.push(id);
            }
        }
    }

    pub fn take_dying(&mut self) -> Vec<EnvId> {
        core::mem::take(&mut self.dying)
    }

    /// Puts back identifiers that could not be reclaimed yet.
    pub fn defer_dying(&mut self, ids: impl IntoIterator<Item = EnvId>) {
        self.dying.extend(ids);
    }

    /// Tears down the address space of `id` and returns its slot to the free list.
    pub fn release(&mut self, frames: &mut FramePool, id: EnvId) -> Option<Released> {
        let index = id.index();
        let env = self.get_mut(id)?;
        if let Some(space) = env.space.take() {
            space.destroy(frames);
        }
        let stranded = core::mem::take(&mut env.ipc.senders);
        env.ipc = Mailbox::default();
        env.status = EnvStatus::Free;
        env.pgfault_upcall = 0;
        env.tf = TrapFrame::default();
        self.dying.retain(|dying| *dying != id);
        self.free.push_front(index);
        Some(Released { id, stranded })
    }

    /// Read-only view of slot `index` as user space sees it.
    pub fn record(&self, index: usize) -> EnvRecord {
        let Some(env) = self.slots.get(index) else {
            return EnvRecord::default();
        };
        EnvRecord {
            id: env.id,
            parent_id: env.parent_id,
            status: env.status,
            pgfault_upcall: env.pgfault_upcall,
            ipc_recving: env.ipc.recving,
            ipc_dstva: env.ipc.dst_va,
            ipc_value: env.ipc.value,
            ipc_from: env.ipc.from,
            ipc_perm: env.ipc.perm,
            runs: env.runs,
        }
    }
}

// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Environment identifiers, status values and the read-only environment record.

use core::fmt;

/// log2 of the environment table capacity.
pub const LOG2NENV: u32 = 10;
/// Environment table capacity.
pub const NENV: usize = 1 << LOG2NENV;
/// Shift applied to the generation counter inside an [`EnvId`].
pub const ENVGENSHIFT: u32 = 12;

/// Generation-tagged environment identifier.
///
/// The low [`LOG2NENV`] bits select the table slot; the remaining bits are a generation
/// counter advanced every time the slot is reused, so a stale identifier never resolves
/// to a newer occupant. Identifier `0` is reserved to mean "the caller".
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct EnvId(i32);

impl EnvId {
    /// Reserved identifier meaning "the calling environment".
    pub const SELF: EnvId = EnvId(0);

    /// Wraps a raw identifier.
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    pub const fn as_raw(self) -> i32 {
        self.0
    }

    /// Table slot encoded in the identifier.
    pub const fn index(self) -> usize {
        (self.0 as u32 as usize) & (NENV - 1)
    }

    /// Returns true for the reserved "caller" identifier.
    pub const fn is_self(self) -> bool {
        self.0 == 0
    }

    /// Computes the identifier for the next occupant of `index` after `previous`.
    ///
    /// Generations stay positive; on overflow they restart at the first generation.
    pub const fn next_generation(previous: EnvId, index: usize) -> EnvId {
        let mut generation =
            previous.0.wrapping_add(1 << ENVGENSHIFT) & !((NENV as i32) - 1);
        if generation <= 0 {
            generation = 1 << ENVGENSHIFT;
        }
        EnvId(generation | index as i32)
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Lifecycle state of an environment slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum EnvStatus {
    /// Slot unused.
    #[default]
    Free = 0,
    /// Destroyed; awaiting reclamation.
    Dying = 1,
    /// Eligible for scheduling.
    Runnable = 2,
    /// Currently executing on a CPU.
    Running = 3,
    /// Parked (blocked on IPC or freshly forked).
    NotRunnable = 4,
}

impl EnvStatus {
    /// Decodes a raw status word.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Free,
            1 => Self::Dying,
            2 => Self::Runnable,
            3 => Self::Running,
            4 => Self::NotRunnable,
            _ => return None,
        })
    }
}

/// Read-only view of one environment table slot as mapped at `UENVS`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnvRecord {
    /// Current identifier of the slot.
    pub id: EnvId,
    /// Identifier of the creating environment (0 for boot-created environments).
    pub parent_id: EnvId,
    /// Lifecycle state.
    pub status: EnvStatus,
    /// Registered page-fault upcall entry, 0 when none.
    pub pgfault_upcall: u32,
    /// True while blocked in `ipc_recv`.
    pub ipc_recving: bool,
    /// Destination address requested by the last receive.
    pub ipc_dstva: u32,
    /// Value delivered by the last completed receive.
    pub ipc_value: u32,
    /// Sender of the last completed receive.
    pub ipc_from: EnvId,
    /// Permission of the page delivered by the last receive, 0 when none.
    pub ipc_perm: u32,
    /// Number of times the environment has been dispatched.
    pub runs: u32,
}

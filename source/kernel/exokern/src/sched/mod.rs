// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Round-robin environment selection
//! OWNERS: @kernel-sched-team
//! PUBLIC API: Scheduler (new/pick), Decision
//! DEPENDS_ON: env::EnvTable
//! INVARIANTS: Only RUNNABLE environments are selected (never DYING); the environment
//!             current on this CPU keeps the CPU only when nothing else is runnable

use exo_abi::env::{EnvId, EnvStatus};

use crate::env::EnvTable;

/// Outcome of one scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a scheduling decision must be acted on"]
pub enum Decision {
    Run(EnvId),
    /// Nothing runnable on this CPU.
    Halt,
}

pub struct Scheduler {
    halts: u64,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self { halts: 0 }
    }

    /// Picks the next RUNNABLE slot after `current`, wrapping around the table.
    pub fn pick(&mut self, envs: &EnvTable, current: Option<EnvId>) -> Decision {
        let capacity = envs.capacity();
        let start = current.map_or(0, |id| id.index() + 1);
        for step in 0..capacity {
            let index = (start + step) % capacity;
            if let Some(env) = envs.slot(index) {
                if env.status == EnvStatus::Runnable {
                    return Decision::Run(env.id);
                }
            }
        }
        if let Some(id) = current {
            if envs.get(id).map(|env| env.status) == Some(EnvStatus::Running) {
                return Decision::Run(id);
            }
        }
        self.halts += 1;
        Decision::Halt
    }

    /// Times a CPU found nothing to run.
    pub fn halts(&self) -> u64 {
        self.halts
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

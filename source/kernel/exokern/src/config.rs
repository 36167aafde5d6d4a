// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Boot-time kernel configuration
//! OWNERS: @kernel-team
//! PUBLIC API: KernelConfig, IpcConfig, IpcMode, SenderOrder, ConfigError
//! INVARIANTS: max_envs <= NENV; at least one CPU and one physical page

use core::fmt;

use exo_abi::env::NENV;

/// What `ipc_try_send` does when the target is not receiving.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpcMode {
    /// Park the sender on the target's pending queue until a receive completes it.
    Queued,
    /// Fail immediately with `IPC_NOT_RECV`; user space retries.
    Unqueued,
}

/// Service order of pending senders.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SenderOrder {
    Fifo,
    /// Newest sender first.
    Lifo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IpcConfig {
    pub mode: IpcMode,
    pub order: SenderOrder,
    /// Pending senders per receiver; a full queue reports `IPC_NOT_RECV`.
    pub queue_depth: usize,
}

impl IpcConfig {
    pub const DEFAULT: IpcConfig =
        IpcConfig { mode: IpcMode::Queued, order: SenderOrder::Fifo, queue_depth: NENV };
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Kernel configuration consumed by [`crate::Kernel::new`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelConfig {
    /// Environment slots in use (at most `NENV`).
    pub max_envs: usize,
    /// Physical frames managed by the frame pool.
    pub phys_pages: usize,
    /// CPUs sharing the dispatch lock.
    pub ncpu: usize,
    pub ipc: IpcConfig,
}

impl KernelConfig {
    pub const DEFAULT: KernelConfig =
        KernelConfig { max_envs: NENV, phys_pages: 4096, ncpu: 1, ipc: IpcConfig::DEFAULT };

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_envs == 0 || self.max_envs > NENV {
            return Err(ConfigError::EnvSlots(self.max_envs));
        }
        if self.ncpu == 0 || self.ncpu > u16::MAX as usize {
            return Err(ConfigError::Cpus(self.ncpu));
        }
        if self.phys_pages == 0 || self.phys_pages > (1 << 20) {
            return Err(ConfigError::PhysPages(self.phys_pages));
        }
        if self.ipc.queue_depth == 0 {
            return Err(ConfigError::QueueDepth);
        }
        Ok(())
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum ConfigError {
    EnvSlots(usize),
    Cpus(usize),
    PhysPages(usize),
    QueueDepth,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnvSlots(n) => write!(f, "max_envs {} outside 1..={}", n, NENV),
            Self::Cpus(n) => write!(f, "ncpu {} unsupported", n),
            Self::PhysPages(n) => write!(f, "phys_pages {} unsupported", n),
            Self::QueueDepth => f.write_str("ipc queue depth must be non-zero"),
        }
    }
}

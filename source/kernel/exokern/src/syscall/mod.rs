// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall dispatcher and error handling
//! OWNERS: @kernel-team
//! PUBLIC API: SyscallTable, Args, Error, Handler, SysResult, encode_result
//! DEPENDS_ON: env, ipc, mm, syscall::api
//! INVARIANTS: Stable numbers (exo_abi::Syscall); decode/check/execute discipline;
//!             unknown numbers report INVAL

pub mod api;

use core::fmt;

use exo_abi::Syscall;

use crate::{env::EnvError, ipc::IpcError, mm::MapError};

/// Result type used by syscall handlers.
pub type SysResult<T> = Result<T, Error>;

/// Syscall arguments passed in `edx, ecx, ebx, edi, esi`.
#[derive(Default, Clone, Copy)]
pub struct Args {
    regs: [u32; 5],
}

impl Args {
    pub const fn new(regs: [u32; 5]) -> Self {
        Self { regs }
    }

    /// Returns the raw register at `index`.
    pub fn get(&self, index: usize) -> u32 {
        self.regs[index]
    }
}

/// Error returned by the dispatcher and handler stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Syscall number not present in the dispatch table.
    InvalidSyscall,
    /// Misaligned or out-of-range address, or malformed permission/status.
    InvalidArgs,
    /// Environment lookup or allocation failed.
    Env(EnvError),
    /// Mapping operation failed.
    Map(MapError),
    /// IPC rendezvous failed.
    Ipc(IpcError),
    /// The caller handed the kernel an inaccessible buffer and was destroyed.
    Fault,
    /// The caller is parked NOT_RUNNABLE; its return register is written by whoever
    /// completes the rendezvous, not by the router.
    Blocked,
}

impl Error {
    /// Stable code reported to user space.
    pub fn abi(self) -> exo_abi::Error {
        use exo_abi::Error as Abi;
        match self {
            Self::InvalidSyscall | Self::InvalidArgs => Abi::Inval,
            Self::Env(EnvError::BadEnv) => Abi::BadEnv,
            Self::Env(EnvError::NoFreeEnv) => Abi::NoFreeEnv,
            Self::Env(EnvError::NoMem) => Abi::NoMem,
            Self::Map(MapError::NoMem) => Abi::NoMem,
            Self::Map(MapError::NotMapped | MapError::WriteEscalation) => Abi::Inval,
            Self::Ipc(err) => err.abi(),
            Self::Fault => Abi::Fault,
            Self::Blocked => Abi::Unspecified,
        }
    }
}

impl From<EnvError> for Error {
    fn from(value: EnvError) -> Self {
        Self::Env(value)
    }
}

impl From<MapError> for Error {
    fn from(value: MapError) -> Self {
        Self::Map(value)
    }
}

impl From<IpcError> for Error {
    fn from(value: IpcError) -> Self {
        Self::Ipc(value)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Value written to `eax` for a finished syscall.
pub fn encode_result(result: SysResult<u32>) -> u32 {
    match result {
        Ok(value) => value,
        Err(err) => err.abi().code() as u32,
    }
}

/// Type alias for a syscall handler.
pub type Handler = fn(&mut api::Context<'_>, &Args) -> SysResult<u32>;

/// Dispatch table storing handlers by syscall number.
#[derive(Clone)]
pub struct SyscallTable {
    handlers: [Option<Handler>; Syscall::COUNT],
}

impl SyscallTable {
    /// Creates an empty dispatch table.
    pub const fn new() -> Self {
        const NONE: Option<Handler> = None;
        Self { handlers: [NONE; Syscall::COUNT] }
    }

    /// Registers a handler.
    pub fn register(&mut self, number: Syscall, handler: Handler) {
        self.handlers[number.number() as usize] = Some(handler);
    }

    /// Executes the handler referenced by `number`.
    #[must_use]
    pub fn dispatch(
        &self,
        number: usize,
        ctx: &mut api::Context<'_>,
        args: &Args,
    ) -> SysResult<u32> {
        self.handlers
            .get(number)
            .and_then(|entry| *entry)
            .ok_or(Error::InvalidSyscall)
            .and_then(|handler| handler(ctx, args))
    }
}

impl Default for SyscallTable {
    fn default() -> Self {
        let mut table = Self::new();
        api::install_handlers(&mut table);
        table
    }
}

// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Thin syscall stubs; negative returns decode into [`exo_abi::Error`].

use exo_abi::env::{EnvId, EnvStatus};
use exo_abi::mmu::Perm;
use exo_abi::{Error, Result, Syscall};

use crate::platform::Platform;

fn call(p: &mut dyn Platform, num: Syscall, args: [u32; 5]) -> Result<u32> {
    Error::decode(p.syscall(num, args))
}

fn env_arg(id: EnvId) -> u32 {
    id.as_raw() as u32
}

/// Prints `len` bytes at user address `va` on the console.
pub fn cputs(p: &mut dyn Platform, va: u32, len: u32) -> Result<()> {
    call(p, Syscall::Cputs, [va, len, 0, 0, 0]).map(drop)
}

/// Non-blocking console read; `None` when no input is pending.
pub fn cgetc(p: &mut dyn Platform) -> Result<Option<u8>> {
    let c = call(p, Syscall::Cgetc, [0; 5])?;
    Ok((c != 0).then_some(c as u8))
}

/// Identifier of the calling environment.
pub fn getenvid(p: &mut dyn Platform) -> EnvId {
    EnvId::from_raw(p.syscall(Syscall::GetEnvId, [0; 5]))
}

/// Destroys `id` (or the caller for [`EnvId::SELF`]).
pub fn env_destroy(p: &mut dyn Platform, id: EnvId) -> Result<()> {
    call(p, Syscall::EnvDestroy, [env_arg(id), 0, 0, 0, 0]).map(drop)
}

/// Gives up the CPU.
pub fn yield_(p: &mut dyn Platform) {
    p.syscall(Syscall::Yield, [0; 5]);
}

/// Creates a blank child; returns its id in the parent and [`EnvId::SELF`] in the child.
pub fn exofork(p: &mut dyn Platform) -> Result<EnvId> {
    call(p, Syscall::Exofork, [0; 5]).map(|raw| EnvId::from_raw(raw as i32))
}

/// Sets `id` RUNNABLE or NOT_RUNNABLE.
pub fn env_set_status(p: &mut dyn Platform, id: EnvId, status: EnvStatus) -> Result<()> {
    call(p, Syscall::EnvSetStatus, [env_arg(id), status as u32, 0, 0, 0]).map(drop)
}

/// Maps a fresh zeroed page at `va` in `id`.
pub fn page_alloc(p: &mut dyn Platform, id: EnvId, va: u32, perm: Perm) -> Result<()> {
    call(p, Syscall::PageAlloc, [env_arg(id), va, perm.bits(), 0, 0]).map(drop)
}

/// Maps the page at `src_va` in `src` at `dst_va` in `dst`.
pub fn page_map(
    p: &mut dyn Platform,
    src: EnvId,
    src_va: u32,
    dst: EnvId,
    dst_va: u32,
    perm: Perm,
) -> Result<()> {
    call(p, Syscall::PageMap, [env_arg(src), src_va, env_arg(dst), dst_va, perm.bits()]).map(drop)
}

/// Unmaps the page at `va` in `id`; unmapping nothing succeeds.
pub fn page_unmap(p: &mut dyn Platform, id: EnvId, va: u32) -> Result<()> {
    call(p, Syscall::PageUnmap, [env_arg(id), va, 0, 0, 0]).map(drop)
}

/// Registers the page-fault entry point of `id`.
pub fn env_set_pgfault_upcall(p: &mut dyn Platform, id: EnvId, upcall: u32) -> Result<()> {
    call(p, Syscall::EnvSetPgfaultUpcall, [env_arg(id), upcall, 0, 0, 0]).map(drop)
}

/// One send attempt; `src_va >= UTOP` sends no page.
pub fn ipc_try_send(
    p: &mut dyn Platform,
    to: EnvId,
    value: u32,
    src_va: u32,
    perm: Perm,
) -> Result<()> {
    call(p, Syscall::IpcTrySend, [env_arg(to), value, src_va, perm.bits(), 0]).map(drop)
}

/// Blocks until a message arrives; `dst_va >= UTOP` accepts no page.
pub fn ipc_recv(p: &mut dyn Platform, dst_va: u32) -> Result<()> {
    call(p, Syscall::IpcRecv, [dst_va, 0, 0, 0, 0]).map(drop)
}

// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall handlers exposed to the dispatcher
//! OWNERS: @kernel-team
//! PUBLIC API: install_handlers(table), Context
//! DEPENDS_ON: env::EnvTable, mm::{FramePool, AddressSpace}, ipc, hal::Devices
//! INVARIANTS: Decode→Check→Execute; every argument is validated before any state changes;
//!             no mapping gains WRITABLE through a copy; a failed page_alloc leaks nothing

use exo_abi::env::{EnvId, EnvStatus};
use exo_abi::mmu::Perm;
use exo_abi::Syscall;

use super::{Args, Error, SysResult, SyscallTable};
use crate::config::IpcConfig;
use crate::env::{Check, EnvError, EnvTable, Outgoing};
use crate::hal::Devices;
use crate::ipc::{self, Delivery};
use crate::mm::{resolve_share, FramePool};
use crate::types::{PageTarget, UserPage};

/// State a handler may touch during one kernel visit.
pub struct Context<'a> {
    pub caller: EnvId,
    pub envs: &'a mut EnvTable,
    pub frames: &'a mut FramePool,
    pub devices: &'a mut Devices,
    pub ipc: IpcConfig,
}

impl<'a> Context<'a> {
    pub fn new(
        caller: EnvId,
        envs: &'a mut EnvTable,
        frames: &'a mut FramePool,
        devices: &'a mut Devices,
        ipc: IpcConfig,
    ) -> Self {
        Self { caller, envs, frames, devices, ipc }
    }

    fn resolve(&self, raw: u32, check: Check) -> Result<EnvId, Error> {
        Ok(self.envs.resolve(EnvId::from_raw(raw as i32), self.caller, check)?)
    }
}

// Typed decoders for Decode→Check→Execute

#[derive(Copy, Clone)]
struct PageAllocArgs {
    env: u32,
    va: UserPage,
    perm: Perm,
}

impl PageAllocArgs {
    #[inline]
    fn decode(args: &Args) -> Result<Self, Error> {
        Ok(Self {
            env: args.get(0),
            va: UserPage::new(args.get(1)).ok_or(Error::InvalidArgs)?,
            perm: Perm::from_syscall(args.get(2)).ok_or(Error::InvalidArgs)?,
        })
    }
}

#[derive(Copy, Clone)]
struct PageMapArgs {
    src_env: u32,
    src_va: UserPage,
    dst_env: u32,
    dst_va: UserPage,
    perm: Perm,
}

impl PageMapArgs {
    #[inline]
    fn decode(args: &Args) -> Result<Self, Error> {
        Ok(Self {
            src_env: args.get(0),
            src_va: UserPage::new(args.get(1)).ok_or(Error::InvalidArgs)?,
            dst_env: args.get(2),
            dst_va: UserPage::new(args.get(3)).ok_or(Error::InvalidArgs)?,
            perm: Perm::from_syscall(args.get(4)).ok_or(Error::InvalidArgs)?,
        })
    }
}

#[derive(Copy, Clone)]
struct SetStatusArgs {
    env: u32,
    status: EnvStatus,
}

impl SetStatusArgs {
    #[inline]
    fn decode(args: &Args) -> Result<Self, Error> {
        let status = EnvStatus::from_raw(args.get(1)).ok_or(Error::InvalidArgs)?;
        Ok(Self { env: args.get(0), status })
    }

    #[inline]
    fn check(&self) -> Result<(), Error> {
        match self.status {
            EnvStatus::Runnable | EnvStatus::NotRunnable => Ok(()),
            _ => Err(Error::InvalidArgs),
        }
    }
}

/// Registers the default set of syscall handlers.
pub fn install_handlers(table: &mut SyscallTable) {
    table.register(Syscall::Cputs, sys_cputs);
    table.register(Syscall::Cgetc, sys_cgetc);
    table.register(Syscall::GetEnvId, sys_getenvid);
    table.register(Syscall::EnvDestroy, sys_env_destroy);
    table.register(Syscall::Yield, sys_yield);
    table.register(Syscall::Exofork, sys_exofork);
    table.register(Syscall::EnvSetStatus, sys_env_set_status);
    table.register(Syscall::PageAlloc, sys_page_alloc);
    table.register(Syscall::PageMap, sys_page_map);
    table.register(Syscall::PageUnmap, sys_page_unmap);
    table.register(Syscall::EnvSetPgfaultUpcall, sys_env_set_pgfault_upcall);
    table.register(Syscall::IpcTrySend, sys_ipc_try_send);
    table.register(Syscall::IpcRecv, sys_ipc_recv);
}

const CPUTS_CHUNK: usize = 256;

fn sys_cputs(ctx: &mut Context<'_>, args: &Args) -> SysResult<u32> {
    let (va, len) = (args.get(0), args.get(1));
    let env = ctx.envs.get(ctx.caller).ok_or(Error::Fault)?;
    if let Err(bad) = env.space().user_mem_check(va, len, Perm::USER) {
        crate::log_warn!(
            target: "syscall",
            "[{}] user_mem_check assertion failure for va {:08x}",
            ctx.caller,
            bad
        );
        ctx.envs.mark_dying(ctx.caller);
        return Err(Error::Fault);
    }
    let mut buf = [0u8; CPUTS_CHUNK];
    let mut done = 0u32;
    while done < len {
        let chunk = core::cmp::min((len - done) as usize, CPUTS_CHUNK);
        if env.space().read(ctx.frames, va + done, &mut buf[..chunk]).is_err() {
            return Err(Error::Fault);
        }
        for byte in &buf[..chunk] {
            ctx.devices.console.putc(*byte);
        }
        done += chunk as u32;
    }
    Ok(0)
}

fn sys_cgetc(ctx: &mut Context<'_>, _args: &Args) -> SysResult<u32> {
    Ok(ctx.devices.console.getc().map_or(0, u32::from))
}

fn sys_getenvid(ctx: &mut Context<'_>, _args: &Args) -> SysResult<u32> {
    Ok(ctx.caller.as_raw() as u32)
}

fn sys_env_destroy(ctx: &mut Context<'_>, args: &Args) -> SysResult<u32> {
    let target = ctx.resolve(args.get(0), Check::SelfOrChild)?;
    if target == ctx.caller {
        crate::log_info!(target: "env", "[{}] exiting gracefully", ctx.caller);
    } else {
        crate::log_info!(target: "env", "[{}] destroying {}", ctx.caller, target);
    }
    ctx.envs.mark_dying(target);
    Ok(0)
}

fn sys_yield(ctx: &mut Context<'_>, _args: &Args) -> SysResult<u32> {
    if let Some(env) = ctx.envs.get_mut(ctx.caller) {
        if env.status == EnvStatus::Running {
            env.status = EnvStatus::Runnable;
        }
    }
    Ok(0)
}

fn sys_exofork(ctx: &mut Context<'_>, _args: &Args) -> SysResult<u32> {
    let parent_tf = ctx.envs.get(ctx.caller).map(|env| env.tf).ok_or(Error::Fault)?;
    let child = ctx.envs.alloc(ctx.frames, ctx.caller)?;
    if let Some(env) = ctx.envs.get_mut(child) {
        env.tf = parent_tf;
        env.tf.regs.eax = 0;
        env.status = EnvStatus::NotRunnable;
    }
    crate::log_debug!(target: "env", "[{}] exofork -> {}", ctx.caller, child);
    Ok(child.as_raw() as u32)
}

fn sys_env_set_status(ctx: &mut Context<'_>, args: &Args) -> SysResult<u32> {
    let typed = SetStatusArgs::decode(args)?;
    typed.check()?;
    let target = ctx.resolve(typed.env, Check::SelfOrChild)?;
    let env = ctx.envs.get(target).ok_or(Error::Env(EnvError::BadEnv))?;
    if env.status == EnvStatus::Dying {
        return Err(Error::Env(EnvError::BadEnv));
    }
    if typed.status == EnvStatus::Runnable {
        ipc::cancel(ctx.envs, target);
    }
    if let Some(env) = ctx.envs.get_mut(target) {
        env.status = typed.status;
    }
    Ok(0)
}

fn sys_page_alloc(ctx: &mut Context<'_>, args: &Args) -> SysResult<u32> {
    let typed = PageAllocArgs::decode(args)?;
    let target = ctx.resolve(typed.env, Check::SelfOrChild)?;
    let frame = ctx.frames.alloc()?;
    let Some(env) = ctx.envs.get_mut(target) else {
        ctx.frames.free(frame);
        return Err(Error::Env(EnvError::BadEnv));
    };
    if let Err(err) = env.space_mut().insert(ctx.frames, frame, typed.va.raw(), typed.perm) {
        ctx.frames.free(frame);
        return Err(err.into());
    }
    Ok(0)
}

fn sys_page_map(ctx: &mut Context<'_>, args: &Args) -> SysResult<u32> {
    let typed = PageMapArgs::decode(args)?;
    let src = ctx.resolve(typed.src_env, Check::SelfOrChild)?;
    let dst = ctx.resolve(typed.dst_env, Check::SelfOrChild)?;
    let source = ctx.envs.get(src).and_then(|env| env.space().lookup(typed.src_va.raw()));
    let frame = resolve_share(source, typed.perm)?;
    let env = ctx.envs.get_mut(dst).ok_or(Error::Env(EnvError::BadEnv))?;
    env.space_mut().insert(ctx.frames, frame, typed.dst_va.raw(), typed.perm)?;
    Ok(0)
}

fn sys_page_unmap(ctx: &mut Context<'_>, args: &Args) -> SysResult<u32> {
    let va = UserPage::new(args.get(1)).ok_or(Error::InvalidArgs)?;
    let target = ctx.resolve(args.get(0), Check::SelfOrChild)?;
    if let Some(env) = ctx.envs.get_mut(target) {
        env.space_mut().remove(ctx.frames, va.raw());
    }
    Ok(0)
}

fn sys_env_set_pgfault_upcall(ctx: &mut Context<'_>, args: &Args) -> SysResult<u32> {
    let target = ctx.resolve(args.get(0), Check::SelfOrChild)?;
    if let Some(env) = ctx.envs.get_mut(target) {
        env.pgfault_upcall = args.get(1);
    }
    Ok(0)
}

fn sys_ipc_try_send(ctx: &mut Context<'_>, args: &Args) -> SysResult<u32> {
    let target = ctx.resolve(args.get(0), Check::Any)?;
    let msg = Outgoing { target, value: args.get(1), src_va: args.get(2), perm: args.get(3) };
    match ipc::send(ctx.envs, ctx.frames, ctx.ipc, ctx.caller, target, msg)? {
        Delivery::Delivered => Ok(0),
        Delivery::Parked => Err(Error::Blocked),
    }
}

fn sys_ipc_recv(ctx: &mut Context<'_>, args: &Args) -> SysResult<u32> {
    let dst = PageTarget::decode(args.get(0)).ok_or(Error::InvalidArgs)?;
    match ipc::recv(ctx.envs, ctx.frames, ctx.ipc, ctx.caller, dst)? {
        Delivery::Delivered => Ok(0),
        Delivery::Parked => Err(Error::Blocked),
    }
}

// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Blocking rendezvous IPC with optional page transfer
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: send, recv, cancel, on_release, IpcError, Delivery
//! DEPENDS_ON: env::EnvTable, mm::{FramePool, resolve_share}, config::IpcConfig
//! INVARIANTS: `recving` is set only while NOT_RUNNABLE and cleared by exactly one transfer;
//!             a page moves only when both sides name an address below UTOP, and it is
//!             re-validated exactly like page_map; a parked sender carries its message on its
//!             own environment until a receiver completes it
//!
//! Completion is explicit: the environment that finishes a rendezvous writes the result
//! into the parked party's saved return register and makes it RUNNABLE.

pub mod trace;

use core::fmt;

use exo_abi::env::{EnvId, EnvStatus};
use exo_abi::mmu::{Perm, UTOP};

use crate::config::{IpcConfig, IpcMode, SenderOrder};
use crate::env::{EnvTable, Outgoing, Released};
use crate::mm::{resolve_share, FramePool, MapError};
use crate::syscall;
use crate::types::{PageTarget, UserPage};

use trace::Event;

/// Errors returned by IPC operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum IpcError {
    /// Target is not receiving and the send may not park.
    NotReceiving,
    /// Target's pending-sender queue is full.
    QueueFull,
    /// Source page missing, misaligned, or requested with invalid/escalated permissions.
    InvalidPage,
    /// No frame for the receiver's page table.
    NoMem,
    /// Target was destroyed.
    TargetGone,
    /// A blocked receive was cut short by the parent making the receiver runnable.
    Interrupted,
}

impl IpcError {
    pub fn abi(self) -> exo_abi::Error {
        match self {
            Self::NotReceiving | Self::QueueFull => exo_abi::Error::IpcNotRecv,
            Self::InvalidPage => exo_abi::Error::Inval,
            Self::NoMem => exo_abi::Error::NoMem,
            Self::TargetGone => exo_abi::Error::BadEnv,
            Self::Interrupted => exo_abi::Error::Unspecified,
        }
    }
}

impl From<MapError> for IpcError {
    fn from(value: MapError) -> Self {
        match value {
            MapError::NoMem => Self::NoMem,
            MapError::NotMapped | MapError::WriteEscalation => Self::InvalidPage,
        }
    }
}

impl fmt::Display for IpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// How a send or receive left the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Transfer completed; the caller keeps running.
    Delivered,
    /// Caller is NOT_RUNNABLE until the other side completes the rendezvous.
    Parked,
}

/// Sends `msg` from `sender` to `target`.
pub fn send(
    envs: &mut EnvTable,
    frames: &mut FramePool,
    config: IpcConfig,
    sender: EnvId,
    target: EnvId,
    msg: Outgoing,
) -> Result<Delivery, IpcError> {
    let dest = envs.get(target).ok_or(IpcError::TargetGone)?;
    if dest.status == EnvStatus::Dying {
        return Err(IpcError::TargetGone);
    }
    if dest.ipc.recving {
        transfer(envs, frames, sender, target, msg)?;
        return Ok(Delivery::Delivered);
    }
    if config.mode == IpcMode::Unqueued {
        return Err(IpcError::NotReceiving);
    }
    if dest.ipc.senders.len() >= config.queue_depth {
        return Err(IpcError::QueueFull);
    }

    if let Some(dest) = envs.get_mut(target) {
        dest.ipc.senders.push_back(sender);
    }
    if let Some(src) = envs.get_mut(sender) {
        src.ipc.outgoing = Some(msg);
        src.status = EnvStatus::NotRunnable;
    }
    trace::record(Event::Parked { sender, target });
    crate::log_trace!(target: "ipc", "[{}] parked on {}", sender, target);
    Ok(Delivery::Parked)
}

/// Receives into `dst` on behalf of `receiver`, completing a parked send if one exists.
pub fn recv(
    envs: &mut EnvTable,
    frames: &mut FramePool,
    config: IpcConfig,
    receiver: EnvId,
    dst: PageTarget,
) -> Result<Delivery, IpcError> {
    let Some(rx) = envs.get_mut(receiver) else {
        return Err(IpcError::TargetGone);
    };
    rx.ipc.dst_va = dst.raw();

    loop {
        let Some(rx) = envs.get_mut(receiver) else {
            return Err(IpcError::TargetGone);
        };
        let next = match config.order {
            SenderOrder::Fifo => rx.ipc.senders.pop_front(),
            SenderOrder::Lifo => rx.ipc.senders.pop_back(),
        };
        let Some(sender) = next else {
            rx.ipc.recving = true;
            rx.status = EnvStatus::NotRunnable;
            trace::record(Event::Waiting { receiver });
            return Ok(Delivery::Parked);
        };

        // A queue entry is only honoured while the sender is still parked on this receiver.
        let parked = envs
            .get_mut(sender)
            .filter(|src| src.status == EnvStatus::NotRunnable)
            .filter(|src| src.ipc.outgoing.is_some_and(|msg| msg.target == receiver))
            .and_then(|src| src.ipc.outgoing.take());
        let Some(msg) = parked else {
            continue;
        };

        let result = transfer(envs, frames, sender, receiver, msg);
        wake(envs, sender, result.map(|()| 0).map_err(syscall::Error::from));
        if result.is_ok() {
            return Ok(Delivery::Delivered);
        }
        crate::log_debug!(
            target: "ipc",
            "[{}] parked send from {} failed: {:?}",
            receiver,
            sender,
            result
        );
    }
}

/// Moves `msg` from `sender` into the receiving `receiver`.
fn transfer(
    envs: &mut EnvTable,
    frames: &mut FramePool,
    sender: EnvId,
    receiver: EnvId,
    msg: Outgoing,
) -> Result<(), IpcError> {
    let dst_va = envs.get(receiver).ok_or(IpcError::TargetGone)?.ipc.dst_va;

    let mut moved = Perm::empty();
    if msg.src_va < UTOP && dst_va < UTOP {
        let src_va = UserPage::new(msg.src_va).ok_or(IpcError::InvalidPage)?;
        let perm = Perm::from_syscall(msg.perm).ok_or(IpcError::InvalidPage)?;
        let source = envs.get(sender).and_then(|env| env.space().lookup(src_va.raw()));
        let frame = resolve_share(source, perm)?;
        let rx = envs.get_mut(receiver).ok_or(IpcError::TargetGone)?;
        rx.space_mut().insert(frames, frame, dst_va, perm)?;
        moved = perm;
    }

    let rx = envs.get_mut(receiver).ok_or(IpcError::TargetGone)?;
    rx.ipc.recving = false;
    rx.ipc.from = sender;
    rx.ipc.value = msg.value;
    rx.ipc.perm = moved.bits();
    if rx.status == EnvStatus::NotRunnable {
        rx.tf.regs.eax = 0;
        rx.status = EnvStatus::Runnable;
    }
    trace::record(Event::Delivered {
        from: sender,
        to: receiver,
        value: msg.value,
        perm: moved.bits(),
    });
    Ok(())
}

fn wake(envs: &mut EnvTable, id: EnvId, result: syscall::SysResult<u32>) {
    if let Some(env) = envs.get_mut(id) {
        env.tf.regs.eax = syscall::encode_result(result);
        if env.status == EnvStatus::NotRunnable {
            env.status = EnvStatus::Runnable;
        }
    }
}

/// Abandons the rendezvous `id` is blocked in, if any.
///
/// A parked sender drops its message, leaves every pending queue and sees `IPC_NOT_RECV`;
/// a blocked receiver stops receiving and sees `UNSPECIFIED`. The caller decides the new
/// status. Returns whether a rendezvous was abandoned.
pub fn cancel(envs: &mut EnvTable, id: EnvId) -> bool {
    let Some(env) = envs.get_mut(id) else {
        return false;
    };
    if env.status != EnvStatus::NotRunnable {
        return false;
    }
    let err = if env.ipc.recving {
        env.ipc.recving = false;
        IpcError::Interrupted
    } else if env.ipc.outgoing.take().is_some() {
        IpcError::NotReceiving
    } else {
        return false;
    };
    env.tf.regs.eax = syscall::encode_result(Err(err.into()));
    for other in envs.iter_live_mut() {
        other.ipc.senders.retain(|queued| *queued != id);
    }
    trace::record(Event::Cancelled { env: id });
    crate::log_debug!(target: "ipc", "[{}] rendezvous cancelled: {:?}", id, err);
    true
}

/// Tears down IPC references to an environment that was just released.
///
/// The released id leaves every pending queue; senders parked on it are woken with
/// `BAD_ENV`.
pub fn on_release(envs: &mut EnvTable, released: Released) {
    for env in envs.iter_live_mut() {
        env.ipc.senders.retain(|queued| *queued != released.id);
    }
    for sender in released.stranded {
        let parked = envs.get_mut(sender).and_then(|env| env.ipc.outgoing.take()).is_some();
        if parked {
            trace::record(Event::Stranded { sender, target: released.id });
            wake(envs, sender, Err(IpcError::TargetGone.into()));
        }
    }
}

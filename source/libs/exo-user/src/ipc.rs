// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Blocking IPC wrappers over `ipc_try_send` / `ipc_recv`.

use exo_abi::env::EnvId;
use exo_abi::mmu::{Perm, UTOP};
use exo_abi::{Error, Result};

use crate::platform::Platform;
use crate::{process, sys};

/// A completed receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    /// Word sent by the peer.
    pub value: u32,
    /// Sender's id.
    pub from: EnvId,
    /// Permissions of the transferred page; empty if no page moved.
    pub perm: Perm,
}

/// Receives one message, accepting a page at `dst` if given.
pub fn ipc_recv(p: &mut dyn Platform, dst: Option<u32>) -> Result<Received> {
    sys::ipc_recv(p, dst.unwrap_or(UTOP))?;
    let me = process::this_env(p);
    let record = p.env(me.index());
    Ok(Received {
        value: record.ipc_value,
        from: record.ipc_from,
        perm: Perm::from_bits_truncate(record.ipc_perm),
    })
}

/// Sends `value` (and optionally the page at `page.0` with `page.1`) to `to`, yielding
/// and retrying while the target is not receiving.
pub fn ipc_send(
    p: &mut dyn Platform,
    to: EnvId,
    value: u32,
    page: Option<(u32, Perm)>,
) -> Result<()> {
    let (src_va, perm) = page.unwrap_or((UTOP, Perm::empty()));
    loop {
        match sys::ipc_try_send(p, to, value, src_va, perm) {
            Err(Error::IpcNotRecv) => sys::yield_(p),
            other => return other,
        }
    }
}

// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Bounded IPC event ring, compiled in with the `ipc_trace` feature.

use exo_abi::env::EnvId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Delivered { from: EnvId, to: EnvId, value: u32, perm: u32 },
    Parked { sender: EnvId, target: EnvId },
    Waiting { receiver: EnvId },
    Stranded { sender: EnvId, target: EnvId },
    Cancelled { env: EnvId },
}

#[cfg(feature = "ipc_trace")]
mod ring {
    extern crate alloc;

    use alloc::collections::VecDeque;
    use alloc::vec::Vec;

    use spin::Mutex;

    use super::Event;

    const RING_LEN: usize = 128;

    static RING: Mutex<VecDeque<Event>> = Mutex::new(VecDeque::new());

    pub fn push(event: Event) {
        let mut ring = RING.lock();
        if ring.len() == RING_LEN {
            ring.pop_front();
        }
        ring.push_back(event);
    }

    pub fn snapshot() -> Vec<Event> {
        RING.lock().iter().copied().collect()
    }
}

#[inline]
pub fn record(event: Event) {
    #[cfg(feature = "ipc_trace")]
    ring::push(event);
    #[cfg(not(feature = "ipc_trace"))]
    let _ = event;
}

#[cfg(feature = "ipc_trace")]
pub use ring::snapshot;

// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Page-fault delivery to user-level handlers on the exception stack.

use exo_abi::mmu::{Perm, PGSIZE, UXSTACKTOP};
use exo_abi::trap::UTrapframe;

use super::TrapFrame;
use crate::kernel::KernelState;
use crate::types::CpuId;

const XSTACK_BOTTOM: u32 = UXSTACKTOP - PGSIZE;
const RECORD_LEN: u32 = UTrapframe::SIZE as u32;

/// Where the exception record goes for a fault taken with stack pointer `esp`.
///
/// A fault raised while already on the exception stack keeps one scratch word below the
/// interrupted frame for the return path. `None` when the record would not fit in the
/// exception stack page.
pub(crate) fn record_address(esp: u32) -> Option<u32> {
    let top = if (XSTACK_BOTTOM..UXSTACKTOP).contains(&esp) { esp - 4 } else { UXSTACKTOP };
    top.checked_sub(RECORD_LEN).filter(|va| *va >= XSTACK_BOTTOM)
}

pub(super) fn page_fault(state: &mut KernelState, cpu: CpuId, tf: &TrapFrame, fault_va: u32) {
    if !tf.from_user() {
        panic!("kernel page fault at va {:08x} ip {:08x}", fault_va, tf.eip);
    }
    let Some(cur) = state.current(cpu) else {
        return;
    };
    let Some(env) = state.envs.get(cur) else {
        return;
    };

    let upcall = env.pgfault_upcall;
    if upcall == 0 {
        crate::log_warn!(
            target: "trap",
            "[{}] user fault va {:08x} ip {:08x}",
            cur,
            fault_va,
            tf.eip
        );
        state.envs.mark_dying(cur);
        return;
    }

    let space = env.space();
    let checked = record_address(tf.esp).ok_or(tf.esp).and_then(|record| {
        space.user_mem_check(upcall, 1, Perm::USER)?;
        space.user_mem_check(record, RECORD_LEN, Perm::USER | Perm::WRITABLE)?;
        Ok(record)
    });
    let record = match checked {
        Ok(record) => record,
        Err(bad) => {
            crate::log_warn!(
                target: "trap",
                "[{}] user_mem_check assertion failure for va {:08x}",
                cur,
                bad
            );
            state.envs.mark_dying(cur);
            return;
        }
    };

    let utf = UTrapframe {
        fault_va,
        err: tf.err,
        regs: tf.regs,
        eip: tf.eip,
        eflags: tf.eflags,
        esp: tf.esp,
    };
    if let Err(bad) = space.write(&mut state.frames, record, &utf.to_bytes()) {
        panic!("exception stack at {:08x} vanished after check", bad);
    }

    if let Some(env) = state.envs.get_mut(cur) {
        env.tf.eip = upcall;
        env.tf.esp = record;
    }
    crate::log_trace!(target: "trap", "[{}] upcall va {:08x} record {:08x}", cur, fault_va, record);
}

// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Trap router: privilege transition, context capture and event dispatch
//! OWNERS: @kernel-team
//! PUBLIC API: TrapFrame, Resume, trap_name, fmt_trap, FaultReason, segment selectors
//! DEPENDS_ON: env::EnvTable, syscall::SyscallTable, hal::Devices, sched::Scheduler
//! INVARIANTS: One kernel visit per dispatch-lock guard; DYING environments are reclaimed
//!             before dispatch; the interrupted environment resumes only if still RUNNING;
//!             unexpected events in kernel context halt the system

mod fault;
mod names;

use exo_abi::env::EnvStatus;
use exo_abi::mmu::USTACKTOP;
use exo_abi::trap::{
    PushRegs, IRQ_KBD, IRQ_OFFSET, IRQ_SERIAL, IRQ_SPURIOUS, IRQ_TIMER, T_BRKPT, T_DEBUG,
    T_PGFLT, T_SYSCALL,
};
use exo_abi::EnvId;

pub use names::{fmt_trap, trap_name, FaultReason};

use crate::hal::MonitorAction;
use crate::kernel::KernelState;
use crate::syscall::{self, api, Args};
use crate::types::CpuId;

/// Kernel text segment selector.
pub const GD_KT: u32 = 0x08;
/// Kernel data segment selector.
pub const GD_KD: u32 = 0x10;
/// User text segment selector.
pub const GD_UT: u32 = 0x18;
/// User data segment selector.
pub const GD_UD: u32 = 0x20;
/// Interrupt-enable flag.
pub const FL_IF: u32 = 0x0000_0200;

/// Machine state saved on every trap.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub regs: PushRegs,
    pub es: u32,
    pub ds: u32,
    pub trapno: u32,
    pub err: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
}

impl TrapFrame {
    /// Fresh user-mode frame starting at `eip` on the normal user stack.
    pub const fn user_entry(eip: u32) -> Self {
        Self {
            regs: PushRegs { edi: 0, esi: 0, ebp: 0, oesp: 0, ebx: 0, edx: 0, ecx: 0, eax: 0 },
            es: GD_UD | 3,
            ds: GD_UD | 3,
            trapno: 0,
            err: 0,
            eip,
            cs: GD_UT | 3,
            eflags: FL_IF,
            esp: USTACKTOP,
            ss: GD_UD | 3,
        }
    }

    /// Frame for an event taken while the CPU executes kernel code.
    pub const fn kernel(trapno: u32) -> Self {
        let mut tf = Self::user_entry(0);
        tf.cs = GD_KT;
        tf.ss = GD_KD;
        tf.es = GD_KD;
        tf.ds = GD_KD;
        tf.esp = 0;
        tf.trapno = trapno;
        tf
    }

    /// True if the trap came from user mode (CPL 3).
    pub const fn from_user(&self) -> bool {
        self.cs & 3 == 3
    }
}

static_assertions::const_assert_eq!(core::mem::size_of::<TrapFrame>(), 68);

/// Where a CPU goes when it leaves the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "the CPU must act on the resume decision"]
pub enum Resume {
    /// Return to user mode in `env` with `frame` loaded.
    User { env: EnvId, frame: TrapFrame },
    /// Nothing runnable; wait for the next interrupt.
    Halt,
}

impl KernelState {
    /// Handles one trap on `cpu` and decides what the CPU runs next.
    pub(crate) fn route(&mut self, cpu: CpuId, tf: TrapFrame, fault_va: u32) -> Resume {
        self.last_trap = Some(tf);

        if tf.from_user() {
            let Some(cur) = self.current(cpu) else {
                panic!("user trap {} on cpu {} with no current environment", tf.trapno, cpu);
            };
            let dying = self.envs.get(cur).map_or(true, |env| env.status == EnvStatus::Dying);
            if dying {
                // Destroyed from another CPU while it ran here.
                self.free_env(cur);
                return self.schedule(cpu);
            }
            if let Some(env) = self.envs.get_mut(cur) {
                env.tf = tf;
            }
            self.reclaim_dying(cpu);
        }

        self.dispatch(cpu, &tf, fault_va);

        match self.current(cpu) {
            Some(cur) => match self.envs.get(cur) {
                Some(env) if env.status == EnvStatus::Running => {
                    Resume::User { env: cur, frame: env.tf }
                }
                _ => self.schedule(cpu),
            },
            None => self.schedule(cpu),
        }
    }

    fn dispatch(&mut self, cpu: CpuId, tf: &TrapFrame, fault_va: u32) {
        match tf.trapno {
            T_PGFLT => fault::page_fault(self, cpu, tf, fault_va),
            T_BRKPT | T_DEBUG => self.enter_monitor(cpu, tf),
            T_SYSCALL if tf.from_user() => self.syscall(cpu),
            trapno if trapno == IRQ_OFFSET + IRQ_TIMER => {
                self.devices.irq.eoi(IRQ_TIMER);
                self.yield_current(cpu);
            }
            trapno if trapno == IRQ_OFFSET + IRQ_KBD || trapno == IRQ_OFFSET + IRQ_SERIAL => {
                self.devices.console.poll();
                self.devices.irq.eoi(trapno - IRQ_OFFSET);
            }
            trapno if trapno == IRQ_OFFSET + IRQ_SPURIOUS => {
                crate::log_warn!(target: "trap", "spurious interrupt on irq {}", IRQ_SPURIOUS);
            }
            _ => self.unexpected(cpu, tf, fault_va),
        }
    }

    fn unexpected(&mut self, cpu: CpuId, tf: &TrapFrame, fault_va: u32) {
        let mut text = alloc::string::String::new();
        let _ = fmt_trap(&mut text, tf, Some(fault_va));
        if !tf.from_user() {
            panic!("unhandled trap in kernel\n{}", text);
        }
        crate::log_error!(target: "trap", "unhandled trap {}\n{}", trap_name(tf.trapno), text);
        if let Some(cur) = self.current(cpu) {
            self.envs.mark_dying(cur);
        }
    }

    fn enter_monitor(&mut self, cpu: CpuId, tf: &TrapFrame) {
        let env = if tf.from_user() { self.current(cpu) } else { None };
        if self.devices.monitor.breakpoint(env, tf) == MonitorAction::Kill {
            if let Some(cur) = env {
                self.envs.mark_dying(cur);
            }
        }
    }

    fn yield_current(&mut self, cpu: CpuId) {
        let Some(cur) = self.current(cpu) else {
            return;
        };
        if let Some(env) = self.envs.get_mut(cur) {
            if env.status == EnvStatus::Running {
                env.status = EnvStatus::Runnable;
            }
        }
    }

    fn syscall(&mut self, cpu: CpuId) {
        let Some(cur) = self.current(cpu) else {
            return;
        };
        let Some(regs) = self.envs.get(cur).map(|env| env.tf.regs) else {
            return;
        };
        let args = Args::new([regs.edx, regs.ecx, regs.ebx, regs.edi, regs.esi]);
        let result = {
            let mut ctx = api::Context::new(
                cur,
                &mut self.envs,
                &mut self.frames,
                &mut self.devices,
                self.config.ipc,
            );
            self.syscalls.dispatch(regs.eax as usize, &mut ctx, &args)
        };
        if result == Err(syscall::Error::Blocked) {
            // Whoever completes the rendezvous writes the return register.
            return;
        }
        if let Some(env) = self.envs.get_mut(cur) {
            env.tf.regs.eax = syscall::encode_result(result);
        }
    }
}

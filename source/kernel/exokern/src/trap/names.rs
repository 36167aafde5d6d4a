// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Trap names and printable frames.

use core::fmt::{self, Write};

use exo_abi::mmu::FaultCode;
use exo_abi::trap::{IRQ_OFFSET, T_PGFLT, T_SYSCALL};

use super::TrapFrame;

const EXCEPTION_NAMES: [&str; 20] = [
    "Divide error",
    "Debug",
    "Non-Maskable Interrupt",
    "Breakpoint",
    "Overflow",
    "BOUND Range Exceeded",
    "Invalid Opcode",
    "Device Not Available",
    "Double Fault",
    "Coprocessor Segment Overrun",
    "Invalid TSS",
    "Segment Not Present",
    "Stack Fault",
    "General Protection",
    "Page Fault",
    "(unknown trap)",
    "x87 FPU Floating-Point Error",
    "Alignment Check",
    "Machine-Check",
    "SIMD Floating-Point Exception",
];

pub fn trap_name(trapno: u32) -> &'static str {
    if let Some(name) = EXCEPTION_NAMES.get(trapno as usize) {
        return name;
    }
    if trapno == T_SYSCALL {
        return "System call";
    }
    if (IRQ_OFFSET..IRQ_OFFSET + 16).contains(&trapno) {
        return "Hardware Interrupt";
    }
    "(unknown trap)"
}

/// Decoded page-fault error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultReason(pub FaultCode);

impl fmt::Display for FaultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.0;
        write!(
            f,
            "[{}, {}, {}]",
            if code.contains(FaultCode::USER) { "user" } else { "kernel" },
            if code.contains(FaultCode::WRITE) { "write" } else { "read" },
            if code.contains(FaultCode::PROTECTION) { "protection" } else { "not-present" },
        )
    }
}

/// Writes a multi-line dump of `tf`. `fault_va` is printed for page faults.
pub fn fmt_trap<W: Write>(out: &mut W, tf: &TrapFrame, fault_va: Option<u32>) -> fmt::Result {
    let r = &tf.regs;
    writeln!(out, "  edi  0x{:08x}  esi  0x{:08x}  ebp  0x{:08x}", r.edi, r.esi, r.ebp)?;
    writeln!(
        out,
        "  ebx  0x{:08x}  edx  0x{:08x}  ecx  0x{:08x}  eax  0x{:08x}",
        r.ebx, r.edx, r.ecx, r.eax
    )?;
    writeln!(out, "  trap 0x{:08x} {}", tf.trapno, trap_name(tf.trapno))?;
    if tf.trapno == T_PGFLT {
        if let Some(va) = fault_va {
            writeln!(out, "  cr2  0x{:08x}", va)?;
        }
        write!(out, "  err  0x{:08x}", tf.err)?;
        writeln!(out, " {}", FaultReason(FaultCode::from_bits_truncate(tf.err)))?;
    } else {
        writeln!(out, "  err  0x{:08x}", tf.err)?;
    }
    writeln!(out, "  eip  0x{:08x}  cs   0x----{:04x}  flag 0x{:08x}", tf.eip, tf.cs, tf.eflags)?;
    if tf.from_user() {
        writeln!(out, "  esp  0x{:08x}  ss   0x----{:04x}", tf.esp, tf.ss)?;
    }
    Ok(())
}

// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Trap numbers and the exception record pushed for user page-fault upcalls.

/// Divide error.
pub const T_DIVIDE: u32 = 0;
/// Debug exception.
pub const T_DEBUG: u32 = 1;
/// Non-maskable interrupt.
pub const T_NMI: u32 = 2;
/// Breakpoint (`int3`).
pub const T_BRKPT: u32 = 3;
/// Overflow.
pub const T_OFLOW: u32 = 4;
/// Bounds check.
pub const T_BOUND: u32 = 5;
/// Illegal opcode.
pub const T_ILLOP: u32 = 6;
/// Device not available.
pub const T_DEVICE: u32 = 7;
/// Double fault.
pub const T_DBLFLT: u32 = 8;
/// Invalid task switch segment.
pub const T_TSS: u32 = 10;
/// Segment not present.
pub const T_SEGNP: u32 = 11;
/// Stack exception.
pub const T_STACK: u32 = 12;
/// General protection fault.
pub const T_GPFLT: u32 = 13;
/// Page fault.
pub const T_PGFLT: u32 = 14;
/// Floating point error.
pub const T_FPERR: u32 = 16;
/// Alignment check.
pub const T_ALIGN: u32 = 17;
/// Machine check.
pub const T_MCHK: u32 = 18;
/// SIMD floating point error.
pub const T_SIMDERR: u32 = 19;
/// System call vector.
pub const T_SYSCALL: u32 = 48;

/// First vector used by hardware interrupts.
pub const IRQ_OFFSET: u32 = 32;
/// Timer interrupt line.
pub const IRQ_TIMER: u32 = 0;
/// Keyboard interrupt line.
pub const IRQ_KBD: u32 = 1;
/// Serial port interrupt line.
pub const IRQ_SERIAL: u32 = 4;
/// Spurious interrupt line.
pub const IRQ_SPURIOUS: u32 = 7;

/// General-purpose registers in `pusha` order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct PushRegs {
    /// `edi`, fourth syscall argument.
    pub edi: u32,
    /// `esi`, fifth syscall argument.
    pub esi: u32,
    /// Frame pointer.
    pub ebp: u32,
    /// Ignored slot left by `pusha`.
    pub oesp: u32,
    /// `ebx`, third syscall argument.
    pub ebx: u32,
    /// `edx`, first syscall argument.
    pub edx: u32,
    /// `ecx`, second syscall argument.
    pub ecx: u32,
    /// `eax`, syscall number and return value.
    pub eax: u32,
}

impl PushRegs {
    const WORDS: usize = 8;

    fn to_words(self) -> [u32; Self::WORDS] {
        [self.edi, self.esi, self.ebp, self.oesp, self.ebx, self.edx, self.ecx, self.eax]
    }

    fn from_words(w: &[u32]) -> Self {
        Self {
            edi: w[0],
            esi: w[1],
            ebp: w[2],
            oesp: w[3],
            ebx: w[4],
            edx: w[5],
            ecx: w[6],
            eax: w[7],
        }
    }
}

/// Exception record pushed on the user exception stack before an upcall.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct UTrapframe {
    /// Faulting linear address.
    pub fault_va: u32,
    /// MMU error code (see [`crate::mmu::FaultCode`]).
    pub err: u32,
    /// Registers at trap time.
    pub regs: PushRegs,
    /// Instruction pointer at trap time.
    pub eip: u32,
    /// Flags at trap time.
    pub eflags: u32,
    /// Stack pointer at trap time.
    pub esp: u32,
}

impl UTrapframe {
    /// Size of the record in user memory.
    pub const SIZE: usize = 13 * 4;
    const WORDS: usize = Self::SIZE / 4;

    /// Serializes the record as it is laid out on the exception stack.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut words = [0u32; Self::WORDS];
        words[0] = self.fault_va;
        words[1] = self.err;
        words[2..10].copy_from_slice(&self.regs.to_words());
        words[10] = self.eip;
        words[11] = self.eflags;
        words[12] = self.esp;
        let mut out = [0u8; Self::SIZE];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Parses a record read back from the exception stack.
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let mut words = [0u32; Self::WORDS];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self {
            fault_va: words[0],
            err: words[1],
            regs: PushRegs::from_words(&words[2..10]),
            eip: words[10],
            eflags: words[11],
            esp: words[12],
        }
    }
}

static_assertions::const_assert_eq!(core::mem::size_of::<PushRegs>(), 32);
static_assertions::const_assert_eq!(core::mem::size_of::<UTrapframe>(), UTrapframe::SIZE);

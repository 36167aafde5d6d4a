// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Test rig: a single-CPU kernel with host devices and helpers to issue traps.

use exo_abi::env::EnvId;
use exo_abi::mmu::{Perm, PGSIZE, UTEXT};
use exo_abi::trap::{IRQ_OFFSET, IRQ_TIMER, T_SYSCALL};
use exo_abi::Syscall;

use crate::{CpuId, EnvImage, HostHandles, Kernel, KernelConfig, Resume, Segment, TrapFrame};

pub const CPU: CpuId = CpuId::BOOT;
pub const URW: u32 = Perm::USER.union(Perm::PRESENT).union(Perm::WRITABLE).bits();
pub const UR: u32 = Perm::USER.union(Perm::PRESENT).bits();

const TEXT: [u8; 16] = [0x90; 16];

pub struct Rig {
    pub kernel: Kernel,
    pub handles: HostHandles,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_config(KernelConfig { phys_pages: 512, ..KernelConfig::DEFAULT })
    }

    pub fn with_config(config: KernelConfig) -> Self {
        let (kernel, handles) = Kernel::new(config).expect("config");
        Self { kernel, handles }
    }

    /// Boot-time environment with one text page at UTEXT and a stack page.
    pub fn spawn(&self) -> EnvId {
        let segments =
            [Segment { va: UTEXT, data: &TEXT, mem_size: PGSIZE, perm: Perm::USER }];
        self.kernel
            .create_env(&EnvImage { entry: UTEXT, segments: &segments })
            .expect("create_env")
    }

    pub fn boot(&self) -> (EnvId, TrapFrame) {
        running(self.kernel.boot(CPU))
    }

    /// Issues syscall `num` from the environment whose saved state is `frame`.
    pub fn syscall(&self, frame: TrapFrame, num: u32, args: [u32; 5]) -> Resume {
        let mut tf = frame;
        tf.trapno = T_SYSCALL;
        tf.regs.eax = num;
        tf.regs.edx = args[0];
        tf.regs.ecx = args[1];
        tf.regs.ebx = args[2];
        tf.regs.edi = args[3];
        tf.regs.esi = args[4];
        self.kernel.trap(CPU, tf, 0)
    }

    pub fn sys(&self, frame: TrapFrame, num: Syscall, args: [u32; 5]) -> Resume {
        self.syscall(frame, num.number(), args)
    }

    /// Syscall that is expected to return to the caller; yields its return value and frame.
    pub fn call(&self, frame: TrapFrame, num: Syscall, args: [u32; 5]) -> (i32, TrapFrame) {
        let caller = self.current().expect("caller");
        let (env, next) = running(self.sys(frame, num, args));
        assert_eq!(env, caller, "syscall {:?} switched environments", num);
        (next.regs.eax as i32, next)
    }

    pub fn timer(&self, frame: TrapFrame) -> Resume {
        let mut tf = frame;
        tf.trapno = IRQ_OFFSET + IRQ_TIMER;
        self.kernel.trap(CPU, tf, 0)
    }

    pub fn current(&self) -> Option<EnvId> {
        self.kernel.inspect(|state| state.current(CPU))
    }

    /// Saved frame of a parked environment.
    pub fn saved(&self, id: EnvId) -> TrapFrame {
        self.kernel.inspect(|state| state.envs().get(id).expect("live env").tf)
    }
}

pub fn running(resume: Resume) -> (EnvId, TrapFrame) {
    match resume {
        Resume::User { env, frame } => (env, frame),
        Resume::Halt => panic!("expected a running environment, CPU halted"),
    }
}

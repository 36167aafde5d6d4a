// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel state behind the dispatch lock and its host-facing entry points
//! OWNERS: @kernel-team
//! PUBLIC API: Kernel (new/with_devices/create_env/boot/trap/user_read/user_write/uvpd/uvpt/
//!             env_record/inspect/with_state), KernelState, Cpu, EnvImage, Segment, PageFault
//! DEPENDS_ON: sync::DispatchLock, env, mm, sched, trap, syscall, ipc, hal
//! INVARIANTS: Every entry takes the dispatch lock exactly once; at most one RUNNING
//!             environment per CPU; a DYING environment still current on another CPU is
//!             reclaimed only after that CPU traps

extern crate alloc;

use alloc::vec::Vec;

use exo_abi::env::{EnvId, EnvRecord, EnvStatus};
use exo_abi::mmu::{
    is_page_aligned, page_round_down, FaultCode, Pde, Perm, Pte, PGSIZE, USTACKTOP, UTOP,
};

use crate::config::{ConfigError, KernelConfig};
use crate::env::{EnvError, EnvTable};
use crate::hal::{host::HostHandles, Devices};
use crate::ipc;
use crate::mm::{Frame, FramePool, MapError};
use crate::sched::{Decision, Scheduler};
use crate::sync::DispatchLock;
use crate::syscall::SyscallTable;
use crate::trap::{Resume, TrapFrame};
use crate::types::CpuId;

/// Per-CPU bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cpu {
    pub current: Option<EnvId>,
    pub halted: bool,
}

/// Everything the dispatch lock protects.
pub struct KernelState {
    pub(crate) config: KernelConfig,
    pub(crate) frames: FramePool,
    pub(crate) envs: EnvTable,
    pub(crate) cpus: Vec<Cpu>,
    pub(crate) sched: Scheduler,
    pub(crate) syscalls: SyscallTable,
    pub(crate) devices: Devices,
    pub(crate) last_trap: Option<TrapFrame>,
}

impl KernelState {
    fn new(config: KernelConfig, devices: Devices) -> Self {
        Self {
            config,
            frames: FramePool::new(config.phys_pages),
            envs: EnvTable::new(config.max_envs),
            cpus: alloc::vec![Cpu::default(); config.ncpu],
            sched: Scheduler::new(),
            syscalls: SyscallTable::default(),
            devices,
            last_trap: None,
        }
    }

    pub fn envs(&self) -> &EnvTable {
        &self.envs
    }

    pub fn frames(&self) -> &FramePool {
        &self.frames
    }

    /// Frame pool access for hosts and tests (e.g. arming failpoints).
    pub fn frames_mut(&mut self) -> &mut FramePool {
        &mut self.frames
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn cpu(&self, cpu: CpuId) -> Cpu {
        self.cpus.get(cpu.as_index()).copied().unwrap_or_default()
    }

    /// Environment current on `cpu`.
    pub fn current(&self, cpu: CpuId) -> Option<EnvId> {
        self.cpus.get(cpu.as_index()).and_then(|c| c.current)
    }

    pub fn last_trap(&self) -> Option<TrapFrame> {
        self.last_trap
    }

    pub fn halts(&self) -> u64 {
        self.sched.halts()
    }

    /// Number of frames referenced by `pa`'s frame.
    pub fn frame_refs(&self, pa: u32) -> u32 {
        self.frames.refs(Frame::from_addr(pa))
    }

    /// Boot-time environment creation: address space, segments and an initial stack page.
    pub fn create_env(&mut self, image: &EnvImage<'_>) -> Result<EnvId, EnvError> {
        let id = self.envs.alloc(&mut self.frames, EnvId::SELF)?;
        if let Err(err) = self.load(id, image) {
            self.free_env(id);
            return Err(err.into());
        }
        if let Some(env) = self.envs.get_mut(id) {
            env.tf = TrapFrame::user_entry(image.entry);
        }
        crate::log_info!(target: "env", "[00000000] new env {}", id);
        Ok(id)
    }

    fn load(&mut self, id: EnvId, image: &EnvImage<'_>) -> Result<(), MapError> {
        for segment in image.segments {
            let end = segment.va + core::cmp::max(segment.mem_size, segment.data.len() as u32);
            let mut va = page_round_down(segment.va);
            while va < end {
                self.map_zeroed(id, va, segment.perm)?;
                va += PGSIZE;
            }
            if let Some(env) = self.envs.get(id) {
                env.space()
                    .write(&mut self.frames, segment.va, segment.data)
                    .map_err(|_| MapError::NotMapped)?;
            }
        }
        self.map_zeroed(id, USTACKTOP - PGSIZE, Perm::USER | Perm::WRITABLE)
    }

    fn map_zeroed(&mut self, id: EnvId, va: u32, perm: Perm) -> Result<(), MapError> {
        let Some(env) = self.envs.get_mut(id) else {
            return Err(MapError::NotMapped);
        };
        if env.space().lookup(va).is_some() {
            return Ok(());
        }
        let frame = self.frames.alloc()?;
        if let Err(err) = env.space_mut().insert(&mut self.frames, frame, va, perm | Perm::USER) {
            self.frames.free(frame);
            return Err(err);
        }
        Ok(())
    }

    /// Frees every DYING environment that is not current on another CPU.
    pub(crate) fn reclaim_dying(&mut self, cpu: CpuId) {
        let mut deferred = Vec::new();
        for id in self.envs.take_dying() {
            let elsewhere = self
                .cpus
                .iter()
                .enumerate()
                .any(|(index, c)| index != cpu.as_index() && c.current == Some(id));
            if elsewhere {
                deferred.push(id);
            } else {
                self.free_env(id);
            }
        }
        self.envs.defer_dying(deferred);
    }

    pub(crate) fn free_env(&mut self, id: EnvId) {
        for cpu in self.cpus.iter_mut() {
            if cpu.current == Some(id) {
                cpu.current = None;
            }
        }
        if let Some(released) = self.envs.release(&mut self.frames, id) {
            ipc::on_release(&mut self.envs, released);
            crate::log_info!(target: "env", "free env {}", id);
        }
    }

    /// Picks the next environment for `cpu` and switches to it, or halts the CPU.
    pub(crate) fn schedule(&mut self, cpu: CpuId) -> Resume {
        self.reclaim_dying(cpu);
        let current = self.current(cpu);
        match self.sched.pick(&self.envs, current) {
            Decision::Run(next) => self.run(cpu, next),
            Decision::Halt => {
                if let Some(slot) = self.cpus.get_mut(cpu.as_index()) {
                    slot.current = None;
                    slot.halted = true;
                }
                crate::log_info!(target: "sched", "No runnable environments on cpu {}", cpu);
                Resume::Halt
            }
        }
    }

    fn run(&mut self, cpu: CpuId, next: EnvId) -> Resume {
        if let Some(prev) = self.current(cpu) {
            if prev != next {
                if let Some(env) = self.envs.get_mut(prev) {
                    if env.status == EnvStatus::Running {
                        env.status = EnvStatus::Runnable;
                    }
                }
            }
        }
        let Some(env) = self.envs.get_mut(next) else {
            panic!("scheduler picked dead env {}", next);
        };
        env.status = EnvStatus::Running;
        env.runs = env.runs.wrapping_add(1);
        let frame = env.tf;
        if let Some(slot) = self.cpus.get_mut(cpu.as_index()) {
            slot.current = Some(next);
            slot.halted = false;
        }
        Resume::User { env: next, frame }
    }
}

/// A loadable memory region of a boot image.
#[derive(Debug, Clone, Copy)]
pub struct Segment<'a> {
    pub va: u32,
    pub data: &'a [u8],
    /// Bytes reserved at `va`; the tail past `data` is zero-filled.
    pub mem_size: u32,
    pub perm: Perm,
}

/// Boot image for [`Kernel::create_env`].
#[derive(Debug, Clone, Copy)]
pub struct EnvImage<'a> {
    pub entry: u32,
    pub segments: &'a [Segment<'a>],
}

/// A user-mode access the MMU refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFault {
    pub va: u32,
    pub code: FaultCode,
}

/// The kernel: all state behind one dispatch lock.
pub struct Kernel {
    state: DispatchLock<KernelState>,
}

impl Kernel {
    /// Kernel with in-memory host devices.
    pub fn new(config: KernelConfig) -> Result<(Self, HostHandles), ConfigError> {
        let (devices, handles) = Devices::host();
        Ok((Self::with_devices(config, devices)?, handles))
    }

    pub fn with_devices(config: KernelConfig, devices: Devices) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { state: DispatchLock::new(KernelState::new(config, devices)) })
    }

    pub fn create_env(&self, image: &EnvImage<'_>) -> Result<EnvId, EnvError> {
        self.state.lock().create_env(image)
    }

    /// First entry of `cpu` into the scheduler.
    pub fn boot(&self, cpu: CpuId) -> Resume {
        self.state.enter(cpu).schedule(cpu)
    }

    /// Delivers a trap taken on `cpu`. `fault_va` is the faulting address for page faults.
    pub fn trap(&self, cpu: CpuId, frame: TrapFrame, fault_va: u32) -> Resume {
        let mut visit = self.state.enter(cpu);
        visit.route(cpu, frame, fault_va)
    }

    /// User-mode read through the MMU of `env`.
    pub fn user_read(&self, env: EnvId, va: u32, buf: &mut [u8]) -> Result<(), PageFault> {
        let state = self.state.lock();
        let space = state.envs.get(env).map(|e| e.space()).ok_or(PageFault {
            va,
            code: FaultCode::USER,
        })?;
        mmu_check(space, va, buf.len(), false)?;
        space.read(&state.frames, va, buf).map_err(|va| PageFault { va, code: FaultCode::USER })
    }

    /// User-mode write through the MMU of `env`.
    pub fn user_write(&self, env: EnvId, va: u32, data: &[u8]) -> Result<(), PageFault> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let space = state.envs.get(env).map(|e| e.space()).ok_or(PageFault {
            va,
            code: FaultCode::USER | FaultCode::WRITE,
        })?;
        mmu_check(space, va, data.len(), true)?;
        space
            .write(&mut state.frames, va, data)
            .map_err(|va| PageFault { va, code: FaultCode::USER | FaultCode::WRITE })
    }

    /// Read-only page directory view (`uvpd`) of `env`.
    pub fn uvpd(&self, env: EnvId, index: usize) -> Pde {
        self.state.lock().envs.get(env).map_or(Pde::EMPTY, |e| e.space().pde(index))
    }

    /// Read-only page table view (`uvpt`) of `env`.
    pub fn uvpt(&self, env: EnvId, pgnum: usize) -> Pte {
        if pgnum >= (UTOP as usize >> 12) {
            return Pte::EMPTY;
        }
        self.state.lock().envs.get(env).map_or(Pte::EMPTY, |e| e.space().pte(pgnum))
    }

    /// Read-only environment table view (`envs[index]`).
    pub fn env_record(&self, index: usize) -> EnvRecord {
        self.state.lock().envs.record(index)
    }

    pub fn inspect<R>(&self, f: impl FnOnce(&KernelState) -> R) -> R {
        f(&self.state.lock())
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut KernelState) -> R) -> R {
        f(&mut self.state.lock())
    }
}

fn mmu_check(
    space: &crate::mm::AddressSpace,
    va: u32,
    len: usize,
    write: bool,
) -> Result<(), PageFault> {
    if len == 0 {
        return Ok(());
    }
    let last = va.checked_add(len as u32 - 1).ok_or(PageFault { va, code: FaultCode::USER })?;
    let mut page = page_round_down(va);
    loop {
        let checked = core::cmp::max(page, va);
        space.check_access(checked, write).map_err(|code| PageFault { va: checked, code })?;
        if page >= page_round_down(last) {
            return Ok(());
        }
        page += PGSIZE;
    }
}

static_assertions::const_assert!(is_page_aligned(USTACKTOP));

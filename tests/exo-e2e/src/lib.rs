// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host machine that runs user programs on the exokernel core
//! OWNERS: @kernel-team
//! PUBLIC API: Machine (new/spawn/run/kernel/console), Report, Failure, Program
//! DEPENDS_ON: exokern::Kernel, exo_user::Platform
//! INVARIANTS: Exactly one environment thread runs at a time; every kernel entry goes
//!             through `Kernel::trap`; a forked child replays its parent's recorded syscall
//!             results and memory reads up to the fork, then runs live
//!
//! The main thread plays the CPU: it hands the resume frame to the environment thread the
//! kernel picked and waits for that thread's next trap. A page fault raised by a user access
//! is delivered to the upcall; the trampoline's return path is emulated by writing the
//! trap-time `eip` below the trap-time stack pointer and retrying the access.

#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use exo_abi::env::{EnvId, EnvStatus};
use exo_abi::mmu::{FaultCode, Pde, Perm, Pte, PGSIZE, USTACKTOP, UTEXT};
use exo_abi::trap::{UTrapframe, T_PGFLT, T_SYSCALL};
use exo_abi::{EnvRecord, Syscall};
use exo_user::{Platform, Runtime};
use exokern::{CpuId, EnvImage, HostHandles, Kernel, KernelConfig, Resume, Segment, TrapFrame};

/// Address of the page-fault trampoline inside the text page.
pub const UPCALL_ENTRY: u32 = UTEXT + 0x10;
/// Initial user stack pointer of boot environments.
pub const INITIAL_ESP: u32 = USTACKTOP - 512;

const CPU: CpuId = CpuId::BOOT;
const TEXT: [u8; 32] = [0xcc; 32];
const FAULT_RETRIES: usize = 64;
const DEFAULT_STEP_LIMIT: u64 = 200_000;

/// A user program. Forked children run the same program from the top.
pub type Program = Arc<dyn Fn(&mut dyn Platform) + Send + Sync>;

/// Why a run stopped abnormally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// A program panicked (e.g. a failed assertion).
    Panicked { env: EnvId, message: String },
    /// The kernel scheduled an environment with no program.
    Unregistered(EnvId),
    /// Too many kernel entries; likely a livelock.
    StepLimit(u64),
    /// The environment thread vanished without a trap.
    Lost(EnvId),
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Panicked { env, message } => write!(f, "env {} panicked: {}", env, message),
            Self::Unregistered(env) => write!(f, "env {} has no program", env),
            Self::StepLimit(steps) => write!(f, "step limit reached after {} traps", steps),
            Self::Lost(env) => write!(f, "env {} stopped without trapping", env),
        }
    }
}

impl std::error::Error for Failure {}

/// Result of a run that ended with the CPU halted.
#[derive(Debug, Clone)]
pub struct Report {
    /// Console output produced by `sys_cputs`.
    pub output: String,
    /// Environments still alive (blocked) when the CPU halted.
    pub blocked: Vec<EnvId>,
    /// Kernel entries taken.
    pub steps: u64,
    /// Page faults taken, as `(env, fault_va)` in trap order.
    pub faults: Vec<(EnvId, u32)>,
}

/// One recorded observation of a live environment, replayed by its forked children.
#[derive(Clone, Debug)]
enum Event {
    Ret(i32),
    Read(Vec<u8>),
    Entry(Pte),
    Record(EnvRecord),
}

#[derive(Clone)]
struct ForkState {
    log: Vec<Event>,
    runtime: Runtime,
}

enum Deliver {
    Resume(TrapFrame),
    Kill,
}

enum Request {
    Trap { frame: TrapFrame, fault_va: u32, fork: Option<ForkState> },
    Panicked(String),
    Returned,
}

/// Unwinding marker used to stop an environment thread.
struct EnvExited;

struct Slot {
    program: Program,
    fork: Option<ForkState>,
    thread: Option<(Sender<Deliver>, JoinHandle<()>)>,
}

/// A single-CPU machine running user programs against the kernel.
pub struct Machine {
    kernel: Arc<Kernel>,
    handles: HostHandles,
    slots: BTreeMap<EnvId, Slot>,
    requests: Receiver<(EnvId, Request)>,
    request_tx: Sender<(EnvId, Request)>,
    step_limit: u64,
}

impl Machine {
    pub fn new(config: KernelConfig) -> Self {
        let (kernel, handles) = match Kernel::new(config) {
            Ok(pair) => pair,
            Err(err) => panic!("invalid kernel config: {}", err),
        };
        if std::env::var_os("EXO_LOG").is_some() {
            let sink: exokern::diag::log::Sink = |line| eprintln!("{}", line);
            exokern::diag::log::set_sink(Some(sink));
        }
        let (request_tx, requests) = mpsc::channel();
        Self {
            kernel: Arc::new(kernel),
            handles,
            slots: BTreeMap::new(),
            requests,
            request_tx,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    /// Creates a boot environment running `program`.
    pub fn spawn<F>(&mut self, program: F) -> EnvId
    where
        F: Fn(&mut dyn Platform) + Send + Sync + 'static,
    {
        let segments = [Segment { va: UTEXT, data: &TEXT, mem_size: PGSIZE, perm: Perm::USER }];
        let id = match self.kernel.create_env(&EnvImage { entry: UTEXT, segments: &segments }) {
            Ok(id) => id,
            Err(err) => panic!("create_env failed: {:?}", err),
        };
        self.slots.insert(id, Slot { program: Arc::new(program), fork: None, thread: None });
        id
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Console output so far.
    pub fn console(&self) -> String {
        String::from_utf8_lossy(&self.handles.console.output()).into_owned()
    }

    pub fn handles(&self) -> &HostHandles {
        &self.handles
    }

    /// Runs until the CPU halts.
    pub fn run(&mut self) -> Result<Report, Failure> {
        let mut resume = self.kernel.boot(CPU);
        let mut steps = 0u64;
        let mut faults = Vec::new();
        loop {
            let (env, frame) = match resume {
                Resume::Halt => break,
                Resume::User { env, frame } => (env, frame),
            };
            steps += 1;
            if steps > self.step_limit {
                self.shutdown();
                return Err(Failure::StepLimit(steps));
            }
            self.deliver(env, frame)?;
            let (from, request) = match self.requests.recv() {
                Ok(message) => message,
                Err(_) => return Err(Failure::Lost(env)),
            };
            if from != env {
                return Err(Failure::Lost(env));
            }
            match request {
                Request::Trap { frame, fault_va, fork } => {
                    if frame.trapno == T_PGFLT {
                        faults.push((env, fault_va));
                    }
                    resume = self.kernel.trap(CPU, frame, fault_va);
                    if let Some(fork) = fork {
                        self.adopt_children(env, fork);
                    }
                    self.reap();
                }
                Request::Panicked(message) => {
                    self.finish(env);
                    self.shutdown();
                    return Err(Failure::Panicked { env, message });
                }
                Request::Returned => {
                    self.finish(env);
                    self.shutdown();
                    return Err(Failure::Lost(env));
                }
            }
        }
        let blocked = self.slots.keys().copied().filter(|id| self.is_live(*id)).collect();
        self.shutdown();
        Ok(Report { output: self.console(), blocked, steps, faults })
    }

    fn deliver(&mut self, env: EnvId, frame: TrapFrame) -> Result<(), Failure> {
        let kernel = self.kernel.clone();
        let requests = self.request_tx.clone();
        let slot = self.slots.get_mut(&env).ok_or(Failure::Unregistered(env))?;
        if slot.thread.is_none() {
            let (tx, rx) = mpsc::channel();
            let program = slot.program.clone();
            let fork = slot.fork.take();
            let handle = thread::Builder::new()
                .name(format!("env-{}", env))
                .spawn(move || env_main(env, kernel, program, fork, rx, requests))
                .map_err(|_| Failure::Lost(env))?;
            slot.thread = Some((tx, handle));
        }
        match &slot.thread {
            Some((tx, _)) => tx.send(Deliver::Resume(frame)).map_err(|_| Failure::Lost(env)),
            None => Err(Failure::Lost(env)),
        }
    }

    /// Registers children created by `parent`'s exofork.
    fn adopt_children(&mut self, parent: EnvId, fork: ForkState) {
        let Some(program) = self.slots.get(&parent).map(|slot| slot.program.clone()) else {
            return;
        };
        let children: Vec<EnvId> = self.kernel.inspect(|state| {
            state
                .envs()
                .iter_live()
                .filter(|env| env.parent_id == parent)
                .map(|env| env.id)
                .collect()
        });
        for child in children {
            self.slots.entry(child).or_insert_with(|| Slot {
                program: program.clone(),
                fork: Some(fork.clone()),
                thread: None,
            });
        }
    }

    fn is_live(&self, id: EnvId) -> bool {
        let record = self.kernel.env_record(id.index());
        record.id == id && record.status != EnvStatus::Free
    }

    /// Stops threads of environments the kernel has freed.
    fn reap(&mut self) {
        let gone: Vec<EnvId> = self.slots.keys().copied().filter(|id| !self.is_live(*id)).collect();
        for id in gone {
            self.finish(id);
        }
    }

    fn finish(&mut self, id: EnvId) {
        if let Some(slot) = self.slots.remove(&id) {
            if let Some((tx, handle)) = slot.thread {
                let _ = tx.send(Deliver::Kill);
                drop(tx);
                let _ = handle.join();
            }
        }
    }

    fn shutdown(&mut self) {
        let ids: Vec<EnvId> = self.slots.keys().copied().collect();
        for id in ids {
            self.finish(id);
        }
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn env_main(
    id: EnvId,
    kernel: Arc<Kernel>,
    program: Program,
    fork: Option<ForkState>,
    rx: Receiver<Deliver>,
    requests: Sender<(EnvId, Request)>,
) {
    let mut env = EnvPlatform::new(id, kernel, fork, rx, requests.clone());
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        env.frame = env.wait();
        if !env.replaying() {
            env.frame.esp = INITIAL_ESP;
        }
        program(&mut env);
        exo_user::exit(&mut env);
    }));
    let request = match outcome {
        Ok(()) => Request::Returned,
        Err(payload) if payload.is::<EnvExited>() => return,
        Err(payload) => Request::Panicked(panic_message(payload.as_ref())),
    };
    let _ = requests.send((id, request));
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        String::from("non-string panic payload")
    }
}

/// [`Platform`] of one simulated environment.
struct EnvPlatform {
    id: EnvId,
    kernel: Arc<Kernel>,
    frame: TrapFrame,
    runtime: Runtime,
    /// Observations of this environment, inherited by its forked children.
    log: RefCell<Vec<Event>>,
    /// Parent observations still to replay, and the runtime to adopt at the fork point.
    replay: RefCell<Option<(VecDeque<Event>, Runtime)>>,
    /// Upcall nesting; observations inside handlers are not recorded.
    depth: usize,
    rx: Receiver<Deliver>,
    requests: Sender<(EnvId, Request)>,
}

impl EnvPlatform {
    fn new(
        id: EnvId,
        kernel: Arc<Kernel>,
        fork: Option<ForkState>,
        rx: Receiver<Deliver>,
        requests: Sender<(EnvId, Request)>,
    ) -> Self {
        Self {
            id,
            kernel,
            frame: TrapFrame::default(),
            runtime: Runtime::default(),
            log: RefCell::new(Vec::new()),
            replay: RefCell::new(fork.map(|state| (state.log.into(), state.runtime))),
            depth: 0,
            rx,
            requests,
        }
    }

    fn wait(&mut self) -> TrapFrame {
        match self.rx.recv() {
            Ok(Deliver::Resume(frame)) => frame,
            Ok(Deliver::Kill) | Err(_) => panic::resume_unwind(Box::new(EnvExited)),
        }
    }

    fn trap(&mut self, frame: TrapFrame, fault_va: u32, fork: Option<ForkState>) -> TrapFrame {
        if self.requests.send((self.id, Request::Trap { frame, fault_va, fork })).is_err() {
            panic::resume_unwind(Box::new(EnvExited));
        }
        self.wait()
    }

    fn replaying(&self) -> bool {
        self.replay.borrow().is_some()
    }

    /// Next parent observation; `None` once the fork point is reached.
    fn replayed(&self) -> Option<Event> {
        let event = self.replay.borrow_mut().as_mut()?.0.pop_front();
        if let Some(event) = &event {
            self.log.borrow_mut().push(event.clone());
        }
        event
    }

    fn record(&self, event: Event) {
        if self.depth == 0 {
            self.log.borrow_mut().push(event);
        }
    }

    fn observe_entry(&self, live: impl FnOnce() -> Pte) -> Pte {
        if self.replaying() {
            return match self.replayed() {
                Some(Event::Entry(entry)) => entry,
                _ => panic!("replay diverged at a page table lookup"),
            };
        }
        let entry = live();
        self.record(Event::Entry(entry));
        entry
    }

    /// Raises a page fault for `va` and runs the user handler the kernel upcalls.
    fn fault(&mut self, va: u32, code: FaultCode) {
        let mut tf = self.frame;
        tf.trapno = T_PGFLT;
        tf.err = code.bits();
        let resumed = self.trap(tf, va, None);
        assert_eq!(resumed.eip, UPCALL_ENTRY, "fault at {:08x} resumed outside the upcall", va);

        let mut raw = [0u8; UTrapframe::SIZE];
        if let Err(err) = self.kernel.user_read(self.id, resumed.esp, &mut raw) {
            panic!("exception record unreadable at {:08x}: {:?}", err.va, err.code);
        }
        let utf = UTrapframe::from_bytes(&raw);

        self.frame = resumed;
        self.depth += 1;
        exo_user::pgfault::upcall(self, &utf);
        // Trampoline return: push the trap-time eip on the trap-time stack.
        self.store(utf.esp.wrapping_sub(4), &utf.eip.to_le_bytes());
        self.depth -= 1;

        self.frame.regs = utf.regs;
        self.frame.eflags = utf.eflags;
        self.frame.eip = utf.eip;
        self.frame.esp = utf.esp;
    }

    fn store(&mut self, va: u32, data: &[u8]) {
        for _ in 0..FAULT_RETRIES {
            match self.kernel.user_write(self.id, va, data) {
                Ok(()) => return,
                Err(fault) => self.fault(fault.va, fault.code),
            }
        }
        panic!("write at {:08x} keeps faulting", va);
    }

    fn load(&mut self, va: u32, buf: &mut [u8]) {
        for _ in 0..FAULT_RETRIES {
            match self.kernel.user_read(self.id, va, buf) {
                Ok(()) => return,
                Err(fault) => self.fault(fault.va, fault.code),
            }
        }
        panic!("read at {:08x} keeps faulting", va);
    }
}

impl Platform for EnvPlatform {
    fn syscall(&mut self, num: Syscall, args: [u32; 5]) -> i32 {
        if self.replaying() {
            match self.replayed() {
                Some(Event::Ret(ret)) => return ret,
                Some(_) => panic!("replay diverged at {:?}", num),
                None => {
                    assert_eq!(num, Syscall::Exofork, "replay ended at {:?}, not at the fork", num);
                    if let Some((_, runtime)) = self.replay.take() {
                        self.runtime = runtime;
                    }
                    self.log.borrow_mut().push(Event::Ret(0));
                    return 0;
                }
            }
        }

        let mut tf = self.frame;
        tf.trapno = T_SYSCALL;
        tf.regs.eax = num.number();
        tf.regs.edx = args[0];
        tf.regs.ecx = args[1];
        tf.regs.ebx = args[2];
        tf.regs.edi = args[3];
        tf.regs.esi = args[4];
        let fork = (num == Syscall::Exofork && self.depth == 0)
            .then(|| ForkState { log: self.log.borrow().clone(), runtime: self.runtime });
        let resumed = self.trap(tf, 0, fork);
        self.frame = resumed;
        let ret = resumed.regs.eax as i32;
        self.record(Event::Ret(ret));
        ret
    }

    fn read(&mut self, va: u32, buf: &mut [u8]) {
        if self.replaying() {
            match self.replayed() {
                Some(Event::Read(bytes)) if bytes.len() == buf.len() => {
                    buf.copy_from_slice(&bytes);
                    return;
                }
                _ => panic!("replay diverged at read of {:08x}", va),
            }
        }
        self.load(va, buf);
        self.record(Event::Read(buf.to_vec()));
    }

    fn write(&mut self, va: u32, data: &[u8]) {
        if self.replaying() {
            // The parent already performed it; the child inherited the result.
            return;
        }
        self.store(va, data);
    }

    fn uvpd(&self, pdx: usize) -> Pde {
        self.observe_entry(|| self.kernel.uvpd(self.id, pdx))
    }

    fn uvpt(&self, pgnum: usize) -> Pte {
        self.observe_entry(|| self.kernel.uvpt(self.id, pgnum))
    }

    fn env(&self, index: usize) -> EnvRecord {
        if self.replaying() {
            return match self.replayed() {
                Some(Event::Record(record)) => record,
                _ => panic!("replay diverged at env table slot {}", index),
            };
        }
        let record = self.kernel.env_record(index);
        self.record(Event::Record(record));
        record
    }

    fn upcall_entry(&self) -> u32 {
        UPCALL_ENTRY
    }

    fn runtime(&mut self) -> &mut Runtime {
        &mut self.runtime
    }
}

/// `PRESENT | USER | WRITABLE`.
pub const URW: Perm = Perm::PRESENT.union(Perm::USER).union(Perm::WRITABLE);

/// Allocates a zeroed writable page at `va` in the calling environment.
pub fn alloc_page(p: &mut dyn Platform, va: u32) {
    if let Err(err) = exo_user::sys::page_alloc(p, EnvId::SELF, va, URW) {
        panic!("page_alloc {:08x}: {}", va, err);
    }
}

/// Reads a little-endian word from user memory.
pub fn load_u32(p: &mut dyn Platform, va: u32) -> u32 {
    let mut raw = [0u8; 4];
    p.read(va, &mut raw);
    u32::from_le_bytes(raw)
}

/// Writes a little-endian word to user memory.
pub fn store_u32(p: &mut dyn Platform, va: u32, value: u32) {
    p.write(va, &value.to_le_bytes());
}

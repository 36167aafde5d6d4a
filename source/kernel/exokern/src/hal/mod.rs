// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Device contracts the core depends on
//! OWNERS: @kernel-hal-team
//! PUBLIC API: Console, InterruptController, Monitor, MonitorAction, Devices
//! INVARIANTS: Devices are only touched under the dispatch lock

extern crate alloc;

use alloc::boxed::Box;

use exo_abi::env::EnvId;

use crate::trap::TrapFrame;

pub mod host;

/// Character console.
pub trait Console: Send {
    fn putc(&mut self, byte: u8);
    /// Non-blocking read of one buffered input byte.
    fn getc(&mut self) -> Option<u8>;
    /// Drains device input into the console buffer (keyboard/serial interrupt).
    fn poll(&mut self) {}
}

/// Interrupt controller acknowledgement.
pub trait InterruptController: Send {
    fn eoi(&mut self, irq: u32);
}

/// What the kernel does after the debugger hook returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    Resume,
    Kill,
}

/// Debugger hook invoked for breakpoint and debug traps.
pub trait Monitor: Send {
    fn breakpoint(&mut self, env: Option<EnvId>, tf: &TrapFrame) -> MonitorAction;
}

/// Device set owned by the kernel.
pub struct Devices {
    pub console: Box<dyn Console>,
    pub irq: Box<dyn InterruptController>,
    pub monitor: Box<dyn Monitor>,
}

impl Devices {
    /// In-memory devices; see [`host`].
    pub fn host() -> (Self, host::HostHandles) {
        let console = host::BufferedConsole::new();
        let irq = host::CountingIrq::new();
        let monitor = host::LoggingMonitor::new();
        let handles = host::HostHandles {
            console: console.handle(),
            eoi: irq.counter(),
            breakpoints: monitor.counter(),
        };
        let devices =
            Self { console: Box::new(console), irq: Box::new(irq), monitor: Box::new(monitor) };
        (devices, handles)
    }
}

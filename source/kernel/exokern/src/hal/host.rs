// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Host devices: buffered console, counting interrupt controller, logging monitor.

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use exo_abi::env::EnvId;
use spin::Mutex;

use super::{Console, InterruptController, Monitor, MonitorAction};
use crate::trap::{self, TrapFrame};

#[derive(Default)]
struct ConsoleState {
    output: Vec<u8>,
    /// Bytes the device has latched but the kernel has not drained yet.
    device: VecDeque<u8>,
    buffer: VecDeque<u8>,
}

/// Shared view of a [`BufferedConsole`] for the host side.
#[derive(Clone, Default)]
pub struct ConsoleHandle(Arc<Mutex<ConsoleState>>);

impl ConsoleHandle {
    /// Everything printed so far.
    pub fn output(&self) -> Vec<u8> {
        self.0.lock().output.clone()
    }

    /// Queues keyboard/serial input; visible to `cgetc` after the next poll.
    pub fn type_input(&self, bytes: &[u8]) {
        self.0.lock().device.extend(bytes.iter().copied());
    }
}

pub struct BufferedConsole {
    state: ConsoleHandle,
}

impl BufferedConsole {
    pub fn new() -> Self {
        Self { state: ConsoleHandle::default() }
    }

    pub fn handle(&self) -> ConsoleHandle {
        self.state.clone()
    }
}

impl Default for BufferedConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl Console for BufferedConsole {
    fn putc(&mut self, byte: u8) {
        self.state.0.lock().output.push(byte);
    }

    fn getc(&mut self) -> Option<u8> {
        self.poll();
        self.state.0.lock().buffer.pop_front()
    }

    fn poll(&mut self) {
        let mut state = self.state.0.lock();
        while let Some(byte) = state.device.pop_front() {
            // NUL is not a character
            if byte != 0 {
                state.buffer.push_back(byte);
            }
        }
    }
}

pub struct CountingIrq {
    eoi: Arc<AtomicU32>,
}

impl CountingIrq {
    pub fn new() -> Self {
        Self { eoi: Arc::new(AtomicU32::new(0)) }
    }

    pub fn counter(&self) -> Arc<AtomicU32> {
        self.eoi.clone()
    }
}

impl Default for CountingIrq {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptController for CountingIrq {
    fn eoi(&mut self, _irq: u32) {
        self.eoi.fetch_add(1, Ordering::Relaxed);
    }
}

/// Logs the frame and resumes the environment.
pub struct LoggingMonitor {
    hits: Arc<AtomicU32>,
}

impl LoggingMonitor {
    pub fn new() -> Self {
        Self { hits: Arc::new(AtomicU32::new(0)) }
    }

    pub fn counter(&self) -> Arc<AtomicU32> {
        self.hits.clone()
    }
}

impl Default for LoggingMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor for LoggingMonitor {
    fn breakpoint(&mut self, env: Option<EnvId>, tf: &TrapFrame) -> MonitorAction {
        self.hits.fetch_add(1, Ordering::Relaxed);
        crate::log_info!(
            target: "monitor",
            "{} in env {} at eip {:08x}",
            trap::trap_name(tf.trapno),
            env.unwrap_or_default(),
            tf.eip
        );
        MonitorAction::Resume
    }
}

/// Host-side handles onto the devices returned by [`super::Devices::host`].
#[derive(Clone)]
pub struct HostHandles {
    pub console: ConsoleHandle,
    pub eoi: Arc<AtomicU32>,
    pub breakpoints: Arc<AtomicU32>,
}

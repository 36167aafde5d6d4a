// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Minimal structured logging with severity levels
//! OWNERS: @kernel-team
//! PUBLIC API: log_* macros, emit(level,target,args), set_sink, snapshot, drain
//! DEPENDS_ON: spin::Mutex, alloc
//! INVARIANTS: Debug/Trace only in debug builds; single-line records; bounded history

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::{Arguments, Write};

use spin::Mutex;

/// Records kept in the in-kernel history before the oldest is dropped.
pub const HISTORY_LEN: usize = 256;

/// Logging severity used by the kernel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Level {
    const fn tag(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    const fn enabled(self) -> bool {
        match self {
            Level::Debug | Level::Trace => cfg!(debug_assertions),
            _ => true,
        }
    }
}

/// Receives every emitted record after it is formatted.
pub type Sink = fn(&str);

struct History {
    lines: VecDeque<String>,
    capacity: usize,
}

impl History {
    const fn new(capacity: usize) -> Self {
        Self { lines: VecDeque::new(), capacity }
    }

    fn push(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }
}

static HISTORY: Mutex<History> = Mutex::new(History::new(HISTORY_LEN));
static SINK: Mutex<Option<Sink>> = Mutex::new(None);

/// Installs (or removes) the forwarding sink.
pub fn set_sink(sink: Option<Sink>) {
    *SINK.lock() = sink;
}

/// Emits a structured log line if the level is enabled for the current build.
pub fn emit(level: Level, target: &'static str, args: Arguments<'_>) {
    if !level.enabled() {
        return;
    }

    let mut line = String::new();
    let _ = write!(line, "[{} {}] ", level.tag(), target);
    let _ = line.write_fmt(args);

    let sink = *SINK.lock();
    if let Some(sink) = sink {
        sink(&line);
    }

    HISTORY.lock().push(line);
}

/// Copies the retained history, oldest first.
pub fn snapshot() -> Vec<String> {
    HISTORY.lock().lines.iter().cloned().collect()
}

/// Takes the retained history, leaving it empty.
pub fn drain() -> Vec<String> {
    HISTORY.lock().lines.drain(..).collect()
}

#[macro_export]
macro_rules! log_error {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Error, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::log::emit(
            $crate::diag::log::Level::Error,
            module_path!(),
            format_args!($($arg)+),
        );
    }};
}

#[macro_export]
macro_rules! log_warn {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Warn, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::log::emit(
            $crate::diag::log::Level::Warn,
            module_path!(),
            format_args!($($arg)+),
        );
    }};
}

#[macro_export]
macro_rules! log_info {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Info, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::log::emit(
            $crate::diag::log::Level::Info,
            module_path!(),
            format_args!($($arg)+),
        );
    }};
}

#[macro_export]
macro_rules! log_debug {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Debug, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::log::emit(
            $crate::diag::log::Level::Debug,
            module_path!(),
            format_args!($($arg)+),
        );
    }};
}

#[macro_export]
macro_rules! log_trace {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Trace, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::log::emit(
            $crate::diag::log::Level::Trace,
            module_path!(),
            format_args!($($arg)+),
        );
    }};
}

// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Console output through `sys_cputs`.
//!
//! Text is staged in a scratch window at the top of the normal stack page because the
//! kernel only prints bytes that live in user memory.

use core::fmt::{self, Write};

use exo_abi::mmu::USTACKTOP;

use crate::platform::Platform;
use crate::sys;

const CHUNK: usize = 128;
/// User address the console stages text at.
pub const SCRATCH: u32 = USTACKTOP - CHUNK as u32;

/// Prints `text` on the console.
pub fn cputs(p: &mut dyn Platform, text: &str) {
    for chunk in text.as_bytes().chunks(CHUNK) {
        p.write(SCRATCH, chunk);
        let _ = sys::cputs(p, SCRATCH, chunk.len() as u32);
    }
}

/// Formats and prints `args`.
pub fn print(p: &mut dyn Platform, args: fmt::Arguments<'_>) {
    let mut out = Console { platform: p, buf: [0; CHUNK], len: 0 };
    let _ = out.write_fmt(args);
    out.flush();
}

struct Console<'a> {
    platform: &'a mut dyn Platform,
    buf: [u8; CHUNK],
    len: usize,
}

impl Console<'_> {
    fn flush(&mut self) {
        if self.len == 0 {
            return;
        }
        self.platform.write(SCRATCH, &self.buf[..self.len]);
        let _ = sys::cputs(self.platform, SCRATCH, self.len as u32);
        self.len = 0;
    }
}

impl Write for Console<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if self.len == CHUNK {
                self.flush();
            }
            self.buf[self.len] = byte;
            self.len += 1;
        }
        Ok(())
    }
}

// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Scripted [`Platform`] for unit tests: records syscalls and serves canned replies.

use std::collections::{BTreeMap, VecDeque};
use std::vec::Vec;

use exo_abi::env::{EnvId, EnvRecord};
use exo_abi::mmu::{Pde, Perm, Pte, NPTENTRIES};
use exo_abi::Syscall;

use crate::platform::{Platform, Runtime};

pub struct FakePlatform {
    pub id: EnvId,
    pub calls: Vec<(Syscall, [u32; 5])>,
    replies: Vec<(Syscall, VecDeque<i32>)>,
    pub ptes: BTreeMap<usize, Pte>,
    pub memory: BTreeMap<u32, u8>,
    pub envs: BTreeMap<usize, EnvRecord>,
    runtime: Runtime,
}

impl FakePlatform {
    pub const UPCALL: u32 = 0x0080_0020;

    pub fn new() -> Self {
        Self {
            id: EnvId::from_raw(0x1000),
            calls: Vec::new(),
            replies: Vec::new(),
            ptes: BTreeMap::new(),
            memory: BTreeMap::new(),
            envs: BTreeMap::new(),
            runtime: Runtime::default(),
        }
    }

    /// Queues `ret` as the next return value of `num`; unscripted calls return 0.
    pub fn reply(&mut self, num: Syscall, ret: i32) {
        match self.replies.iter_mut().find(|(n, _)| *n == num) {
            Some((_, queue)) => queue.push_back(ret),
            None => self.replies.push((num, VecDeque::from([ret]))),
        }
    }

    pub fn map(&mut self, va: u32, perm: Perm) {
        self.ptes.insert((va >> 12) as usize, Pte::new(va & !0xfff, perm | Perm::PRESENT));
    }

    pub fn calls_of(&self, num: Syscall) -> Vec<[u32; 5]> {
        self.calls.iter().filter(|(n, _)| *n == num).map(|(_, args)| *args).collect()
    }

    pub fn names(&self) -> Vec<Syscall> {
        self.calls.iter().map(|(n, _)| *n).collect()
    }
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for FakePlatform {
    fn syscall(&mut self, num: Syscall, args: [u32; 5]) -> i32 {
        self.calls.push((num, args));
        let scripted = self
            .replies
            .iter_mut()
            .find(|(n, _)| *n == num)
            .and_then(|(_, queue)| queue.pop_front());
        match (scripted, num) {
            (Some(ret), _) => ret,
            (None, Syscall::GetEnvId) => self.id.as_raw(),
            (None, _) => 0,
        }
    }

    fn read(&mut self, va: u32, buf: &mut [u8]) {
        for (offset, byte) in buf.iter_mut().enumerate() {
            *byte = self.memory.get(&(va + offset as u32)).copied().unwrap_or(0);
        }
    }

    fn write(&mut self, va: u32, data: &[u8]) {
        for (offset, byte) in data.iter().enumerate() {
            self.memory.insert(va + offset as u32, *byte);
        }
    }

    fn uvpd(&self, pdx: usize) -> Pde {
        let first = pdx * NPTENTRIES;
        if self.ptes.range(first..first + NPTENTRIES).next().is_some() {
            Pde::new(0x0020_0000, Perm::PRESENT | Perm::USER | Perm::WRITABLE)
        } else {
            Pde::EMPTY
        }
    }

    fn uvpt(&self, pgnum: usize) -> Pte {
        self.ptes.get(&pgnum).copied().unwrap_or_default()
    }

    fn env(&self, index: usize) -> EnvRecord {
        self.envs.get(&index).copied().unwrap_or_default()
    }

    fn upcall_entry(&self) -> u32 {
        Self::UPCALL
    }

    fn runtime(&mut self) -> &mut Runtime {
        &mut self.runtime
    }
}

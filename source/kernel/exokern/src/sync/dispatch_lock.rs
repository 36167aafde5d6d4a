// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: The single dispatch lock serialising every kernel visit
//! OWNERS: @kernel-sync-team
//! PUBLIC API: DispatchLock::new(), DispatchLock::enter(cpu), DispatchLock::lock()
//! DEPENDS_ON: spin::Mutex
//! INVARIANTS: One kernel visit per guard; same-CPU re-entry is a kernel bug and halts;
//!             the guard is released exactly where the router returns its resume decision

use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::types::CpuId;

const NO_OWNER: usize = 0;

/// Spin lock that remembers which CPU is inside the kernel.
pub struct DispatchLock<T> {
    inner: spin::Mutex<T>,
    owner: AtomicUsize,
}

impl<T> DispatchLock<T> {
    pub const fn new(value: T) -> Self {
        Self { inner: spin::Mutex::new(value), owner: AtomicUsize::new(NO_OWNER) }
    }

    /// Enters the kernel on `cpu`, spinning while another CPU holds the lock.
    pub fn enter(&self, cpu: CpuId) -> DispatchGuard<'_, T> {
        let tag = cpu.as_index() + 1;
        if self.owner.load(Ordering::Acquire) == tag {
            panic!("dispatch lock re-entered on cpu {}", cpu);
        }
        let guard = self.inner.lock();
        self.owner.store(tag, Ordering::Release);
        DispatchGuard { parent: self, guard, tracked: true }
    }

    /// Takes the lock for host-side access (MMU walks, inspection) without claiming a CPU.
    pub fn lock(&self) -> DispatchGuard<'_, T> {
        DispatchGuard { parent: self, guard: self.inner.lock(), tracked: false }
    }

    /// CPU currently inside the kernel, if any.
    pub fn holder(&self) -> Option<CpuId> {
        match self.owner.load(Ordering::Acquire) {
            NO_OWNER => None,
            tag => Some(CpuId::new((tag - 1) as u16)),
        }
    }
}

pub struct DispatchGuard<'a, T> {
    parent: &'a DispatchLock<T>,
    guard: spin::MutexGuard<'a, T>,
    tracked: bool,
}

impl<'a, T> Deref for DispatchGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<'a, T> DerefMut for DispatchGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl<'a, T> Drop for DispatchGuard<'a, T> {
    fn drop(&mut self) {
        if self.tracked {
            self.parent.owner.store(NO_OWNER, Ordering::Release);
        }
        // inner guard releases after this
    }
}

// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Two-level 32-bit paging model and user address-space layout
//! OWNERS: @kernel-mm-team
//! PUBLIC API: Perm, Pte, Pde, FaultCode, layout constants, pdx/ptx/pgnum helpers
//! INVARIANTS: COW and SHARED live in the software-available range and are never
//!             interpreted by the MMU; SYSCALL is the only mask user space may request
//!
//! ```text
//!  ULIM       0xef80_0000 +------------------------------+
//!                         |  read-only kernel views      |
//!  UTOP/UENVS 0xeec0_0000 +------------------------------+ UXSTACKTOP
//!                         |  user exception stack (1 pg) |
//!                         +------------------------------+
//!                         |  empty guard page            |
//!  USTACKTOP              +------------------------------+
//!                         |  normal user stack           |
//!                         ~            ...               ~
//!  UTEXT      0x0080_0000 +------------------------------+
//!  PFTEMP     0x007f_f000 |  fork scratch page           |
//!  UTEMP      0x0040_0000 +------------------------------+
//! ```

use bitflags::bitflags;

/// Bytes mapped by one page.
pub const PGSIZE: u32 = 4096;
/// log2(PGSIZE).
pub const PGSHIFT: u32 = 12;
/// Bytes mapped by one page directory entry.
pub const PTSIZE: u32 = PGSIZE * NPTENTRIES as u32;
/// Page directory entries per directory.
pub const NPDENTRIES: usize = 1024;
/// Page table entries per table.
pub const NPTENTRIES: usize = 1024;
/// Shift of the directory index inside a linear address.
pub const PDXSHIFT: u32 = 22;

/// Top of user-accessible memory (read-only kernel views end here).
pub const ULIM: u32 = 0xef80_0000;
/// Read-only view of the environment table.
pub const UENVS: u32 = 0xeec0_0000;
/// Top of user-writable memory; everything below is environment-controlled.
pub const UTOP: u32 = UENVS;
/// Top of the one-page user exception stack.
pub const UXSTACKTOP: u32 = UTOP;
/// Top of the normal user stack (one guard page below the exception stack).
pub const USTACKTOP: u32 = UTOP - 2 * PGSIZE;
/// Where program text is conventionally loaded.
pub const UTEXT: u32 = 2 * PTSIZE;
/// Scratch window used by user code for temporary mappings.
pub const UTEMP: u32 = PTSIZE;
/// Scratch page used by the COW fault handler.
pub const PFTEMP: u32 = UTEMP + PTSIZE - PGSIZE;

bitflags! {
    /// Permission bits carried by a page table entry.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Perm: u32 {
        /// Mapping is valid.
        const PRESENT = 0x001;
        /// Mapping may be written.
        const WRITABLE = 0x002;
        /// Mapping is reachable from user mode.
        const USER = 0x004;
        /// Software bit: page is shared verbatim across fork.
        const SHARED = 0x400;
        /// Software bit: page is copy-on-write.
        const COW = 0x800;
        /// Software-defined range, ignored by the MMU.
        const AVAIL = 0xe00;
        /// Bits a syscall is allowed to request.
        const SYSCALL = Self::AVAIL.bits()
            | Self::PRESENT.bits()
            | Self::WRITABLE.bits()
            | Self::USER.bits();
    }
}

impl Perm {
    /// Bits every user-requested mapping must carry.
    pub const REQUIRED: Perm = Perm::USER.union(Perm::PRESENT);

    /// Parses a permission word supplied through a syscall.
    ///
    /// Returns `None` unless `USER|PRESENT` are set and no bit outside
    /// [`Perm::SYSCALL`] is requested.
    pub fn from_syscall(raw: u32) -> Option<Self> {
        let perm = Self::from_bits(raw)?;
        if !perm.contains(Self::REQUIRED) || !Self::SYSCALL.contains(perm) {
            return None;
        }
        Some(perm)
    }
}

bitflags! {
    /// Error code pushed by the MMU on a page fault.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FaultCode: u32 {
        /// Protection violation (page present).
        const PROTECTION = 0x1;
        /// Fault caused by a write.
        const WRITE = 0x2;
        /// Fault taken in user mode.
        const USER = 0x4;
    }
}

/// Raw page table entry: physical frame address in the high 20 bits, permissions below.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct Pte(pub u32);

impl Pte {
    /// Entry for an unmapped page.
    pub const EMPTY: Pte = Pte(0);

    /// Builds an entry for physical address `pa` with `perm`.
    pub const fn new(pa: u32, perm: Perm) -> Self {
        Self((pa & !(PGSIZE - 1)) | perm.bits())
    }

    /// Returns true when the entry maps a page.
    pub const fn is_present(self) -> bool {
        self.0 & Perm::PRESENT.bits() != 0
    }

    /// Physical address of the mapped frame.
    pub const fn addr(self) -> u32 {
        self.0 & !(PGSIZE - 1)
    }

    /// Permission bits of the entry.
    pub const fn perm(self) -> Perm {
        Perm::from_bits_truncate(self.0 & (PGSIZE - 1))
    }
}

/// Raw page directory entry; same encoding as [`Pte`].
pub type Pde = Pte;

/// Directory index of `va`.
pub const fn pdx(va: u32) -> usize {
    (va >> PDXSHIFT) as usize & (NPDENTRIES - 1)
}

/// Table index of `va` inside its directory slot.
pub const fn ptx(va: u32) -> usize {
    (va >> PGSHIFT) as usize & (NPTENTRIES - 1)
}

/// Linear page number of `va` (index into the flat user page-table view).
pub const fn pgnum(va: u32) -> usize {
    (va >> PGSHIFT) as usize
}

/// Rounds `va` down to its page boundary.
pub const fn page_round_down(va: u32) -> u32 {
    va & !(PGSIZE - 1)
}

/// Returns true if `va` is page aligned.
pub const fn is_page_aligned(va: u32) -> bool {
    va % PGSIZE == 0
}

static_assertions::const_assert_eq!(PFTEMP, 0x007f_f000);
static_assertions::const_assert_eq!(USTACKTOP, 0xeebf_e000);
static_assertions::const_assert!(Perm::SYSCALL.contains(Perm::COW));
static_assertions::const_assert!(Perm::SYSCALL.contains(Perm::SHARED));

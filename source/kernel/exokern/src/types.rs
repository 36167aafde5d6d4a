// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Newtypes for safer syscall decoding
//! OWNERS: @kernel-team
//! PUBLIC API: CpuId, UserPage, PageTarget
//! DEPENDS_ON: exo_abi::mmu
//! INVARIANTS: UserPage is page aligned and below UTOP; PageTarget keeps "no page" explicit

use core::fmt;

use exo_abi::mmu::{is_page_aligned, UTOP};

/// Logical CPU number.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct CpuId(u16);

impl CpuId {
    pub const BOOT: CpuId = CpuId(0);

    #[inline]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Page-aligned user address strictly below `UTOP`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UserPage(u32);

impl UserPage {
    #[inline]
    pub fn new(va: u32) -> Option<Self> {
        if va < UTOP && is_page_aligned(va) {
            Some(Self(va))
        } else {
            None
        }
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// A page address argument where anything at or above `UTOP` means "no page".
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PageTarget {
    Page(UserPage),
    NoPage,
}

impl PageTarget {
    /// Decodes `va`; `None` for a misaligned address below `UTOP`.
    #[inline]
    pub fn decode(va: u32) -> Option<Self> {
        if va >= UTOP {
            Some(Self::NoPage)
        } else {
            UserPage::new(va).map(Self::Page)
        }
    }

    /// Raw address stored in the mailbox.
    #[inline]
    pub fn raw(self) -> u32 {
        match self {
            Self::Page(page) => page.raw(),
            Self::NoPage => UTOP,
        }
    }
}

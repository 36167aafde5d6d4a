// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Address-space primitives: frames, page tables, per-environment spaces
//! OWNERS: @kernel-mm-team
//! PUBLIC API: FramePool, Frame, AddressSpace, PageTable, MapError, resolve_share
//! DEPENDS_ON: exo_abi::mmu
//! INVARIANTS: No mapping becomes writable through a copy of a read-only source

pub mod address_space;
pub mod frame;
pub mod page_table;


pub use address_space::AddressSpace;
pub use frame::{Frame, FrameData, FramePool};
pub use page_table::{MapError, PageTable};

use exo_abi::mmu::{Perm, Pte};

/// Validates sharing the page behind `source` with `perm` and returns its frame.
pub fn resolve_share(source: Option<Pte>, perm: Perm) -> Result<Frame, MapError> {
    let pte = source.ok_or(MapError::NotMapped)?;
    if perm.contains(Perm::WRITABLE) && !pte.perm().contains(Perm::WRITABLE) {
        return Err(MapError::WriteEscalation);
    }
    Ok(Frame::from_addr(pte.addr()))
}

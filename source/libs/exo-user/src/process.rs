// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Environment lifecycle helpers.

use exo_abi::env::{EnvId, EnvStatus};

use crate::platform::Platform;
use crate::sys;

/// Identifier of the running environment, cached in the runtime after the first lookup.
pub fn this_env(p: &mut dyn Platform) -> EnvId {
    if let Some(id) = p.runtime().this_env {
        return id;
    }
    let id = sys::getenvid(p);
    p.runtime().this_env = Some(id);
    id
}

/// Destroys the calling environment.
pub fn exit(p: &mut dyn Platform) {
    let _ = sys::env_destroy(p, EnvId::SELF);
}

/// Yields until `id` no longer names a live environment.
pub fn wait(p: &mut dyn Platform, id: EnvId) {
    loop {
        let record = p.env(id.index());
        if record.id != id || record.status == EnvStatus::Free {
            return;
        }
        sys::yield_(p);
    }
}

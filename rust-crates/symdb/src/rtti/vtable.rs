// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Virtual function table extraction.
//!
//! A vtable starts with the offset-to-top and RTTI pointer words, followed
//! by the function pointers. The table has no explicit length: we stop at
//! the first zero word. Pure virtual slots are zero in the file as well and
//! only receive their value at load time, so a zero word with a pending
//! `__cxa_pure_virtual` relocation is treated as an entry.
//!
//! This is a heuristic: it assumes one relocation per patched slot and that
//! no other zero-valued slots exist.

use super::{DataView, Result, VTableRecord};
use crate::{debug, VirtAddr};
use std::collections::HashSet;

/// Extracts the vtable at `address`.
///
/// `pending_pure_virtual` is the set of slot addresses computed by
/// [`classify`](super::classify). Reaching the end of the section terminates
/// the table as well.
pub fn extract(
    view: &DataView<'_>,
    address: VirtAddr,
    pending_pure_virtual: &HashSet<VirtAddr>,
) -> Result<VTableRecord> {
    let ptr = view.ptr_size() as u64;

    // The header must be readable, otherwise this isn't a vtable we own.
    view.read_ptr(address)?;
    view.read_ptr(address + ptr)?;

    let mut entries = Vec::new();
    let mut slot = address + 2 * ptr;
    while view.contains(slot) {
        let Ok(target) = view.read_ptr(slot) else {
            break;
        };
        if target == 0 && !pending_pure_virtual.contains(&slot) {
            break;
        }
        entries.push(target);
        slot += ptr;
    }

    if entries.is_empty() {
        debug!("implausible vtable at {address:#x}: no entries");
    }

    Ok(VTableRecord { address, entries })
}

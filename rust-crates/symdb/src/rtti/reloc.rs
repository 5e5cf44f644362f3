// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Relocation-driven classification of `type_info` records.
//!
//! Every class `type_info` record starts with a pointer into the vtable of
//! one of the three `__cxxabiv1` implementation classes. In a shared object
//! these vtables are imports, so each record carries an absolute relocation
//! against one of them: the relocated symbol tells us the record kind
//! without looking at a single byte of the record.

use super::{Error, Result, TypeInfoKind};
use crate::debug;
use crate::objfile::{DynSymbol, Relocation};
use crate::VirtAddr;
use std::collections::{HashMap, HashSet};

/// Vtable of `__cxxabiv1::__class_type_info`.
pub const CLASS_TYPE_INFO: &str = "_ZTVN10__cxxabiv117__class_type_infoE";

/// Vtable of `__cxxabiv1::__si_class_type_info`.
pub const SI_CLASS_TYPE_INFO: &str = "_ZTVN10__cxxabiv120__si_class_type_infoE";

/// Vtable of `__cxxabiv1::__vmi_class_type_info`.
pub const VMI_CLASS_TYPE_INFO: &str = "_ZTVN10__cxxabiv121__vmi_class_type_infoE";

/// Placeholder the runtime puts into pure virtual vtable slots.
pub const PURE_VIRTUAL: &str = "__cxa_pure_virtual";

/// `R_X86_64_64`
pub const R_X86_64_64: u32 = 1;

/// `R_AARCH64_ABS64`
pub const R_AARCH64_ABS64: u32 = 257;

/// Checks whether the raw ELF relocation type patches in an absolute address.
pub fn is_absolute(r_type: u32) -> bool {
    matches!(r_type, R_X86_64_64 | R_AARCH64_ABS64)
}

/// `.dynsym` indices of the runtime support symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSymbols {
    /// Index of [`CLASS_TYPE_INFO`].
    pub class: usize,
    /// Index of [`SI_CLASS_TYPE_INFO`].
    pub si_class: usize,
    /// Index of [`VMI_CLASS_TYPE_INFO`].
    pub vmi_class: usize,
    /// Index of [`PURE_VIRTUAL`].
    pub pure_virtual: usize,
}

impl RuntimeSymbols {
    /// Locates the runtime support imports in a single scan.
    ///
    /// Only undefined (zero-valued) symbols are considered.
    pub fn find(symbols: &[DynSymbol]) -> Result<Self> {
        let mut found = [None; 4];
        let wanted = [
            CLASS_TYPE_INFO,
            SI_CLASS_TYPE_INFO,
            VMI_CLASS_TYPE_INFO,
            PURE_VIRTUAL,
        ];

        for sym in symbols.iter().filter(|x| x.address == 0) {
            if let Some(slot) = wanted.iter().position(|&x| x.as_bytes() == &*sym.name) {
                found[slot].get_or_insert(sym.index);
            }
        }

        let get = |slot: usize| found[slot].ok_or(Error::MissingRuntimeSymbol(wanted[slot]));
        Ok(RuntimeSymbols {
            class: get(0)?,
            si_class: get(1)?,
            vmi_class: get(2)?,
            pure_virtual: get(3)?,
        })
    }

    fn kind_of(&self, symbol: usize) -> Option<TypeInfoKind> {
        Some(match symbol {
            x if x == self.class => TypeInfoKind::NoInherit,
            x if x == self.si_class => TypeInfoKind::SingleInherit,
            x if x == self.vmi_class => TypeInfoKind::VirtualMultiInherit,
            _ => return None,
        })
    }
}

/// Address-keyed result of [`classify`]. Built once, read-only afterwards.
#[derive(Debug, Default, Clone)]
pub struct Classification {
    /// Kind of every `type_info` record, keyed by record address.
    pub kinds: HashMap<VirtAddr, TypeInfoKind>,
    /// Vtable slots that the loader patches to `__cxa_pure_virtual`.
    pub pending_pure_virtual: HashSet<VirtAddr>,
}

/// Classifies `type_info` records and pure virtual slots.
///
/// Fails if the runtime support symbols are absent: such a binary isn't
/// recognizable as being built against a standard C++ runtime.
pub fn classify(symbols: &[DynSymbol], relocs: &[Relocation]) -> Result<Classification> {
    let runtime = RuntimeSymbols::find(symbols)?;
    debug!("C++ runtime symbol indices: {runtime:?}");

    let mut out = Classification::default();
    for reloc in relocs.iter().filter(|x| is_absolute(x.r_type)) {
        let Some(symbol) = reloc.symbol else {
            continue;
        };
        if symbol >= symbols.len() {
            return Err(Error::BadSymbolIndex {
                offset: reloc.offset,
                symbol,
            });
        }

        if let Some(kind) = runtime.kind_of(symbol) {
            out.kinds.insert(reloc.offset, kind);
        } else if symbol == runtime.pure_virtual {
            out.pending_pure_virtual.insert(reloc.offset);
        }
    }

    debug!(
        "classified {} type infos, {} pending pure virtual slots",
        out.kinds.len(),
        out.pending_pure_virtual.len(),
    );

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime_symbols() -> Vec<DynSymbol> {
        [
            ("", 0),
            ("memcpy", 0),
            (CLASS_TYPE_INFO, 0),
            (SI_CLASS_TYPE_INFO, 0),
            (VMI_CLASS_TYPE_INFO, 0),
            (PURE_VIRTUAL, 0),
            ("_ZN3Foo3barEv", 0x4000),
        ]
        .into_iter()
        .enumerate()
        .map(|(index, (name, address))| DynSymbol {
            index,
            name: name.as_bytes().to_vec(),
            address,
        })
        .collect()
    }

    fn reloc(offset: VirtAddr, r_type: u32, symbol: usize) -> Relocation {
        Relocation {
            offset,
            r_type,
            symbol: Some(symbol),
        }
    }

    #[test]
    fn classifies_by_symbol() {
        let symbols = runtime_symbols();
        let relocs = [
            reloc(0x100, R_X86_64_64, 2),
            reloc(0x200, R_X86_64_64, 3),
            reloc(0x300, R_AARCH64_ABS64, 4),
            reloc(0x400, R_X86_64_64, 5),
            reloc(0x500, R_X86_64_64, 6),
            // R_X86_64_GLOB_DAT: not an absolute relocation.
            reloc(0x600, 6, 2),
            Relocation {
                offset: 0x700,
                r_type: R_X86_64_64,
                symbol: None,
            },
        ];

        let result = classify(&symbols, &relocs).unwrap();
        assert_eq!(result.kinds.len(), 3);
        assert_eq!(result.kinds[&0x100], TypeInfoKind::NoInherit);
        assert_eq!(result.kinds[&0x200], TypeInfoKind::SingleInherit);
        assert_eq!(result.kinds[&0x300], TypeInfoKind::VirtualMultiInherit);
        assert_eq!(result.pending_pure_virtual, HashSet::from([0x400]));
    }

    #[test]
    fn missing_runtime_symbol_is_fatal() {
        for missing in 2..6 {
            let mut symbols = runtime_symbols();
            symbols[missing].name = b"something_else".to_vec();
            let err = classify(&symbols, &[]).unwrap_err();
            assert!(matches!(err, Error::MissingRuntimeSymbol(_)), "{err}");
        }
    }

    #[test]
    fn defined_symbols_are_ignored() {
        let mut symbols = runtime_symbols();
        symbols[5].address = 0x1234;
        assert!(matches!(
            RuntimeSymbols::find(&symbols),
            Err(Error::MissingRuntimeSymbol(PURE_VIRTUAL))
        ));
    }

    #[test]
    fn bad_symbol_index() {
        let symbols = runtime_symbols();
        let err = classify(&symbols, &[reloc(0x10, R_X86_64_64, 99)]).unwrap_err();
        assert!(matches!(err, Error::BadSymbolIndex { symbol: 99, .. }));
    }
}

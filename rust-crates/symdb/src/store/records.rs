// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Rust representation of the payload data in store files.
//!
//! This hides away wire details like keys being replaced with string table
//! references and delta-encoded posting lists.

use crate::canon::RootKind;
use crate::rtti::{TypeInfoRecord, VTableRecord};
use crate::VirtAddr;
use std::fmt;

/// Input a symbol was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum Origin {
    /// Microsoft program database.
    Pdb = 1,
    /// ELF dynamic symbol table.
    Elf = 2,
}

impl Origin {
    /// Inverse of `origin as u32`.
    pub fn from_u32(raw: u32) -> Option<Self> {
        Some(match raw {
            1 => Self::Pdb,
            2 => Self::Elf,
            _ => return None,
        })
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pdb => "pdb",
            Self::Elf => "elf",
        })
    }
}

/// Row of the `symbols` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRow {
    /// Canonical key.
    pub key: String,
    /// Mangled name.
    pub raw: String,
    /// Compiler-style demangling. Empty if the demangler gave up.
    pub original: String,
    /// Kind of the decoded root.
    pub kind: RootKind,
    /// Input the symbol came from.
    pub origin: Origin,
    /// Address (ELF value or PDB RVA).
    pub address: VirtAddr,
}

/// Posting list of the full-text index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Lowercased token.
    pub token: String,
    /// Ascending symbol ordinals.
    pub ordinals: Vec<u32>,
}

/// Any record stored in a store file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// Symbol row.
    Symbol(SymbolRow),
    /// Type info with its bases.
    TypeInfo(TypeInfoRecord),
    /// Virtual function table.
    VTable(VTableRecord),
    /// Full-text index posting list.
    Index(IndexEntry),
}

impl From<SymbolRow> for Record {
    fn from(x: SymbolRow) -> Self {
        Self::Symbol(x)
    }
}

impl From<TypeInfoRecord> for Record {
    fn from(x: TypeInfoRecord) -> Self {
        Self::TypeInfo(x)
    }
}

impl From<VTableRecord> for Record {
    fn from(x: VTableRecord) -> Self {
        Self::VTable(x)
    }
}

impl From<IndexEntry> for Record {
    fn from(x: IndexEntry) -> Self {
        Self::Index(x)
    }
}

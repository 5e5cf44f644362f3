// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Recovery of C++ class hierarchies and virtual tables from raw binaries.
//!
//! The pipeline works in three steps:
//!
//! 1. [`reloc::classify`] inspects the dynamic relocations of a shared object
//!    and determines which addresses hold `type_info` records (and of which
//!    kind), plus which vtable slots will be patched to `__cxa_pure_virtual`.
//! 2. [`typeinfo::decode`] reads the base class list of each record.
//! 3. [`vtable::extract`] walks the function pointer array of each vtable.
//!
//! All three operate on a [`DataView`] of the section holding the records,
//! typically `.data.rel.ro`.

pub mod reloc;
pub mod typeinfo;
pub mod vtable;

use crate::VirtAddr;

pub use reloc::{classify, Classification};

/// Result type shorthand.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Errors that can occur during RTTI recovery.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// One of the C++ runtime support symbols is absent from `.dynsym`.
    #[error("runtime support symbol `{0}` not found: not linked against a C++ runtime?")]
    MissingRuntimeSymbol(&'static str),

    /// A relocation references a symbol index outside of the symbol table.
    #[error("relocation at {offset:#x} references unknown symbol #{symbol}")]
    BadSymbolIndex {
        /// Address patched by the relocation.
        offset: VirtAddr,
        /// Referenced symbol index.
        symbol: usize,
    },

    /// A read reached outside of the data section.
    #[error("address {0:#x} is outside of the data section")]
    OutOfBounds(VirtAddr),
}

/// Kind of a class `type_info` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum TypeInfoKind {
    /// `__class_type_info`: class without bases.
    NoInherit = 0,
    /// `__si_class_type_info`: single, public, non-virtual base at offset 0.
    SingleInherit = 1,
    /// `__vmi_class_type_info`: everything else.
    VirtualMultiInherit = 2,
}

impl TypeInfoKind {
    /// Inverse of `kind as u32`.
    pub fn from_u32(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::NoInherit,
            1 => Self::SingleInherit,
            2 => Self::VirtualMultiInherit,
            _ => return None,
        })
    }
}

/// Base class entry of a `type_info` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Base {
    /// Address of the base class' `type_info` record.
    pub address: VirtAddr,
    /// Offset of the base sub-object (or of its vbase offset for virtual bases).
    pub offset: i64,
    /// `__base_class_type_info` flags: `0x1` virtual, `0x2` public.
    pub flags: u32,
}

/// Decoded class `type_info` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfoRecord {
    /// Address of the record.
    pub address: VirtAddr,
    /// Record kind.
    pub kind: TypeInfoKind,
    /// `__vmi_class_type_info` flags, zero for other kinds.
    pub flags: u64,
    /// Direct bases in declaration order.
    pub bases: Vec<Base>,
}

/// Decoded virtual function table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VTableRecord {
    /// Address of the vtable symbol (the offset-to-top word).
    pub address: VirtAddr,
    /// Function addresses, excluding offset-to-top and RTTI pointer. Slots
    /// only populated at load time (pure virtual functions) are zero.
    pub entries: Vec<VirtAddr>,
}

/// Little-endian view on the bytes of a loaded section.
#[derive(Debug, Clone, Copy)]
pub struct DataView<'a> {
    base: VirtAddr,
    bytes: &'a [u8],
    ptr_size: usize,
}

impl<'a> DataView<'a> {
    /// Creates a view of `bytes` mapped at `base`.
    ///
    /// `ptr_size` must be 4 or 8.
    pub fn new(base: VirtAddr, bytes: &'a [u8], ptr_size: usize) -> Self {
        debug_assert!(matches!(ptr_size, 4 | 8));
        DataView {
            base,
            bytes,
            ptr_size,
        }
    }

    /// Virtual address of the first byte.
    pub fn base(&self) -> VirtAddr {
        self.base
    }

    /// Width of a pointer in bytes.
    pub fn ptr_size(&self) -> usize {
        self.ptr_size
    }

    /// Checks whether `addr` lies within the view.
    pub fn contains(&self, addr: VirtAddr) -> bool {
        addr >= self.base && addr - self.base < self.bytes.len() as u64
    }

    fn slice(&self, addr: VirtAddr, len: usize) -> Result<&'a [u8]> {
        let start = addr
            .checked_sub(self.base)
            .and_then(|x| usize::try_from(x).ok())
            .ok_or(Error::OutOfBounds(addr))?;
        let end = start.checked_add(len).ok_or(Error::OutOfBounds(addr))?;
        self.bytes.get(start..end).ok_or(Error::OutOfBounds(addr))
    }

    /// Reads a `u32` at the given address.
    pub fn read_u32(&self, addr: VirtAddr) -> Result<u32> {
        let raw = self.slice(addr, 4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Reads a pointer-sized unsigned word at the given address.
    pub fn read_ptr(&self, addr: VirtAddr) -> Result<u64> {
        let raw = self.slice(addr, self.ptr_size)?;
        let mut buf = [0u8; 8];
        buf[..raw.len()].copy_from_slice(raw);
        Ok(u64::from_le_bytes(buf))
    }

    /// Reads a pointer-sized signed word at the given address.
    pub fn read_iptr(&self, addr: VirtAddr) -> Result<i64> {
        let raw = self.read_ptr(addr)?;
        Ok(match self.ptr_size {
            4 => i64::from(raw as u32 as i32),
            _ => raw as i64,
        })
    }
}

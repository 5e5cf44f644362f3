// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Protobuf messages of the store file format.
//!
//! A store is the magic `symdbase` followed by a sequence of messages, each
//! prefixed with two ULEB128 integers: the length of the encoded message
//! and its [`MessageType`]. The first message is always a [`Header`].
//!
//! Strings that occur more than once within a batch of messages are stored
//! in a [`StringTable`] emitted before the batch, and referenced by index.
//! Each string table replaces the previous one.

/// Type of the message following the length prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    /// Never written.
    MtInvalid = 0,
    /// [`Header`]
    MtHeader = 1,
    /// [`StringTable`]
    MtStringTable = 2,
    /// [`Symbol`]
    MtSymbol = 3,
    /// [`TypeInfo`]
    MtTypeInfo = 4,
    /// [`VTable`]
    MtVTable = 5,
    /// [`Index`]
    MtIndex = 6,
}

/// File header.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Header {
    /// Format version, currently always 1.
    #[prost(uint32, tag = "1")]
    pub version: u32,
}

/// String table for the messages that follow.
#[derive(Clone, PartialEq, prost::Message)]
pub struct StringTable {
    /// Strings referenced by index.
    #[prost(string, repeated, tag = "1")]
    pub strings: Vec<String>,
}

/// Row of the `symbols` table.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Symbol {
    /// Canonical key, either inline or as string table reference.
    #[prost(oneof = "symbol::Key", tags = "1, 2")]
    pub key: Option<symbol::Key>,
    /// Mangled name as found in the input.
    #[prost(string, tag = "3")]
    pub raw: String,
    /// Compiler-style demangling, empty if unavailable.
    #[prost(string, tag = "4")]
    pub original: String,
    /// Root kind discriminant.
    #[prost(uint32, tag = "5")]
    pub kind: u32,
    /// Input the symbol was read from: 1 = PDB, 2 = ELF.
    #[prost(uint32, tag = "6")]
    pub origin: u32,
    /// Symbol address.
    #[prost(uint64, tag = "7")]
    pub address: u64,
}

/// Nested types of [`Symbol`].
pub mod symbol {
    /// Canonical key encoding.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Key {
        /// Index into the current string table.
        #[prost(uint32, tag = "1")]
        KeyRef(u32),
        /// Inline string.
        #[prost(string, tag = "2")]
        KeyStr(String),
    }
}

/// Row of the `typeinfos` table with its `typeinfo_bases` rows.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TypeInfo {
    /// Address of the record.
    #[prost(uint64, tag = "1")]
    pub address: u64,
    /// Record kind: 0 = none, 1 = single, 2 = virtual/multiple inheritance.
    #[prost(uint32, tag = "2")]
    pub kind: u32,
    /// `__vmi_class_type_info` flags.
    #[prost(uint64, tag = "3")]
    pub flags: u64,
    /// Direct bases.
    #[prost(message, repeated, tag = "4")]
    pub bases: Vec<TypeInfoBase>,
}

/// Row of the `typeinfo_bases` table.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TypeInfoBase {
    /// Address of the base's type info record.
    #[prost(uint64, tag = "1")]
    pub address: u64,
    /// Base offset.
    #[prost(sint64, tag = "2")]
    pub offset: i64,
    /// Base flags.
    #[prost(uint32, tag = "3")]
    pub flags: u32,
}

/// All `vtables` rows of one table.
#[derive(Clone, PartialEq, prost::Message)]
pub struct VTable {
    /// Address of the vtable symbol.
    #[prost(uint64, tag = "1")]
    pub address: u64,
    /// Entries in slot order.
    #[prost(uint64, repeated, tag = "2")]
    pub entries: Vec<u64>,
}

/// Posting list of the full-text index.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Index {
    /// Lowercased token.
    #[prost(string, tag = "1")]
    pub token: String,
    /// Symbol ordinals, delta-encoded.
    #[prost(uint32, repeated, tag = "2")]
    pub ordinals: Vec<u32>,
}

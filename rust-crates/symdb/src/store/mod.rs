// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Implements the persisted symbol store.
//!
//! For documentation about the file format, please refer to [`proto`].

pub mod proto;
mod query;
pub mod read;
pub mod records;
mod strdedup;
pub mod write;

// Re-export core types on the main module.
pub use query::Database;
pub use read::Reader;
pub use records::*;
pub use write::Writer;

/// Magic that every valid store must start with.
const FILE_MAGIC: &[u8; 8] = b"symdbase";

/// Version written into the header.
const FORMAT_VERSION: u32 = 1;

/// Size of the persistent read/write buffer for protobuf messages.
const MSG_BUF_CAPACITY: usize = 4096;

/// Maximum size of an individual message.
const MAX_MSG_SIZE: u32 = 16 * 1024 * 1024; // 16 MiB

/// Maximum size of the string table before flushing it.
///
/// Must be smaller than [`MAX_MSG_SIZE`].
const STRING_TABLE_SIZE_FLUSH_THRESH: u32 = MAX_MSG_SIZE - 64 * 1024;

/// Maximum size of the internal message buffer in the writer.
///
/// This impacts how many messages can use the same string table before
/// being written out.
const WRITER_MSG_BUFFER_SIZE: usize = 64 * 1024 * 1024; // 64 MiB

/// Result type used throughout this module.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Errors that can occur when reading, writing or querying stores.
#[non_exhaustive]
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("File does not start with the expected magic")]
    InvalidMagic,

    #[error("Store version {} is unsupported by this implementation", .0)]
    UnsupportedVersion(u32),

    #[error("Expected message type {:?} but got {:?}", .expected, .actual)]
    UnexpectedType {
        expected: proto::MessageType,
        // None = not known by our protobuf definition
        actual: Option<proto::MessageType>,
    },

    #[error("Message type value is invalid")]
    InvalidMessageType,

    #[error("Message contains an invalid string table reference")]
    InvalidStringTableIndex,

    #[error("Message is missing a required field `{}`", .0)]
    MissingRequiredField(&'static str),

    #[error("Field `{}` holds unknown value {}", .field, .value)]
    InvalidEnumValue { field: &'static str, value: u32 },

    #[error("File ended prematurely in the middle of a message")]
    TruncatedMessage,

    #[error("Variable-length integer is too big")]
    VarIntTooLong,

    #[error("Message of size {} exceeds maximum of {}", .0, MAX_MSG_SIZE)]
    MaximumMsgSizeExceeded(u64),

    #[error("Index posting list is not strictly ascending")]
    PostingsNotSorted,

    #[error("Index references symbol #{} but the store holds {} symbols", .ordinal, .count)]
    PostingOutOfRange { ordinal: u32, count: usize },

    #[error("Symbols are not sorted by canonical key")]
    SymbolsNotSorted,

    #[error("IO error")]
    IO(#[from] std::io::Error),

    #[error("Encoding error")]
    Encoding(#[from] prost::EncodeError),

    #[error("Decoding error")]
    Decoding(#[from] prost::DecodeError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canon::RootKind;
    use crate::rtti::{Base, TypeInfoKind, TypeInfoRecord, VTableRecord};

    const KEYS: &[&str] = &[
        "Foo::bar(int) -> void",
        "Foo::baz() const -> int",
        "Net::Socket::$vtable",
        "Net::Socket <- $type_info",
        "g_counter -> int",
    ];

    fn make_test_symbol(seed: u64) -> SymbolRow {
        SymbolRow {
            // Repeat some keys within one batch to exercise the string table.
            key: KEYS[(seed % KEYS.len() as u64) as usize].to_owned(),
            raw: format!("_Z{seed}sym"),
            original: match seed % 4 {
                0 => String::new(),
                _ => format!("sym{seed}()"),
            },
            kind: match seed % 5 {
                0 => RootKind::Unknown,
                1 => RootKind::Variable,
                2 => RootKind::Function,
                3 => RootKind::SpecialName,
                _ => RootKind::LocalName,
            },
            origin: match seed % 2 {
                0 => Origin::Pdb,
                _ => Origin::Elf,
            },
            address: seed * 0x10,
        }
    }

    fn make_test_typeinfo(seed: u64) -> TypeInfoRecord {
        TypeInfoRecord {
            address: 0x4000 + seed * 0x18,
            kind: match seed % 3 {
                0 => TypeInfoKind::NoInherit,
                1 => TypeInfoKind::SingleInherit,
                _ => TypeInfoKind::VirtualMultiInherit,
            },
            flags: seed % 4,
            bases: (0..seed % 3)
                .map(|i| Base {
                    address: 0x4000 + i * 0x18,
                    offset: i as i64 * 8 - 16,
                    flags: (i % 4) as u32,
                })
                .collect(),
        }
    }

    fn make_test_vtable(seed: u64) -> VTableRecord {
        VTableRecord {
            address: 0x8000 + seed * 0x40,
            entries: (0..seed % 7).map(|i| 0x1000 + i * 0x20 * (i % 2)).collect(),
        }
    }

    #[test]
    fn round_trip() {
        let msgs: Vec<Record> = (0..1000)
            .map(|i| match i % 7 {
                0 => Record::TypeInfo(make_test_typeinfo(i)),
                1 => Record::VTable(make_test_vtable(i)),
                2 => Record::Index(IndexEntry {
                    token: format!("tok{i}"),
                    ordinals: (0..i % 5).map(|x| (x * 3 + i % 2) as u32).collect(),
                }),
                _ => Record::Symbol(make_test_symbol(i)),
            })
            .collect();

        let mut writer = Writer::new(Vec::new()).unwrap();
        for msg in &msgs {
            writer.write(msg.clone()).unwrap();
        }
        let buf = writer.finalize().unwrap();
        assert!(buf.starts_with(FILE_MAGIC));

        let mut reader = Reader::new(&buf[..]).unwrap();
        let mut expected_iter = msgs.iter();
        while let Some(msg) = reader.read().unwrap() {
            let expected = expected_iter.next().unwrap();
            assert_eq!(&msg, expected);
        }
        assert!(expected_iter.next().is_none());
    }

    #[test]
    fn empty_store() {
        let buf = Writer::new(Vec::new()).unwrap().finalize().unwrap();
        let mut reader = Reader::new(&buf[..]).unwrap();
        assert_eq!(reader.read().unwrap(), None);
    }
}

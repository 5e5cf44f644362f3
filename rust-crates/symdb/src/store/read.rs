// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Implements a reader for the store file format.

use super::*;
use crate::canon::RootKind;
use crate::rtti::{Base, TypeInfoKind, TypeInfoRecord, VTableRecord};
use crate::store::proto::MessageType;
use fallible_iterator::FallibleIterator;
use std::io;

/// Reader for the store file format.
#[derive(Debug)]
pub struct Reader<I: io::Read> {
    inner: I,
    read_buf: Vec<u8>,
    string_table: Vec<String>,
}

impl<I: io::Read> Reader<I> {
    /// Create a new reader.
    ///
    /// It's strongly advised to pass a buffered reader.
    pub fn new(mut inner: I) -> Result<Self> {
        // Check magic.
        let mut magic = [0u8; FILE_MAGIC.len()];
        match inner.read_exact(&mut magic) {
            Ok(()) => (),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(Error::InvalidMagic),
            Err(e) => return Err(Error::IO(e)),
        }
        if &magic != FILE_MAGIC {
            return Err(Error::InvalidMagic);
        }

        // Read and validate header.
        let mut read_buf = Vec::with_capacity(MSG_BUF_CAPACITY);
        let Some((kind, len)) = read_msg_prefix(&mut inner)? else {
            return Err(Error::TruncatedMessage);
        };

        if kind != Some(MessageType::MtHeader) {
            return Err(Error::UnexpectedType {
                expected: MessageType::MtHeader,
                actual: kind,
            });
        }

        let header: proto::Header = read_msg(&mut inner, len, &mut read_buf)?;
        if header.version != FORMAT_VERSION {
            return Err(Error::UnsupportedVersion(header.version));
        }

        Ok(Self {
            inner,
            read_buf,
            string_table: Vec::new(),
        })
    }

    /// Read the next record from the store.
    pub fn read(&mut self) -> Result<Option<Record>> {
        loop {
            let Some((kind, len)) = read_msg_prefix(&mut self.inner)? else {
                return Ok(None);
            };

            let record = match kind {
                Some(MessageType::MtInvalid | MessageType::MtHeader) => {
                    return Err(Error::InvalidMessageType);
                }

                Some(MessageType::MtStringTable) => {
                    let msg: proto::StringTable = self.read_msg(len)?;
                    self.string_table = msg.strings;
                    continue;
                }

                Some(MessageType::MtSymbol) => {
                    let raw: proto::Symbol = self.read_msg(len)?;
                    Record::Symbol(self.deserialize_symbol(raw)?)
                }

                Some(MessageType::MtTypeInfo) => {
                    let raw: proto::TypeInfo = self.read_msg(len)?;
                    Record::TypeInfo(deserialize_type_info(raw)?)
                }

                Some(MessageType::MtVTable) => {
                    let raw: proto::VTable = self.read_msg(len)?;
                    Record::VTable(VTableRecord {
                        address: raw.address,
                        entries: raw.entries,
                    })
                }

                Some(MessageType::MtIndex) => {
                    let raw: proto::Index = self.read_msg(len)?;
                    Record::Index(deserialize_index(raw)?)
                }

                // Skip unsupported messages.
                None => {
                    skip_msg(&mut self.inner, len)?;
                    continue;
                }
            };

            return Ok(Some(record));
        }
    }

    fn read_msg<M: prost::Message + Default>(&mut self, len: u32) -> Result<M> {
        read_msg(&mut self.inner, len, &mut self.read_buf)
    }

    /// Convert a symbol in wire format into our higher-level format.
    fn deserialize_symbol(&self, raw: proto::Symbol) -> Result<SymbolRow> {
        use proto::symbol::Key;

        Ok(SymbolRow {
            key: match raw.key {
                Some(Key::KeyRef(idx)) => self.str_by_idx(idx)?.to_owned(),
                Some(Key::KeyStr(s)) => s,
                None => return Err(Error::MissingRequiredField("key")),
            },
            raw: raw.raw,
            original: raw.original,
            kind: RootKind::from_u32(raw.kind).ok_or(Error::InvalidEnumValue {
                field: "kind",
                value: raw.kind,
            })?,
            origin: Origin::from_u32(raw.origin).ok_or(Error::InvalidEnumValue {
                field: "origin",
                value: raw.origin,
            })?,
            address: raw.address,
        })
    }

    /// Retrieve the given string table entry via its index.
    fn str_by_idx(&self, idx: u32) -> Result<&str> {
        let s = self
            .string_table
            .get(idx as usize)
            .ok_or(Error::InvalidStringTableIndex)?
            .as_str();
        Ok(s)
    }
}

fn deserialize_type_info(raw: proto::TypeInfo) -> Result<TypeInfoRecord> {
    Ok(TypeInfoRecord {
        address: raw.address,
        kind: TypeInfoKind::from_u32(raw.kind).ok_or(Error::InvalidEnumValue {
            field: "kind",
            value: raw.kind,
        })?,
        flags: raw.flags,
        bases: raw
            .bases
            .into_iter()
            .map(|base| Base {
                address: base.address,
                offset: base.offset,
                flags: base.flags,
            })
            .collect(),
    })
}

fn deserialize_index(raw: proto::Index) -> Result<IndexEntry> {
    let mut ordinals = Vec::with_capacity(raw.ordinals.len());
    let mut prev: Option<u32> = None;
    for delta in raw.ordinals {
        let ordinal = match prev {
            None => delta,
            Some(_) if delta == 0 => return Err(Error::PostingsNotSorted),
            Some(prev) => prev.checked_add(delta).ok_or(Error::PostingsNotSorted)?,
        };
        ordinals.push(ordinal);
        prev = Some(ordinal);
    }

    Ok(IndexEntry {
        token: raw.token,
        ordinals,
    })
}

/// Allow using the reader as an iterator.
impl<I: io::Read> FallibleIterator for Reader<I> {
    type Item = Record;
    type Error = Error;

    fn next(&mut self) -> Result<Option<Self::Item>, Self::Error> {
        self.read()
    }
}

/// Reads the var-int encoded message length and type.
fn read_msg_prefix(mut read: impl io::Read) -> Result<Option<(Option<MessageType>, u32)>> {
    let Some(length) = read_leb128(&mut read)? else {
        // EOF is fine here: the file ended after the previous message.
        return Ok(None);
    };

    if length > u64::from(MAX_MSG_SIZE) {
        return Err(Error::MaximumMsgSizeExceeded(length));
    }

    let Some(raw_kind) = read_leb128(&mut read)? else {
        return Err(Error::TruncatedMessage);
    };

    let kind: i32 = raw_kind.try_into().map_err(|_| Error::InvalidMessageType)?;

    Ok(Some((MessageType::try_from(kind).ok(), length as u32)))
}

/// Reads a protobuf message from the input stream,
/// using `buf` as a temporary buffer for decoding.
fn read_msg<M: prost::Message + Default>(
    mut read: impl io::Read,
    length: u32,
    buf: &mut Vec<u8>,
) -> Result<M> {
    buf.resize(length as usize, 0);

    match read.read_exact(&mut buf[..]) {
        Ok(_) => (),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(Error::TruncatedMessage),
        Err(e) => return Err(Error::IO(e)),
    };

    let msg = M::decode(&buf[..])?;
    buf.shrink_to(MSG_BUF_CAPACITY);
    Ok(msg)
}

/// Discards the payload of a message we don't know.
fn skip_msg(read: impl io::Read, length: u32) -> Result {
    let skipped = io::copy(&mut read.take(u64::from(length)), &mut io::sink())?;
    if skipped != u64::from(length) {
        return Err(Error::TruncatedMessage);
    }
    Ok(())
}

/// Read an ULEB-128 encoded variable-length integer.
///
/// If EOF is reached before reading the first byte, `Ok(None)` is returned.
/// If EOF is encountered in the middle of an incomplete var-int sequence,
/// a corresponding IO error is returned.
fn read_leb128(mut read: impl io::Read) -> Result<Option<u64>> {
    let mut result = 0;
    let mut shift = 0;
    let mut buf = [0u8];

    for i in 0..10 {
        match read.read_exact(&mut buf) {
            Ok(_) => (),
            Err(e) if i == 0 && e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(Error::IO(e)),
        }

        result |= ((buf[0] & 0x7F) as u64) << shift;

        if buf[0] & 0x80 == 0 {
            return Ok(Some(result));
        }

        shift += 7;
    }

    Err(Error::VarIntTooLong)
}

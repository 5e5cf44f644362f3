// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Implements a writer for the store file format.

use super::*;
use crate::rtti::{TypeInfoRecord, VTableRecord};
use crate::store::proto::MessageType;
use std::{io, mem};

/// Writer for the store file format.
#[derive(Debug)]
pub struct Writer<O: io::Write> {
    out: O,
    write_buf: Vec<u8>,
    string_table: strdedup::Builder,
    buffered_msgs: Vec<BufferedMsg>,
}

impl<O: io::Write> Writer<O> {
    /// Create a new writer that outputs into `out`.
    pub fn new(out: O) -> Result<Self> {
        let mut writer = Writer {
            out,
            write_buf: Vec::with_capacity(MSG_BUF_CAPACITY),
            string_table: strdedup::Builder::default(),
            buffered_msgs: Vec::new(),
        };

        writer.out.write_all(FILE_MAGIC)?;
        writer.write_msg(
            MessageType::MtHeader,
            proto::Header {
                version: FORMAT_VERSION,
            },
        )?;

        Ok(writer)
    }

    /// Write a record to the file.
    pub fn write(&mut self, record: impl Into<Record>) -> Result {
        let msg = match record.into() {
            Record::Symbol(row) => BufferedMsg::Symbol(self.serialize_symbol(row)),
            Record::TypeInfo(info) => BufferedMsg::TypeInfo(serialize_type_info(info)),
            Record::VTable(table) => BufferedMsg::VTable(serialize_vtable(table)),
            Record::Index(entry) => BufferedMsg::Index(serialize_index(entry)?),
        };

        self.buffered_msgs.push(msg);

        if self.string_table.size_estimate() >= STRING_TABLE_SIZE_FLUSH_THRESH as usize
            || self.buffered_msgs.len() * mem::size_of::<BufferedMsg>() >= WRITER_MSG_BUFFER_SIZE
        {
            self.flush_buffered_msgs()?;
        }

        Ok(())
    }

    fn serialize_symbol(&mut self, row: SymbolRow) -> proto::Symbol {
        proto::Symbol {
            key: Some(proto::symbol::Key::KeyRef(
                self.string_table.index_for_str(row.key),
            )),
            raw: row.raw,
            original: row.original,
            kind: row.kind as u32,
            origin: row.origin as u32,
            address: row.address,
        }
    }

    /// Write out and clear the buffered messages and string table.
    fn flush_buffered_msgs(&mut self) -> Result {
        let mut translator = mem::take(&mut self.string_table).build();
        let mut msgs = mem::take(&mut self.buffered_msgs);

        // Unique keys are moved out of the translator, so all messages have
        // to be fixed up before the final table is known.
        for buffered_msg in &mut msgs {
            if let BufferedMsg::Symbol(symbol) = buffered_msg {
                Self::fix_up_symbol(&mut translator, symbol)?;
            }
        }

        let strings = translator.into_table();
        if !strings.is_empty() {
            self.write_msg(MessageType::MtStringTable, proto::StringTable { strings })?;
        }

        for buffered_msg in msgs {
            match buffered_msg {
                BufferedMsg::Symbol(x) => self.write_msg(MessageType::MtSymbol, x)?,
                BufferedMsg::TypeInfo(x) => self.write_msg(MessageType::MtTypeInfo, x)?,
                BufferedMsg::VTable(x) => self.write_msg(MessageType::MtVTable, x)?,
                BufferedMsg::Index(x) => self.write_msg(MessageType::MtIndex, x)?,
            };
        }

        Ok(())
    }

    fn fix_up_symbol(trans: &mut strdedup::Mapper, symbol: &mut proto::Symbol) -> Result {
        use proto::symbol::Key;
        use strdedup::Mapping;

        let Some(Key::KeyRef(temp_idx)) = symbol.key else {
            return Err(Error::MissingRequiredField("key"));
        };
        symbol.key = match trans.translate(temp_idx) {
            Some(Mapping::Unique(x)) => Some(Key::KeyStr(x)),
            Some(Mapping::Translate(x)) => Some(Key::KeyRef(x)),
            None => return Err(Error::InvalidStringTableIndex),
        };

        Ok(())
    }

    /// Finalize the file, flushing all remaining buffers.
    ///
    /// Returns the output stream once all buffers are flushed.
    pub fn finalize(mut self) -> Result<O> {
        self.flush_buffered_msgs()?;
        self.out.flush()?;
        Ok(self.out)
    }

    /// Gets an immutable reference to the underlying stream.
    pub fn stream_ref(&self) -> &O {
        &self.out
    }

    /// Write the given message to the output stream.
    ///
    /// `write_buf` is used as a temporary buffer to avoid unnecessarily
    /// allocating and freeing on every call.
    fn write_msg(&mut self, kind: MessageType, msg: impl prost::Message) -> Result {
        self.write_buf.clear();

        let encoded_len = msg.encoded_len();
        if encoded_len > MAX_MSG_SIZE as usize {
            return Err(Error::MaximumMsgSizeExceeded(encoded_len as u64));
        }

        prost::encode_length_delimiter(encoded_len, &mut self.write_buf)?;
        prost::encode_length_delimiter(kind as usize, &mut self.write_buf)?;
        msg.encode(&mut self.write_buf)?;
        self.out.write_all(&self.write_buf)?;

        // Make sure the write buffer doesn't stay huge if one message was big.
        self.write_buf.shrink_to(MSG_BUF_CAPACITY);

        Ok(())
    }
}

fn serialize_type_info(info: TypeInfoRecord) -> proto::TypeInfo {
    proto::TypeInfo {
        address: info.address,
        kind: info.kind as u32,
        flags: info.flags,
        bases: info
            .bases
            .into_iter()
            .map(|base| proto::TypeInfoBase {
                address: base.address,
                offset: base.offset,
                flags: base.flags,
            })
            .collect(),
    }
}

fn serialize_vtable(table: VTableRecord) -> proto::VTable {
    proto::VTable {
        address: table.address,
        entries: table.entries,
    }
}

fn serialize_index(entry: IndexEntry) -> Result<proto::Index> {
    let mut ordinals = Vec::with_capacity(entry.ordinals.len());
    let mut prev = None;
    for ordinal in entry.ordinals {
        let delta = match prev {
            None => ordinal,
            Some(prev) if ordinal > prev => ordinal - prev,
            Some(_) => return Err(Error::PostingsNotSorted),
        };
        ordinals.push(delta);
        prev = Some(ordinal);
    }

    Ok(proto::Index {
        token: entry.token,
        ordinals,
    })
}

#[derive(Debug)]
enum BufferedMsg {
    Symbol(proto::Symbol),
    TypeInfo(proto::TypeInfo),
    VTable(proto::VTable),
    Index(proto::Index),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_deltas() {
        let entry = IndexEntry {
            token: "foo".into(),
            ordinals: vec![3, 4, 10],
        };
        assert_eq!(serialize_index(entry).unwrap().ordinals, vec![3, 1, 6]);

        for ordinals in [vec![4, 3], vec![1, 1]] {
            let entry = IndexEntry {
                token: "foo".into(),
                ordinals,
            };
            assert!(matches!(
                serialize_index(entry),
                Err(Error::PostingsNotSorted)
            ));
        }
    }
}

// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Decoder for class `type_info` records.
//!
//! Layouts (Itanium C++ ABI, section 2.9.5), one `P` per pointer-sized word:
//!
//! ```text
//! __class_type_info       P vptr | P name
//! __si_class_type_info    P vptr | P name | P base
//! __vmi_class_type_info   P vptr | P name | u32 flags | u32 count
//!                         | count * (P base | P offset_flags)
//! ```
//!
//! `offset_flags` holds the base offset in its upper bits and the base
//! flags in its low byte.

use super::{Base, DataView, Result, TypeInfoKind, TypeInfoRecord};
use crate::VirtAddr;

/// Number of bits `offset_flags` is shifted by to get the offset.
const OFFSET_SHIFT: u32 = 8;

/// Decodes the record of the given kind at `address`.
pub fn decode(view: &DataView<'_>, address: VirtAddr, kind: TypeInfoKind) -> Result<TypeInfoRecord> {
    let ptr = view.ptr_size() as u64;
    let body = address + 2 * ptr;

    let mut record = TypeInfoRecord {
        address,
        kind,
        flags: 0,
        bases: Vec::new(),
    };

    match kind {
        TypeInfoKind::NoInherit => {}
        TypeInfoKind::SingleInherit => {
            record.bases.push(Base {
                address: view.read_ptr(body)?,
                offset: 0,
                flags: 0,
            });
        }
        TypeInfoKind::VirtualMultiInherit => {
            record.flags = u64::from(view.read_u32(body)?);
            let count = view.read_u32(body + 4)?;

            let mut cursor = body + 8;
            for _ in 0..count {
                let base = view.read_ptr(cursor)?;
                let offset_flags = view.read_iptr(cursor + ptr)?;
                record.bases.push(Base {
                    address: base,
                    offset: offset_flags >> OFFSET_SHIFT,
                    flags: (offset_flags & 0xFF) as u32,
                });
                cursor += 2 * ptr;
            }
        }
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtti::Error;

    const BASE: VirtAddr = 0x10_0000;

    fn words(words: &[u64]) -> Vec<u8> {
        words.iter().flat_map(|x| x.to_le_bytes()).collect()
    }

    #[test]
    fn no_inherit() {
        let bytes = words(&[0xdead, 0xbeef]);
        let view = DataView::new(BASE, &bytes, 8);
        let record = decode(&view, BASE, TypeInfoKind::NoInherit).unwrap();
        assert!(record.bases.is_empty());
        assert_eq!(record.flags, 0);
    }

    #[test]
    fn single_inherit() {
        let bytes = words(&[0xdead, 0xbeef, 0x4242]);
        let view = DataView::new(BASE, &bytes, 8);
        let record = decode(&view, BASE, TypeInfoKind::SingleInherit).unwrap();
        assert_eq!(
            record.bases,
            vec![Base {
                address: 0x4242,
                offset: 0,
                flags: 0
            }]
        );
    }

    #[test]
    fn virtual_multi_inherit() {
        let flags_count = 3 | (2 << 32);
        let bytes = words(&[0xdead, 0xbeef, flags_count, 0x1000, 0x0203, 0x2000, 0x0401]);
        let view = DataView::new(BASE, &bytes, 8);

        let record = decode(&view, BASE, TypeInfoKind::VirtualMultiInherit).unwrap();
        assert_eq!(record.flags, 3);
        assert_eq!(
            record.bases,
            vec![
                Base {
                    address: 0x1000,
                    offset: 2,
                    flags: 3
                },
                Base {
                    address: 0x2000,
                    offset: 4,
                    flags: 1
                },
            ]
        );
    }

    #[test]
    fn negative_offsets() {
        // Virtual base: offset_flags holds the (negative) vbase offset slot.
        let offset_flags = ((-24i64) << 8) | 0x3;
        let bytes = words(&[0, 0, 1 << 32, 0x1000, offset_flags as u64]);
        let view = DataView::new(BASE, &bytes, 8);

        let record = decode(&view, BASE, TypeInfoKind::VirtualMultiInherit).unwrap();
        assert_eq!(record.bases[0].offset, -24);
        assert_eq!(record.bases[0].flags, 3);
    }

    #[test]
    fn pointer_width_32() {
        let mut bytes = Vec::new();
        for word in [0xdeadu32, 0xbeef, 1, 1, 0x1000, 0x0802] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        let view = DataView::new(BASE, &bytes, 4);

        let record = decode(&view, BASE, TypeInfoKind::VirtualMultiInherit).unwrap();
        assert_eq!(record.flags, 1);
        assert_eq!(
            record.bases,
            vec![Base {
                address: 0x1000,
                offset: 8,
                flags: 2
            }]
        );
    }

    #[test]
    fn truncated_record() {
        let flags_count = 2 << 32;
        let bytes = words(&[0, 0, flags_count, 0x1000, 0x0203]);
        let view = DataView::new(BASE, &bytes, 8);
        assert!(matches!(
            decode(&view, BASE, TypeInfoKind::VirtualMultiInherit),
            Err(Error::OutOfBounds(_))
        ));
    }
}

// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! In-memory view of a store with the query API.

use super::*;
use crate::rtti::{TypeInfoRecord, VTableRecord};
use crate::search::{group_by_prefix, Group, Index};
use crate::VirtAddr;
use fallible_iterator::FallibleIterator;
use std::collections::{BTreeMap, HashMap};
use std::{fs, io, path};

/// Fully loaded symbol store.
#[derive(Debug, Default)]
pub struct Database {
    symbols: Vec<SymbolRow>,
    typeinfos: BTreeMap<VirtAddr, TypeInfoRecord>,
    vtables: BTreeMap<VirtAddr, VTableRecord>,
    derived: HashMap<VirtAddr, Vec<VirtAddr>>,
    by_address: HashMap<VirtAddr, Vec<u32>>,
    index: Index,
}

impl Database {
    /// Loads the store at `path`.
    pub fn open(path: &path::Path) -> Result<Self> {
        let file = fs::File::open(path)?;
        Self::read_from(io::BufReader::new(file))
    }

    /// Loads a store from an arbitrary stream.
    pub fn read_from(input: impl io::Read) -> Result<Self> {
        let mut db = Database::default();
        let mut postings = Vec::new();

        let mut reader = Reader::new(input)?;
        while let Some(record) = reader.next()? {
            match record {
                Record::Symbol(row) => {
                    if db.symbols.last().is_some_and(|prev| prev.key > row.key) {
                        return Err(Error::SymbolsNotSorted);
                    }
                    db.symbols.push(row);
                }
                Record::TypeInfo(info) => {
                    for base in &info.bases {
                        db.derived.entry(base.address).or_default().push(info.address);
                    }
                    db.typeinfos.insert(info.address, info);
                }
                Record::VTable(table) => {
                    db.vtables.insert(table.address, table);
                }
                Record::Index(entry) => postings.push(entry),
            }
        }

        for (ordinal, row) in db.symbols.iter().enumerate() {
            db.by_address
                .entry(row.address)
                .or_default()
                .push(ordinal as u32);
        }

        for list in db.derived.values_mut() {
            list.sort_unstable();
            list.dedup();
        }

        if postings.is_empty() {
            db.index = Index::build(db.symbols.iter().map(|x| x.key.as_str()));
        } else {
            let count = db.symbols.len();
            for entry in postings {
                if let Some(&ordinal) = entry.ordinals.iter().find(|&&x| x as usize >= count) {
                    return Err(Error::PostingOutOfRange { ordinal, count });
                }
                db.index.insert(entry.token, entry.ordinals);
            }
        }

        Ok(db)
    }

    /// All symbols, sorted by canonical key.
    pub fn symbols(&self) -> &[SymbolRow] {
        &self.symbols
    }

    /// Full-text token index.
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Symbols whose key matches every token of `text` as a prefix.
    pub fn search(&self, text: &str) -> Vec<&SymbolRow> {
        self.index
            .query(text)
            .into_iter()
            .filter_map(|ordinal| self.symbols.get(ordinal as usize))
            .collect()
    }

    /// Like [`Self::search`], grouping overloads and specializations.
    pub fn search_grouped(&self, text: &str) -> Vec<Group<&SymbolRow>> {
        group_by_prefix(self.search(text), |row| row.key.as_str())
    }

    /// Symbols whose key starts with `prefix`.
    pub fn prefix_scan(&self, prefix: &str) -> &[SymbolRow] {
        let start = self
            .symbols
            .partition_point(|row| row.key.as_str() < prefix);
        let len = self.symbols[start..].partition_point(|row| row.key.starts_with(prefix));
        &self.symbols[start..start + len]
    }

    /// Symbols located at `address`.
    pub fn symbols_at(&self, address: VirtAddr) -> impl Iterator<Item = &SymbolRow> {
        self.by_address
            .get(&address)
            .into_iter()
            .flatten()
            .filter_map(|&ordinal| self.symbols.get(ordinal as usize))
    }

    /// Virtual table at `address`.
    pub fn vtable(&self, address: VirtAddr) -> Option<&VTableRecord> {
        self.vtables.get(&address)
    }

    /// All virtual tables in address order.
    pub fn vtables(&self) -> impl Iterator<Item = &VTableRecord> {
        self.vtables.values()
    }

    /// Type info record at `address`.
    pub fn typeinfo(&self, address: VirtAddr) -> Option<&TypeInfoRecord> {
        self.typeinfos.get(&address)
    }

    /// All type info records in address order.
    pub fn typeinfos(&self) -> impl Iterator<Item = &TypeInfoRecord> {
        self.typeinfos.values()
    }

    /// Addresses of type info records that list `base` as a direct base.
    pub fn derived_from(&self, base: VirtAddr) -> &[VirtAddr] {
        self.derived.get(&base).map_or(&[], |x| x.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canon::RootKind;
    use crate::rtti::{Base, TypeInfoKind};
    use std::io::Write as _;

    fn row(key: &str, address: VirtAddr) -> SymbolRow {
        SymbolRow {
            key: key.to_owned(),
            raw: format!("raw:{key}"),
            original: String::new(),
            kind: RootKind::Function,
            origin: Origin::Elf,
            address,
        }
    }

    fn sample_rows() -> Vec<SymbolRow> {
        vec![
            row("Foo::bar(int) -> void", 0x100),
            row("Foo::bar(long) -> void", 0x120),
            row("Foo::baz() -> int", 0x140),
            row("Foo::baz() -> int", 0x140),
            row("HttpServer::start() -> bool", 0x200),
            row("g_counter -> int", 0x300),
        ]
    }

    fn write_store(records: Vec<Record>) -> tempfile::NamedTempFile {
        let mut writer = Writer::new(Vec::new()).unwrap();
        for record in records {
            writer.write(record).unwrap();
        }
        let buf = writer.finalize().unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&buf).unwrap();
        file
    }

    fn sample_db(with_index: bool) -> Database {
        let rows = sample_rows();
        let mut records: Vec<Record> = Vec::new();
        if with_index {
            let index = Index::build(rows.iter().map(|x| x.key.as_str()));
            for (token, ordinals) in index.iter() {
                records.push(
                    IndexEntry {
                        token: token.to_owned(),
                        ordinals: ordinals.to_vec(),
                    }
                    .into(),
                );
            }
        }
        records.extend(rows.into_iter().map(Record::from));
        records.push(
            TypeInfoRecord {
                address: 0x1000,
                kind: TypeInfoKind::NoInherit,
                flags: 0,
                bases: vec![],
            }
            .into(),
        );
        for address in [0x1020, 0x1010] {
            records.push(
                TypeInfoRecord {
                    address,
                    kind: TypeInfoKind::SingleInherit,
                    flags: 0,
                    bases: vec![Base {
                        address: 0x1000,
                        offset: 0,
                        flags: 2,
                    }],
                }
                .into(),
            );
        }
        records.push(
            VTableRecord {
                address: 0x2000,
                entries: vec![0x100, 0, 0x140],
            }
            .into(),
        );

        let file = write_store(records);
        Database::open(file.path()).unwrap()
    }

    #[test]
    fn queries() {
        for with_index in [false, true] {
            let db = sample_db(with_index);
            assert_eq!(db.symbols().len(), 6);

            let keys = |rows: Vec<&SymbolRow>| -> Vec<String> {
                rows.into_iter().map(|x| x.key.clone()).collect()
            };
            assert_eq!(
                keys(db.search("foo bar")),
                ["Foo::bar(int) -> void", "Foo::bar(long) -> void"]
            );
            assert_eq!(keys(db.search("server")), ["HttpServer::start() -> bool"]);
            assert!(db.search("").is_empty());

            let groups = db.search_grouped("foo");
            let summary: Vec<_> = groups
                .iter()
                .map(|g| (g.prefix.as_str(), g.items.len()))
                .collect();
            assert_eq!(summary, [("Foo::bar", 2), ("Foo::baz", 2)]);

            assert_eq!(db.prefix_scan("Foo::ba").len(), 4);
            assert_eq!(db.prefix_scan("Foo::baz").len(), 2);
            assert_eq!(db.prefix_scan("g_").len(), 1);
            assert!(db.prefix_scan("zzz").is_empty());
            assert_eq!(db.prefix_scan("").len(), 6);

            assert_eq!(db.symbols_at(0x140).count(), 2);
            assert_eq!(db.symbols_at(0x999).count(), 0);

            assert_eq!(db.vtable(0x2000).unwrap().entries, [0x100, 0, 0x140]);
            assert!(db.vtable(0x2008).is_none());
            assert_eq!(db.typeinfo(0x1010).unwrap().kind, TypeInfoKind::SingleInherit);
            assert_eq!(db.derived_from(0x1000), [0x1010, 0x1020]);
            assert!(db.derived_from(0x1010).is_empty());
            assert_eq!(db.typeinfos().count(), 3);
            assert_eq!(db.vtables().count(), 1);
        }
    }

    #[test]
    fn rejects_inconsistent_stores() {
        let unsorted = vec![row("b", 0).into(), row("a", 0).into()];
        let file = write_store(unsorted);
        assert!(matches!(
            Database::open(file.path()),
            Err(Error::SymbolsNotSorted)
        ));

        let dangling = vec![
            row("a", 0).into(),
            IndexEntry {
                token: "a".into(),
                ordinals: vec![0, 4],
            }
            .into(),
        ];
        let file = write_store(dangling);
        assert!(matches!(
            Database::open(file.path()),
            Err(Error::PostingOutOfRange { ordinal: 4, count: 1 })
        ));

        assert!(matches!(
            Database::open(path::Path::new("/nonexistent/store")),
            Err(Error::IO(_))
        ));
    }
}

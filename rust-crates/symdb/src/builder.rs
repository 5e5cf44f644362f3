// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Builds a symbol store from an ELF shared object and a PDB.
//!
//! ELF input is processed first: its relocations are classified once, and
//! every vtable and `type_info` symbol is decoded against the resulting
//! read-only maps. PDB symbols follow. All decoded rows are staged in memory
//! and written ordered by canonical key, together with the full-text index.
//!
//! The store is written into a temporary file next to the destination and
//! only renamed into place once everything is flushed, so a failing build
//! leaves an existing store untouched.

use crate::canon::{Root, RootKind, SpecialKind};
use crate::objfile;
use crate::pdbfile::{self, PdbSymbol};
use crate::rtti::{self, typeinfo, vtable, TypeInfoRecord, VTableRecord};
use crate::search::Index;
use crate::store::{self, IndexEntry, Origin, SymbolRow};
use crate::{debug, demangle, VirtAddr};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use std::{fmt, io, path};

/// Namespaces excluded from the store unless configured otherwise.
pub const DEFAULT_SKIP_PREFIXES: &[&str] = &[
    "std::",
    "grpc::",
    "grpc_core::",
    "google::",
    "__gnu_cxx::",
    "JsonUtil::",
    "(",
    "$SKIP",
];

/// Result type shorthand.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Fatal build errors.
///
/// Symbols that can't be decoded are never errors: they are recorded as
/// [`Skipped`] entries in the [`BuildReport`].
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Neither an ELF nor a PDB input was given.
    #[error("no input files")]
    NoInput,

    /// Relocations and RTTI records are decoded as little-endian words.
    #[error("big-endian ELF images are not supported")]
    BigEndian,

    /// The section holding RTTI records and vtables is absent.
    #[error("section `{0}` not found")]
    MissingSection(String),

    /// The ELF file doesn't import the C++ runtime support symbols.
    #[error("runtime support symbol `{0}` not found: not linked against a C++ runtime?")]
    MissingRuntimeSymbol(&'static str),

    /// Inconsistent relocation data.
    #[error("bad relocation data")]
    Rtti(#[source] rtti::Error),

    /// Error reading the ELF file.
    #[error("failed to read ELF file")]
    Object(#[from] objfile::Error),

    /// Error reading the PDB file.
    #[error("failed to read PDB file")]
    Pdb(#[from] pdbfile::Error),

    /// Error writing the store.
    #[error("failed to write store")]
    Store(#[from] store::Error),

    /// IO error.
    #[error("IO error")]
    IO(#[from] io::Error),
}

impl From<rtti::Error> for Error {
    fn from(e: rtti::Error) -> Self {
        match e {
            rtti::Error::MissingRuntimeSymbol(name) => Self::MissingRuntimeSymbol(name),
            other => Self::Rtti(other),
        }
    }
}

/// Tunables of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    /// Canonical key prefixes excluded from the store.
    pub skip_prefixes: Vec<String>,
    /// Name of the ELF section holding vtables and `type_info` records.
    pub data_section: String,
    /// Number of processed symbols between progress log lines.
    pub progress_interval: u64,
    /// Drop symbols at address zero (undefined imports).
    pub skip_zero_address: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            skip_prefixes: DEFAULT_SKIP_PREFIXES.iter().map(|&x| x.to_owned()).collect(),
            data_section: ".data.rel.ro".to_owned(),
            progress_interval: 100_000,
            skip_zero_address: true,
        }
    }
}

/// Why a symbol was excluded from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No C++ mangling prefix.
    NotMangled,
    /// Rejected by the native grammar.
    Malformed,
    /// Canonical key starts with a configured prefix.
    SkipPrefix(String),
    /// Symbol is located at address zero.
    ZeroAddress,
    /// Decoded, but without canonical mapping.
    Unknown,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotMangled => f.write_str("not-mangled"),
            SkipReason::Malformed => f.write_str("malformed"),
            SkipReason::SkipPrefix(prefix) => write!(f, "skip-prefix:{prefix}"),
            SkipReason::ZeroAddress => f.write_str("zero-address"),
            SkipReason::Unknown => f.write_str("unknown"),
        }
    }
}

/// Audit entry for an excluded symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    /// Name as found in the input.
    pub raw: String,
    /// Input the symbol was read from.
    pub origin: Origin,
    /// Symbol address.
    pub address: VirtAddr,
    /// Reason for exclusion.
    pub reason: SkipReason,
}

/// Statistics of a finished build.
#[derive(Debug, Default, Clone)]
pub struct BuildReport {
    /// Symbols read from all inputs.
    pub processed: u64,
    /// Symbol rows written.
    pub inserted: u64,
    /// Symbols excluded from the store.
    pub skipped_count: u64,
    /// Audit list of the excluded symbols.
    pub skipped: Vec<Skipped>,
    /// Type info records written.
    pub typeinfos: usize,
    /// Vtables written.
    pub vtables: usize,
    /// Wall time of the build.
    pub elapsed: Duration,
}

impl BuildReport {
    /// Writes the audit list as tab separated values.
    pub fn write_audit(&self, mut out: impl io::Write) -> io::Result<()> {
        writeln!(out, "origin\taddress\treason\traw")?;
        for entry in &self.skipped {
            writeln!(
                out,
                "{}\t{:#x}\t{}\t{}",
                entry.origin, entry.address, entry.reason, entry.raw
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "processed: {}", self.processed)?;
        writeln!(f, "inserted:  {}", self.inserted)?;
        writeln!(f, "skipped:   {}", self.skipped_count)?;
        writeln!(f, "typeinfos: {}", self.typeinfos)?;
        writeln!(f, "vtables:   {}", self.vtables)?;
        write!(f, "elapsed:   {:.2?}", self.elapsed)
    }
}

/// Accumulates decoded symbols and RTTI data until the store is written.
#[derive(Debug)]
pub struct Builder {
    config: BuildConfig,
    stage: Vec<SymbolRow>,
    typeinfos: BTreeMap<VirtAddr, TypeInfoRecord>,
    vtables: BTreeMap<VirtAddr, VTableRecord>,
    report: BuildReport,
    progress: Progress,
}

impl Builder {
    /// Creates an empty builder.
    pub fn new(config: BuildConfig) -> Self {
        Builder {
            config,
            stage: Vec::new(),
            typeinfos: BTreeMap::new(),
            vtables: BTreeMap::new(),
            report: BuildReport::default(),
            progress: Progress::new(),
        }
    }

    /// Adds the dynamic symbols of an ELF image, with vtables and type infos.
    pub fn add_elf(&mut self, reader: &objfile::Reader<'_>) -> Result {
        if !reader.is_little_endian() {
            return Err(Error::BigEndian);
        }

        let section = reader
            .load_section(self.config.data_section.as_bytes())?
            .ok_or_else(|| Error::MissingSection(self.config.data_section.clone()))?;
        debug!(
            "loaded `{}`: {:#x}..{:#x}",
            self.config.data_section,
            section.va_range().start,
            section.va_range().end,
        );

        let symbols = reader.dynamic_symbols()?;
        let relocs = reader.dynamic_relocations();
        debug!("{} dynamic symbols, {} relocations", symbols.len(), relocs.len());

        let classes = rtti::classify(&symbols, &relocs)?;
        let view = section.view();

        for sym in symbols.iter().filter(|x| !x.name.is_empty()) {
            let raw = String::from_utf8_lossy(&sym.name);
            let Some(root) = self.add_symbol(&raw, sym.address, Origin::Elf) else {
                continue;
            };
            let Root::SpecialName { kind, .. } = root else {
                continue;
            };

            match kind {
                SpecialKind::VTable => match vtable::extract(&view, sym.address, &classes.pending_pure_virtual) {
                    Ok(table) => {
                        self.vtables.insert(sym.address, table);
                    }
                    Err(e) => debug!("skipping vtable `{raw}`: {e}"),
                },
                SpecialKind::TypeInfo => {
                    let Some(&class) = classes.kinds.get(&sym.address) else {
                        continue;
                    };
                    match typeinfo::decode(&view, sym.address, class) {
                        Ok(record) => {
                            self.typeinfos.entry(sym.address).or_insert(record);
                        }
                        Err(e) => debug!("skipping type info `{raw}`: {e}"),
                    }
                }
                _ => {}
            }
        }

        debug!(
            "collected {} vtables and {} type infos",
            self.vtables.len(),
            self.typeinfos.len()
        );

        Ok(())
    }

    /// Adds public symbols read from a PDB.
    pub fn add_pdb(&mut self, symbols: &[PdbSymbol]) {
        for sym in symbols {
            self.add_symbol(&sym.name, sym.address, Origin::Pdb);
        }
    }

    /// Decodes and stages a single symbol, returning its root if staged.
    fn add_symbol(&mut self, raw: &str, address: VirtAddr, origin: Origin) -> Option<Root> {
        self.report.processed += 1;

        let decoded = self.decode(raw, address);
        let result = match decoded {
            Ok((root, row_key)) => {
                self.stage.push(SymbolRow {
                    key: row_key,
                    raw: raw.to_owned(),
                    original: demangle::demangle_original(raw).unwrap_or_default(),
                    kind: root.kind(),
                    origin,
                    address,
                });
                Some(root)
            }
            Err(reason) => {
                self.report.skipped_count += 1;
                self.report.skipped.push(Skipped {
                    raw: raw.to_owned(),
                    origin,
                    address,
                    reason,
                });
                None
            }
        };

        if self.config.progress_interval != 0
            && self.report.processed % self.config.progress_interval == 0
        {
            self.progress
                .log(self.stage.len() as u64, self.report.skipped_count);
        }

        result
    }

    fn decode(&self, raw: &str, address: VirtAddr) -> Result<(Root, String), SkipReason> {
        if address == 0 && self.config.skip_zero_address {
            return Err(SkipReason::ZeroAddress);
        }

        let root = demangle::decode(raw).map_err(|e| match e {
            demangle::DecodeError::NotMangled => SkipReason::NotMangled,
            _ => SkipReason::Malformed,
        })?;
        if root.kind() == RootKind::Unknown {
            return Err(SkipReason::Unknown);
        }

        let key = root.key();
        if let Some(prefix) = self
            .config
            .skip_prefixes
            .iter()
            .find(|&x| key.starts_with(x.as_str()))
        {
            return Err(SkipReason::SkipPrefix(prefix.clone()));
        }

        Ok((root, key))
    }

    /// Writes the store into `out`, returning the stream and the report.
    pub fn write<O: io::Write>(self, out: O) -> Result<(O, BuildReport)> {
        let Builder {
            mut stage,
            typeinfos,
            vtables,
            mut report,
            progress,
            ..
        } = self;

        debug!("sorting {} symbols", stage.len());
        stage.sort_by(|a, b| a.key.cmp(&b.key));
        let index = Index::build(stage.iter().map(|x| x.key.as_str()));

        report.inserted = stage.len() as u64;
        report.typeinfos = typeinfos.len();
        report.vtables = vtables.len();

        let mut writer = store::Writer::new(out)?;
        for row in stage {
            writer.write(row)?;
        }
        for record in typeinfos.into_values() {
            writer.write(record)?;
        }
        for table in vtables.into_values() {
            writer.write(table)?;
        }

        debug!("writing index with {} tokens", index.len());
        for (token, ordinals) in index.iter() {
            writer.write(IndexEntry {
                token: token.to_owned(),
                ordinals: ordinals.to_vec(),
            })?;
        }

        let out = writer.finalize()?;
        report.elapsed = progress.started.elapsed();
        Ok((out, report))
    }

    /// Writes the store to `dest`, replacing it only on success.
    pub fn persist(self, dest: &path::Path) -> Result<BuildReport> {
        let dir = match dest.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => path::Path::new("."),
        };

        let temp = tempfile::NamedTempFile::new_in(dir)?;
        let (buffered, report) = self.write(io::BufWriter::new(temp))?;
        let temp = buffered.into_inner().map_err(|e| e.into_error())?;
        temp.as_file().sync_all()?;
        temp.persist(dest).map_err(|e| e.error)?;

        Ok(report)
    }
}

/// Runs a complete build from the given inputs into `dest`.
pub fn build(
    config: BuildConfig,
    elf: Option<&path::Path>,
    pdb: Option<&path::Path>,
    dest: &path::Path,
) -> Result<BuildReport> {
    if elf.is_none() && pdb.is_none() {
        return Err(Error::NoInput);
    }

    let mut builder = Builder::new(config);

    if let Some(path) = elf {
        debug!("reading ELF file {}", path.display());
        let obj = objfile::File::load(path)?;
        builder.add_elf(&obj.parse()?)?;
    }

    if let Some(path) = pdb {
        debug!("reading PDB file {}", path.display());
        let symbols = pdbfile::PdbFile::open(path)?.public_symbols()?;
        builder.add_pdb(&symbols);
    }

    builder.persist(dest)
}

/// Periodic progress logging state.
#[derive(Debug)]
struct Progress {
    started: Instant,
    last: Instant,
    last_inserted: u64,
}

impl Progress {
    fn new() -> Self {
        let now = Instant::now();
        Progress {
            started: now,
            last: now,
            last_inserted: 0,
        }
    }

    fn log(&mut self, inserted: u64, skipped: u64) {
        let now = Instant::now();
        let delta = inserted - self.last_inserted;
        let secs = now.duration_since(self.last).as_secs_f64();
        let rate = if secs > 0.0 { delta as f64 / secs } else { 0.0 };
        debug!("inserted {inserted} (+{delta}, {rate:.0} /s, {skipped} skipped)");
        self.last = now;
        self.last_inserted = inserted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objfile::tests::{standard_elf, words, write_temp, DATA_ADDR};
    use crate::rtti::{reloc, Base, TypeInfoKind};
    use crate::store::Database;
    use std::fs;

    const FOO_TI: VirtAddr = DATA_ADDR;
    const FOO_VT: VirtAddr = DATA_ADDR + 0x10;
    const BAR_TI: VirtAddr = DATA_ADDR + 0x40;

    fn sample_elf() -> Vec<u8> {
        let symbols = [
            (reloc::CLASS_TYPE_INFO, 0),
            (reloc::SI_CLASS_TYPE_INFO, 0),
            (reloc::VMI_CLASS_TYPE_INFO, 0),
            (reloc::PURE_VIRTUAL, 0),
            ("_ZTI3Foo", FOO_TI),
            ("_ZTV3Foo", FOO_VT),
            ("_ZTI3Bar", BAR_TI),
            ("_ZN3Foo3barEv", 0x1234),
            ("_ZNSt6vectorIiSaIiEE9push_backERKi", 0x5678),
            ("malloc", 0x3000),
            ("_Z5ab", 0x3100),
        ];
        let relocs = [
            (FOO_TI, reloc::R_X86_64_64, 1),
            (FOO_VT + 0x18, reloc::R_X86_64_64, 4),
            (BAR_TI, reloc::R_X86_64_64, 2),
        ];
        let data = words(&[
            // Foo type info: vptr, name
            0, 0x600,
            // Foo vtable: offset-to-top, rtti, entries
            0, FOO_TI, 0x1234, 0, 0x5678, 0,
            // Bar type info: vptr, name, base
            0, 0x700, FOO_TI,
        ]);
        standard_elf(&symbols, &relocs, data, vec![])
    }

    fn key(raw: &str) -> String {
        demangle::decode_key(raw).unwrap().0
    }

    #[test]
    fn elf_symbols() {
        let file = write_temp(&sample_elf());
        let obj = objfile::File::load(file.path()).unwrap();
        let mut builder = Builder::new(BuildConfig::default());
        builder.add_elf(&obj.parse().unwrap()).unwrap();

        let (buf, report) = builder.write(Vec::new()).unwrap();
        assert_eq!(report.processed, 11);
        assert_eq!(report.inserted, 4);
        assert_eq!(report.skipped_count, 7);
        assert_eq!(report.typeinfos, 2);
        assert_eq!(report.vtables, 1);

        let reasons: Vec<_> = report
            .skipped
            .iter()
            .map(|x| (x.raw.as_str(), x.reason.clone()))
            .collect();
        assert_eq!(reasons[..4].iter().filter(|x| x.1 == SkipReason::ZeroAddress).count(), 4);
        assert_eq!(
            reasons[4..],
            [
                (
                    "_ZNSt6vectorIiSaIiEE9push_backERKi",
                    SkipReason::SkipPrefix("std::".to_owned())
                ),
                ("malloc", SkipReason::NotMangled),
                ("_Z5ab", SkipReason::Malformed),
            ]
        );

        let db = Database::read_from(&buf[..]).unwrap();
        let mut expected: Vec<_> = ["_ZTI3Foo", "_ZTV3Foo", "_ZTI3Bar", "_ZN3Foo3barEv"]
            .into_iter()
            .map(key)
            .collect();
        expected.sort();
        let keys: Vec<_> = db.symbols().iter().map(|x| x.key.clone()).collect();
        assert_eq!(keys, expected);
        assert!(db.symbols().iter().all(|x| x.origin == Origin::Elf));

        let func = db.symbols_at(0x1234).next().unwrap();
        assert_eq!(func.raw, "_ZN3Foo3barEv");
        assert_eq!(func.kind, RootKind::Function);
        assert_eq!(func.original, "Foo::bar()");

        assert_eq!(db.vtable(FOO_VT).unwrap().entries, [0x1234, 0, 0x5678]);
        assert_eq!(db.typeinfo(FOO_TI).unwrap().kind, TypeInfoKind::NoInherit);
        assert_eq!(
            db.typeinfo(BAR_TI).unwrap().bases,
            [Base {
                address: FOO_TI,
                offset: 0,
                flags: 0,
            }]
        );
        assert_eq!(db.derived_from(FOO_TI), [BAR_TI]);
        assert_eq!(db.search("foo bar").len(), 1);
    }

    #[test]
    fn skip_configuration() {
        let file = write_temp(&sample_elf());
        let obj = objfile::File::load(file.path()).unwrap();
        let config = BuildConfig {
            skip_prefixes: vec!["Foo::".to_owned()],
            ..BuildConfig::default()
        };
        let mut builder = Builder::new(config);
        builder.add_elf(&obj.parse().unwrap()).unwrap();

        let (buf, report) = builder.write(Vec::new()).unwrap();
        let db = Database::read_from(&buf[..]).unwrap();
        let keys: Vec<_> = db.symbols().iter().map(|x| x.key.as_str()).collect();
        assert!(keys.iter().any(|x| x.starts_with("std::vector")));
        assert!(!keys.iter().any(|x| x.starts_with("Foo::")));
        assert!(report
            .skipped
            .iter()
            .any(|x| x.reason == SkipReason::SkipPrefix("Foo::".to_owned())));

        // Vtables and type infos of excluded symbols are dropped, too.
        assert_eq!(report.vtables, 0);
    }

    #[test]
    fn pdb_symbols() {
        let symbols = [
            PdbSymbol {
                name: "?foo@@YAXXZ".to_owned(),
                address: 0x1000,
            },
            PdbSymbol {
                name: "?bar@std@@YAXXZ".to_owned(),
                address: 0x2000,
            },
            PdbSymbol {
                name: "?baz@@YAXXZ".to_owned(),
                address: 0,
            },
            PdbSymbol {
                name: "_ZN3Foo3barEv".to_owned(),
                address: 0x3000,
            },
        ];

        let mut builder = Builder::new(BuildConfig::default());
        builder.add_pdb(&symbols);
        let (buf, report) = builder.write(Vec::new()).unwrap();
        assert_eq!(report.processed, 4);
        assert_eq!(report.skipped_count, 2);
        assert!(report.skipped.iter().all(|x| x.origin == Origin::Pdb));

        let db = Database::read_from(&buf[..]).unwrap();
        let mut expected = vec![key("?foo@@YAXXZ"), key("_ZN3Foo3barEv")];
        expected.sort();
        let keys: Vec<_> = db.symbols().iter().map(|x| x.key.clone()).collect();
        assert_eq!(keys, expected);
        assert!(db.symbols().iter().all(|x| x.origin == Origin::Pdb));
        assert_eq!(db.vtables().count(), 0);
    }

    #[test]
    fn build_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.symdb");
        fs::write(&dest, b"previous").unwrap();
        let elf = write_temp(&sample_elf());

        let config = BuildConfig {
            data_section: ".data.missing".to_owned(),
            ..BuildConfig::default()
        };
        let err = build(config, Some(elf.path()), None, &dest).unwrap_err();
        assert!(matches!(err, Error::MissingSection(ref x) if x == ".data.missing"));
        assert_eq!(fs::read(&dest).unwrap(), b"previous");

        let report = build(BuildConfig::default(), Some(elf.path()), None, &dest).unwrap();
        assert_eq!(report.inserted, 4);
        let db = Database::open(&dest).unwrap();
        assert_eq!(db.symbols().len(), 4);

        // Only the destination remains in the directory.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        assert!(matches!(
            build(BuildConfig::default(), None, None, &dest),
            Err(Error::NoInput)
        ));
    }

    #[test]
    fn missing_runtime() {
        let image = standard_elf(&[("_ZTI3Foo", FOO_TI)], &[], words(&[0, 0]), vec![]);
        let file = write_temp(&image);
        let obj = objfile::File::load(file.path()).unwrap();
        let mut builder = Builder::new(BuildConfig::default());
        assert!(matches!(
            builder.add_elf(&obj.parse().unwrap()),
            Err(Error::MissingRuntimeSymbol(_))
        ));
    }

    #[test]
    fn big_endian_is_rejected() {
        let mut image = vec![0u8; 64];
        image[..4].copy_from_slice(b"\x7fELF");
        image[4] = 2; // ELFCLASS64
        image[5] = 2; // ELFDATA2MSB
        image[6] = 1; // EV_CURRENT
        image[16..18].copy_from_slice(&object::elf::ET_DYN.to_be_bytes());
        image[18..20].copy_from_slice(&object::elf::EM_PPC64.to_be_bytes());
        image[20..24].copy_from_slice(&1u32.to_be_bytes());
        image[52..54].copy_from_slice(&64u16.to_be_bytes());
        image[58..60].copy_from_slice(&64u16.to_be_bytes());

        let file = write_temp(&image);
        let obj = objfile::File::load(file.path()).unwrap();
        let reader = obj.parse().unwrap();
        assert!(!reader.is_little_endian());

        let mut builder = Builder::new(BuildConfig::default());
        assert!(matches!(builder.add_elf(&reader), Err(Error::BigEndian)));
        let (_, report) = builder.write(io::sink()).unwrap();
        assert_eq!(report.processed, 0);
    }

    #[test]
    fn audit_listing() {
        let mut builder = Builder::new(BuildConfig::default());
        builder.add_pdb(&[PdbSymbol {
            name: "plain".to_owned(),
            address: 0x10,
        }]);
        let (_, report) = builder.write(io::sink()).unwrap();

        let mut out = Vec::new();
        report.write_audit(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "origin\taddress\treason\traw\npdb\t0x10\tnot-mangled\tplain\n"
        );
    }
}

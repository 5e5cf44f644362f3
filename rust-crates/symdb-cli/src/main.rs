// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Command-line front end for decoding symbols and building and querying
//! symbol stores.

use argh::FromArgs;
use std::io::{self, BufRead as _, Write as _};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use symdb::builder::{self, BuildConfig};
use symdb::store::{Database, SymbolRow};
use symdb::{dbglog, demangle, objfile, pdbfile, AnyError, VirtAddr};

type Result<T = ()> = std::result::Result<T, AnyError>;

#[derive(FromArgs)]
/// Canonical C++ symbol decoding, RTTI recovery and symbol stores.
struct Args {
    /// print debug messages to stderr
    #[argh(switch, short = 'v')]
    verbose: bool,

    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Decode(DecodeCmd),
    DecodeOriginal(DecodeOriginalCmd),
    ElfSections(ElfSectionsCmd),
    Dump(DumpCmd),
    DumpDecode(DumpDecodeCmd),
    DumpDecodeOriginal(DumpDecodeOriginalCmd),
    BuildDatabase(BuildDatabaseCmd),
    Search(SearchCmd),
    VTable(VTableCmd),
    TypeInfo(TypeInfoCmd),
}

#[derive(FromArgs)]
/// Print the canonical key of a mangled symbol.
#[argh(subcommand, name = "decode")]
struct DecodeCmd {
    /// mangled symbol; one symbol per line is read from stdin if omitted
    #[argh(positional)]
    symbol: Option<String>,
}

#[derive(FromArgs)]
/// Print the compiler-style demangling of a mangled symbol.
#[argh(subcommand, name = "decode-original")]
struct DecodeOriginalCmd {
    /// mangled symbol; one symbol per line is read from stdin if omitted
    #[argh(positional)]
    symbol: Option<String>,
}

#[derive(FromArgs)]
/// List the section headers of an ELF file.
#[argh(subcommand, name = "elf-sections")]
struct ElfSectionsCmd {
    /// ELF file
    #[argh(positional)]
    elf: PathBuf,
}

#[derive(FromArgs)]
/// List the raw symbols of an ELF or PDB file.
#[argh(subcommand, name = "dump")]
struct DumpCmd {
    /// ELF or PDB (`.pdb` extension) file
    #[argh(positional)]
    file: PathBuf,
}

#[derive(FromArgs)]
/// List the canonical keys of all symbols of an ELF or PDB file.
#[argh(subcommand, name = "dump-decode")]
struct DumpDecodeCmd {
    /// ELF or PDB (`.pdb` extension) file
    #[argh(positional)]
    file: PathBuf,
}

#[derive(FromArgs)]
/// List the compiler-style demangling of all symbols of an ELF or PDB file.
#[argh(subcommand, name = "dump-decode-original")]
struct DumpDecodeOriginalCmd {
    /// ELF or PDB (`.pdb` extension) file
    #[argh(positional)]
    file: PathBuf,
}

#[derive(FromArgs)]
/// Build a symbol store.
#[argh(subcommand, name = "build-database")]
struct BuildDatabaseCmd {
    /// output store path
    #[argh(positional)]
    out: PathBuf,

    /// PDB file to read public symbols from
    #[argh(option)]
    pdb: Option<PathBuf>,

    /// ELF shared object to read dynamic symbols, vtables and type infos from
    #[argh(option)]
    elf: Option<PathBuf>,

    /// additional canonical key prefix to exclude (repeatable)
    #[argh(option)]
    skip_prefix: Vec<String>,

    /// don't exclude the default namespaces (`std::`, `google::`, ...)
    #[argh(switch)]
    no_default_skips: bool,

    /// keep symbols located at address zero
    #[argh(switch)]
    keep_zero_address: bool,

    /// write the list of skipped symbols as TSV to this file
    #[argh(option)]
    audit: Option<PathBuf>,
}

#[derive(FromArgs)]
/// Full-text prefix search in a symbol store.
#[argh(subcommand, name = "search")]
struct SearchCmd {
    /// symbol store
    #[argh(positional)]
    db: PathBuf,

    /// search terms
    #[argh(positional, greedy)]
    query: Vec<String>,
}

#[derive(FromArgs)]
/// Print the entries of a vtable.
#[argh(subcommand, name = "vtable")]
struct VTableCmd {
    /// symbol store
    #[argh(positional)]
    db: PathBuf,

    /// vtable address (decimal or 0x-prefixed hex)
    #[argh(positional, from_str_fn(parse_address))]
    address: VirtAddr,
}

#[derive(FromArgs)]
/// Print a type info record with its bases and derived types.
#[argh(subcommand, name = "typeinfo")]
struct TypeInfoCmd {
    /// symbol store
    #[argh(positional)]
    db: PathBuf,

    /// type info address (decimal or 0x-prefixed hex)
    #[argh(positional, from_str_fn(parse_address))]
    address: VirtAddr,
}

fn parse_address(s: &str) -> std::result::Result<VirtAddr, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => VirtAddr::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address `{s}`: {e}"))
}

fn main() -> ExitCode {
    let args: Args = argh::from_env();
    dbglog::set_enabled(args.verbose);

    let result = match args.command {
        Command::Decode(cmd) => decode(cmd.symbol, |raw| {
            demangle::decode_key(raw).map(|(key, _)| key)
        }),
        Command::DecodeOriginal(cmd) => decode(cmd.symbol, demangle::demangle_original),
        Command::ElfSections(cmd) => elf_sections(&cmd.elf),
        Command::Dump(cmd) => dump(&cmd.file, |_| None),
        Command::DumpDecode(cmd) => dump(&cmd.file, |raw| {
            let (key, kind) = demangle::decode_key(raw).ok()?;
            Some(format!("{:<8} {key}", kind.label()))
        }),
        Command::DumpDecodeOriginal(cmd) => {
            dump(&cmd.file, |raw| demangle::demangle_original(raw).ok())
        }
        Command::BuildDatabase(cmd) => build_database(cmd),
        Command::Search(cmd) => search(&cmd.db, &cmd.query.join(" ")),
        Command::VTable(cmd) => vtable(&cmd.db, cmd.address),
        Command::TypeInfo(cmd) => typeinfo(&cmd.db, cmd.address),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            let mut source = e.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

fn decode<F>(symbol: Option<String>, f: F) -> Result
where
    F: Fn(&str) -> demangle::Result<String>,
{
    if let Some(symbol) = symbol {
        println!("{}", f(&symbol)?);
        return Ok(());
    }

    let mut out = io::BufWriter::new(io::stdout().lock());
    for line in io::stdin().lock().lines() {
        let line = line?;
        let raw = line.trim();
        match demangle::detect(raw) {
            Some(_) => match f(raw) {
                Ok(decoded) => writeln!(out, "{decoded}")?,
                Err(e) => {
                    symdb::debug!("{raw}: {e}");
                    writeln!(out, "{line}")?;
                }
            },
            None => writeln!(out, "{line}")?,
        }
    }
    out.flush()?;

    Ok(())
}

fn elf_sections(path: &Path) -> Result {
    let obj = objfile::File::load(path)?;
    let reader = obj.parse()?;

    let mut out = io::BufWriter::new(io::stdout().lock());
    writeln!(out, "{:<24} {:>18} {:>12} {:>12}", "name", "address", "size", "offset")?;
    for section in reader.sections() {
        writeln!(
            out,
            "{:<24} {:#018x} {:#12x} {:#12x}",
            section.name, section.address, section.size, section.file_offset
        )?;
    }
    out.flush()?;

    Ok(())
}

fn is_pdb(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdb"))
}

/// Reads `(name, address)` pairs from an ELF or PDB file.
fn read_symbols(path: &Path) -> Result<Vec<(String, VirtAddr)>> {
    if is_pdb(path) {
        let symbols = pdbfile::PdbFile::open(path)?.public_symbols()?;
        return Ok(symbols.into_iter().map(|x| (x.name, x.address)).collect());
    }

    let obj = objfile::File::load(path)?;
    let symbols = obj.parse()?.dynamic_symbols()?;
    Ok(symbols
        .into_iter()
        .filter(|x| !x.name.is_empty())
        .map(|x| (String::from_utf8_lossy(&x.name).into_owned(), x.address))
        .collect())
}

/// Prints every symbol of `path`, formatted with `f` or raw if it returns `None`.
fn dump(path: &Path, f: impl Fn(&str) -> Option<String>) -> Result {
    let mut out = io::BufWriter::new(io::stdout().lock());
    for (name, address) in read_symbols(path)? {
        let text = f(&name).unwrap_or(name);
        writeln!(out, "{address:#018x} {text}")?;
    }
    out.flush()?;
    Ok(())
}

fn build_database(cmd: BuildDatabaseCmd) -> Result {
    let mut config = BuildConfig::default();
    if cmd.no_default_skips {
        config.skip_prefixes.clear();
    }
    config.skip_prefixes.extend(cmd.skip_prefix);
    config.skip_zero_address = !cmd.keep_zero_address;

    let report = builder::build(config, cmd.elf.as_deref(), cmd.pdb.as_deref(), &cmd.out)?;
    println!("{report}");

    if let Some(path) = cmd.audit {
        let mut out = io::BufWriter::new(std::fs::File::create(path)?);
        report.write_audit(&mut out)?;
        out.flush()?;
    }

    Ok(())
}

fn print_row(out: &mut impl io::Write, indent: &str, row: &SymbolRow) -> io::Result<()> {
    writeln!(
        out,
        "{indent}{:#018x} {:<8} {:<3} {}",
        row.address,
        row.kind.label(),
        row.origin,
        row.key
    )
}

fn search(db: &Path, query: &str) -> Result {
    let db = Database::open(db)?;

    let mut out = io::BufWriter::new(io::stdout().lock());
    for group in db.search_grouped(query) {
        writeln!(out, "{} ({})", group.prefix, group.items.len())?;
        for row in group.items {
            print_row(&mut out, "  ", row)?;
        }
    }
    out.flush()?;

    Ok(())
}

/// Joins the keys of all symbols at `address`.
fn labels(db: &Database, address: VirtAddr) -> String {
    let keys: Vec<_> = db.symbols_at(address).map(|x| x.key.as_str()).collect();
    if keys.is_empty() {
        "?".to_owned()
    } else {
        keys.join(" / ")
    }
}

fn vtable(db: &Path, address: VirtAddr) -> Result {
    let db = Database::open(db)?;
    let table = db
        .vtable(address)
        .ok_or_else(|| format!("no vtable at {address:#x}"))?;

    let mut out = io::BufWriter::new(io::stdout().lock());
    writeln!(out, "{address:#x} {}", labels(&db, address))?;
    for (idx, &target) in table.entries.iter().enumerate() {
        let label = match target {
            0 => "__cxa_pure_virtual".to_owned(),
            _ => labels(&db, target),
        };
        writeln!(out, "  [{idx}] {target:#018x} {label}")?;
    }
    out.flush()?;

    Ok(())
}

fn typeinfo(db: &Path, address: VirtAddr) -> Result {
    let db = Database::open(db)?;
    let info = db
        .typeinfo(address)
        .ok_or_else(|| format!("no type info at {address:#x}"))?;

    let mut out = io::BufWriter::new(io::stdout().lock());
    writeln!(out, "{address:#x} {}", labels(&db, address))?;
    writeln!(out, "  kind:  {:?}", info.kind)?;
    writeln!(out, "  flags: {:#x}", info.flags)?;
    for base in &info.bases {
        writeln!(
            out,
            "  base:    {:#x} offset={} flags={:#x} {}",
            base.address,
            base.offset,
            base.flags,
            labels(&db, base.address)
        )?;
    }
    for &derived in db.derived_from(address) {
        writeln!(out, "  derived: {derived:#x} {}", labels(&db, derived))?;
    }
    out.flush()?;

    Ok(())
}

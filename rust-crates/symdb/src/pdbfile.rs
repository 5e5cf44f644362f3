// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Public symbols of Microsoft program databases.

use crate::{AnyError, VirtAddr};
use pdb::FallibleIterator as _;
use std::{fs, io, path};

/// Result type shorthand.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Errors that can occur while reading a PDB.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error.
    #[error("IO error")]
    IO(#[from] io::Error),

    /// Error reported by the PDB parser.
    #[error("malformed PDB")]
    Pdb(#[source] AnyError),
}

impl From<pdb::Error> for Error {
    fn from(e: pdb::Error) -> Self {
        Self::Pdb(Box::new(e))
    }
}

/// Public symbol with its relative virtual address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdbSymbol {
    /// Raw (mangled) name.
    pub name: String,
    /// Relative virtual address in the image.
    pub address: VirtAddr,
}

/// Opened program database.
pub struct PdbFile(pdb::PDB<'static, fs::File>);

impl PdbFile {
    /// Opens the PDB at the given path and reads its stream directory.
    pub fn open(path: &path::Path) -> Result<Self> {
        let file = fs::File::open(path)?;
        Ok(Self(pdb::PDB::open(file)?))
    }

    /// Reads all public symbols from the global symbol stream.
    ///
    /// Symbols whose section offset can't be translated into an RVA are
    /// dropped.
    pub fn public_symbols(&mut self) -> Result<Vec<PdbSymbol>> {
        let address_map = self.0.address_map()?;
        let symbols = self.0.global_symbols()?;

        let mut out = Vec::new();
        let mut iter = symbols.iter();
        while let Some(symbol) = iter.next()? {
            let Ok(pdb::SymbolData::Public(public)) = symbol.parse() else {
                continue;
            };
            let Some(rva) = public.offset.to_rva(&address_map) else {
                continue;
            };
            out.push(PdbSymbol {
                name: public.name.to_string().into_owned(),
                address: VirtAddr::from(rva.0),
            });
        }

        Ok(out)
    }
}

// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Read access to the parts of ELF images needed for symbol and RTTI recovery.

use crate::rtti::DataView;
use crate::{AnyError, VirtAddr};

use std::io::Read as _;
use std::{fmt, fs, io, ops, path};

use flate2::read::ZlibDecoder;
use memmap2::{Mmap, MmapMut};
use object::{CompressionFormat, Object as _, ObjectSection as _, ObjectSymbol as _};
use zstd::stream::read::Decoder as ZstdDecoder;

/// Maximum size of an individual object section to keep in memory.
///
/// All sections where the decompressed representation is larger than this
/// constant are instead read into anonymous temporary files and  `mmap`ed.
const SWAP_THRESH: usize = 16 * 1024 * 1024;

/// Result type shorthand.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Errors that can occur during object file parsing.
#[non_exhaustive]
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Sections are compressed in an unsupported format")]
    UnsupportedCompressionFormat,

    #[error("Object file is too big to be loaded")]
    FileTooBig,

    #[error("IO error")]
    IO(#[from] io::Error),

    #[error(transparent)]
    Other(AnyError),
}

/// Conversion of [`object`] errors into ours, with type erasure.
///
/// We erase the type here to prevent leaking [`object`] library types into our
/// public interface. If code needs to special-case based on particular [`object`]
/// errors, we should instead lift them into custom error variants.
impl From<object::Error> for Error {
    fn from(e: object::Error) -> Self {
        Self::Other(Box::new(e))
    }
}

/// Maps an ELF image into memory.
///
/// The backing file is `mmap`ed to make reading more efficient. This uses the
/// [`object`] library to perform the actual heavy lifting, however this
/// should be considered an implementation detail.
pub struct File(Mmap);

impl File {
    /// Map the file at the given path into memory.
    pub fn load(path: &path::Path) -> Result<Self> {
        Self::load_file(&fs::File::open(path)?)
    }

    /// Map the given file into memory.
    pub fn load_file(file: &fs::File) -> Result<Self> {
        Ok(Self(unsafe { Mmap::map(file)? }))
    }

    /// Parse the header and create a reader.
    pub fn parse(&self) -> Result<Reader<'_>> {
        Ok(Reader(object::File::parse(&self.0[..])?))
    }
}

/// Entry of the dynamic symbol table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynSymbol {
    /// Index in `.dynsym`.
    pub index: usize,
    /// Raw (mangled) name.
    pub name: Vec<u8>,
    /// Symbol value. Zero for imports.
    pub address: VirtAddr,
}

/// Dynamic relocation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    /// Address patched by the loader.
    pub offset: VirtAddr,
    /// Raw ELF relocation type (`ELF64_R_TYPE`).
    pub r_type: u32,
    /// Referenced `.dynsym` index, if any.
    pub symbol: Option<usize>,
}

/// Summary of an ELF section header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    /// Section name, lossily converted to UTF-8.
    pub name: String,
    /// Virtual address. Zero for sections that aren't loaded.
    pub address: VirtAddr,
    /// Size in bytes.
    pub size: u64,
    /// Offset of the data in the file. Zero for `SHT_NOBITS`.
    pub file_offset: u64,
}

/// Provides read access to the data in an object file.
///
/// Created via [`File::parse`].
pub struct Reader<'obj>(object::File<'obj>);

impl<'obj> Reader<'obj> {
    /// Loads the section with the given name into memory.
    ///
    /// Depending on whether the section is compressed in the input file or not,
    /// this can be an expensive operation. Callers should store and retrieve
    /// the returned instance if it is needed more than once.
    pub fn load_section(&self, name: &[u8]) -> Result<Option<Section<'obj>>> {
        let Some(obj_sec) = self.0.section_by_name_bytes(name) else {
            return Ok(None);
        };

        Ok(Some(Section {
            virt_addr: obj_sec.address(),
            virt_size: obj_sec.size(),
            ptr_size: self.pointer_width(),
            data: SectionData::load_from_obj_sec(&obj_sec)?,
        }))
    }

    /// Width of a pointer in bytes: 8 for 64-bit images, 4 otherwise.
    pub fn pointer_width(&self) -> usize {
        if self.0.is_64() {
            8
        } else {
            4
        }
    }

    /// Checks whether this file has little-endian byte-order.
    pub fn is_little_endian(&self) -> bool {
        self.0.is_little_endian()
    }

    /// Lists all section headers in file order, excluding the null section.
    pub fn sections(&self) -> Vec<SectionHeader> {
        self.0
            .sections()
            .map(|sec| SectionHeader {
                name: String::from_utf8_lossy(sec.name_bytes().unwrap_or_default()).into_owned(),
                address: sec.address(),
                size: sec.size(),
                file_offset: sec.file_range().map_or(0, |(offset, _)| offset),
            })
            .collect()
    }

    /// Reads the entire dynamic symbol table, including imports.
    ///
    /// The null symbol is included as well, so that the position of every
    /// entry in the returned vector equals its `.dynsym` index.
    pub fn dynamic_symbols(&self) -> Result<Vec<DynSymbol>> {
        let mut out = Vec::new();
        for sym in self.0.dynamic_symbols() {
            if out.is_empty() && sym.index().0 > 0 {
                out.push(DynSymbol {
                    index: 0,
                    name: Vec::new(),
                    address: 0,
                });
            }
            out.push(DynSymbol {
                index: sym.index().0,
                name: sym.name_bytes()?.to_vec(),
                address: sym.address(),
            });
        }
        Ok(out)
    }

    /// Reads all relocations that reference the dynamic symbol table.
    pub fn dynamic_relocations(&self) -> Vec<Relocation> {
        let Some(iter) = self.0.dynamic_relocations() else {
            return Vec::new();
        };

        iter.filter_map(|(offset, reloc)| {
            let object::RelocationFlags::Elf { r_type } = reloc.flags() else {
                return None;
            };
            let symbol = match reloc.target() {
                object::RelocationTarget::Symbol(idx) => Some(idx.0),
                _ => None,
            };
            Some(Relocation {
                offset,
                r_type,
                symbol,
            })
        })
        .collect()
    }
}

/// Information and raw data of an object file section.
#[derive(Debug)]
pub struct Section<'obj> {
    virt_addr: VirtAddr,
    virt_size: u64,
    ptr_size: usize,
    data: SectionData<'obj>,
}

impl<'obj> Section<'obj> {
    /// Returns the virtual address range of the section.
    pub fn va_range(&self) -> ops::Range<VirtAddr> {
        self.virt_addr..self.virt_addr + self.virt_size
    }

    /// Returns the virtual address of the first byte of this section.
    pub fn virt_addr(&self) -> VirtAddr {
        self.virt_addr
    }

    /// Returns the virtual size of the section.
    ///
    /// Can be larger than the actual data, padding must be assumed to be zeroed.
    pub fn virt_size(&self) -> u64 {
        self.virt_size
    }

    /// Translates a virtual address into an offset into the section data.
    pub fn offset_of(&self, va: VirtAddr) -> Option<usize> {
        let offset = usize::try_from(va.checked_sub(self.virt_addr)?).ok()?;
        (offset < self.len()).then_some(offset)
    }

    /// Translates an offset into the section data into a virtual address.
    pub fn va_of(&self, offset: usize) -> Option<VirtAddr> {
        (offset < self.len()).then(|| self.virt_addr + offset as u64)
    }

    /// Creates a view for reading pointer-sized words.
    pub fn view(&self) -> DataView<'_> {
        DataView::new(self.virt_addr, self, self.ptr_size)
    }
}

/// Allow using section objects where slices are expected.
impl<'obj> ops::Deref for Section<'obj> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match &self.data {
            SectionData::Borrowed(x) => x,
            SectionData::InMemory(x) => &x[..],
            SectionData::Swapped(x) => &x[..],
        }
    }
}

/// Storage for object file sections.
enum SectionData<'obj> {
    /// Section was uncompressed in the input file and we simply kept a ref.
    Borrowed(&'obj [u8]),

    /// Section was originally compressed and we decompressed it into memory.
    InMemory(Vec<u8>),

    /// Section was originally compressed and we decompressed it into a
    /// memory-mapped temporary file.
    Swapped(MmapMut),
}

impl<'obj> SectionData<'obj> {
    /// Create [`Self::InMemory`] variant from a reader.
    fn read_into_memory(final_size: usize, mut reader: impl io::Read) -> Result<Self> {
        let mut mem_buf = Vec::with_capacity(final_size);
        reader.read_to_end(&mut mem_buf)?;
        Ok(SectionData::InMemory(mem_buf))
    }

    /// Create [`Self::Swapped`] variant from a reader.
    fn read_into_swap(mut reader: impl io::Read) -> Result<Self> {
        let mut file = tempfile::tempfile()?;
        io::copy(&mut reader, &mut file)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(SectionData::Swapped(mmap))
    }

    /// Load the data from the given [`object::Section`].
    ///
    /// Uncompressed sections are handed out as a reference whereas compressed
    /// ones are either decoded into memory or into `mmap`ed temporary files
    /// based on their size.
    fn load_from_obj_sec(sec: &object::Section<'obj, '_>) -> Result<Self> {
        let data = sec.compressed_data()?;

        // Ensure that the file fits into memory.
        let final_size: usize = data
            .uncompressed_size
            .try_into()
            .map_err(|_| Error::FileTooBig)?;

        let decoder: Box<dyn io::Read> = match data.format {
            CompressionFormat::Zlib => Box::new(ZlibDecoder::new(data.data)),
            CompressionFormat::Zstandard => Box::new(ZstdDecoder::new(data.data)?),
            CompressionFormat::None => return Ok(SectionData::Borrowed(data.data)),
            _ => return Err(Error::UnsupportedCompressionFormat),
        };

        // Still here? Compressed section: unpack it.
        let decoder = decoder.take(final_size as u64);
        if final_size >= SWAP_THRESH {
            Self::read_into_swap(decoder)
        } else {
            Self::read_into_memory(final_size, decoder)
        }
    }
}

impl<'obj> fmt::Debug for SectionData<'obj> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (storage, len) = match self {
            Self::Borrowed(x) => ("borrowed", x.len()),
            Self::InMemory(x) => ("in-memory", x.len()),
            Self::Swapped(x) => ("mmapped", x.len()),
        };

        write!(f, "SectionData([{} bytes, {}])", len, storage)
    }
}

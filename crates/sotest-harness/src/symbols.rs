//! Dynamic-symbol extraction from on-disk ELF images.
//!
//! The extractor maps the library file read-only and walks the section
//! header table until it finds the dynamic symbol table (`sh_type` 11),
//! then resolves symbol names through the companion string table named by
//! the section's `sh_link` field. Nothing is loaded into the process; the
//! whole walk happens on the mapped bytes.
//!
//! ## Field offsets
//!
//! All multi-byte fields are assembled byte by byte according to the
//! encoding byte in the identification header; no alignment is assumed.
//! The class-dependent offsets used below:
//!
//! | Field | 32-bit | 64-bit | Width (32/64) |
//! |-------|--------|--------|---------------|
//! | `e_shoff` | 0x20 | 0x28 | 4 / 8 |
//! | `e_shentsize` | 0x2e | 0x3a | 2 / 2 |
//! | `e_shnum` | 0x30 | 0x3c | 2 / 2 |
//! | `sh_type` | +0x04 | +0x04 | 4 / 4 |
//! | `sh_offset` | +0x10 | +0x18 | 4 / 8 |
//! | `sh_size` | +0x14 | +0x20 | 4 / 8 |
//! | `sh_link` | +0x18 | +0x28 | 4 / 4 |
//! | `sh_entsize` | +0x24 | +0x38 | 4 / 8 |
//! | `st_name` | +0x00 | +0x00 | 4 / 4 |
//!
//! Only little-endian images are implemented; the big-endian encoding value
//! is recognized and rejected while reading the identification bytes.
//!
//! Returned names are views into the mapping and live only as long as the
//! [`Symbols`] instance.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use thiserror::Error;
use tracing::debug;

/// Section type code of the dynamic symbol table.
const SHT_DYNSYM: u32 = 11;

/// Errors from opening and decoding an object file.
#[derive(Debug, Error)]
pub enum SymbolsError {
    #[error("{0} is not a regular file")]
    NotRegularFile(PathBuf),

    #[error("{0} is not an ELF object")]
    NotObjectFile(PathBuf),

    #[error("unsupported class or encoding (class {class}, encoding {encoding})")]
    UnsupportedClassOrEncoding { class: u8, encoding: u8 },

    #[error("no dynamic symbol table section")]
    DynsymNotFound,

    #[error("object truncated or malformed at byte {offset:#x}")]
    Truncated { offset: usize },

    #[error("symbol {index} has a bad name offset")]
    BadSymbolName { index: usize },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Elf32,
    Elf64,
}

#[derive(Debug, Clone, Copy)]
struct Header {
    class: Class,
    sections_offset: u64,
    section_size: u16,
    section_count: u16,
}

#[derive(Debug, Clone, Copy)]
struct Section {
    offset: u64,
    size: u64,
    link: u32,
    entsize: u64,
}

/// Read-only view of a library's dynamic symbol table.
#[derive(Debug)]
pub struct Symbols {
    map: Mmap,
    dynsym: Section,
    dynstr: Section,
    count: usize,
}

impl Symbols {
    /// Maps `path` and locates its dynamic symbol table.
    pub fn open(path: &Path) -> Result<Self, SymbolsError> {
        let meta = std::fs::metadata(path)?;
        if !meta.is_file() {
            return Err(SymbolsError::NotRegularFile(path.to_path_buf()));
        }

        let file = File::open(path)?;
        // SAFETY: the mapping is read-only and outlives every slice handed
        // out by this instance.
        let map = unsafe { Mmap::map(&file) }?;

        if map.len() < 6 || map[0..4] != [0x7f, b'E', b'L', b'F'] {
            return Err(SymbolsError::NotObjectFile(path.to_path_buf()));
        }

        let header = parse_header(&map)?;
        debug!(
            sections_offset = header.sections_offset,
            section_size = header.section_size,
            section_count = header.section_count,
            "parsed object header"
        );

        // Scan decodes only the type field of each entry; the matched
        // section is decoded in full afterwards.
        let mut dynsym = None;
        for index in 0..header.section_count {
            if section_type(&map, &header, index)? == SHT_DYNSYM {
                dynsym = Some(parse_section(&map, &header, index)?);
                break;
            }
        }
        let dynsym = dynsym.ok_or(SymbolsError::DynsymNotFound)?;

        if dynsym.entsize == 0 || dynsym.link >= u32::from(header.section_count) {
            return Err(SymbolsError::DynsymNotFound);
        }
        let dynstr = parse_section(&map, &header, dynsym.link as u16)?;

        let count = (dynsym.size / dynsym.entsize) as usize;
        debug!(count, "object contains dynamic symbols");

        Ok(Self {
            map,
            dynsym,
            dynstr,
            count,
        })
    }

    /// Number of entries in the dynamic symbol table.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Resolves the name of the symbol at `index`.
    ///
    /// The returned string borrows the mapping and is valid until this
    /// instance drops.
    pub fn name_at(&self, index: usize) -> Result<&str, SymbolsError> {
        if index >= self.count {
            return Err(SymbolsError::BadSymbolName { index });
        }

        let entry = self
            .dynsym
            .offset
            .checked_add(index as u64 * self.dynsym.entsize)
            .ok_or(SymbolsError::BadSymbolName { index })? as usize;
        // st_name is the first 4 bytes of the entry in both classes.
        let name_offset = read_u32(&self.map, entry)?;

        let end = self
            .dynstr
            .offset
            .saturating_add(self.dynstr.size)
            .min(self.map.len() as u64) as usize;
        let start = (self.dynstr.offset as usize)
            .checked_add(name_offset as usize)
            .filter(|&s| s < end)
            .ok_or(SymbolsError::BadSymbolName { index })?;

        let bytes = &self.map[start..end];
        let nul = bytes
            .iter()
            .position(|&b| b == 0)
            .ok_or(SymbolsError::BadSymbolName { index })?;
        std::str::from_utf8(&bytes[..nul]).map_err(|_| SymbolsError::BadSymbolName { index })
    }

    /// Iterates over all symbol names in table order.
    pub fn iter(&self) -> impl Iterator<Item = Result<&str, SymbolsError>> + '_ {
        (0..self.count).map(move |index| self.name_at(index))
    }
}

fn parse_header(map: &[u8]) -> Result<Header, SymbolsError> {
    let class = map[4];
    let encoding = map[5];

    // Encoding value 2 (big-endian) is a recognized format this extractor
    // does not implement; everything else is an invalid identification.
    let class = match (class, encoding) {
        (1, 1) => Class::Elf32,
        (2, 1) => Class::Elf64,
        _ => return Err(SymbolsError::UnsupportedClassOrEncoding { class, encoding }),
    };

    let (sections_offset, section_size, section_count) = match class {
        Class::Elf32 => (
            u64::from(read_u32(map, 0x20)?),
            read_u16(map, 0x2e)?,
            read_u16(map, 0x30)?,
        ),
        Class::Elf64 => (
            read_u64(map, 0x28)?,
            read_u16(map, 0x3a)?,
            read_u16(map, 0x3c)?,
        ),
    };

    Ok(Header {
        class,
        sections_offset,
        section_size,
        section_count,
    })
}

fn section_base(header: &Header, index: u16) -> Result<usize, SymbolsError> {
    header
        .sections_offset
        .checked_add(u64::from(header.section_size) * u64::from(index))
        .map(|base| base as usize)
        .ok_or(SymbolsError::Truncated { offset: usize::MAX })
}

/// The section's `sh_type`, without decoding the rest of the entry.
fn section_type(map: &[u8], header: &Header, index: u16) -> Result<u32, SymbolsError> {
    read_u32(map, section_base(header, index)? + 0x04)
}

fn parse_section(map: &[u8], header: &Header, index: u16) -> Result<Section, SymbolsError> {
    let base = section_base(header, index)?;

    match header.class {
        Class::Elf32 => Ok(Section {
            offset: u64::from(read_u32(map, base + 0x10)?),
            size: u64::from(read_u32(map, base + 0x14)?),
            link: read_u32(map, base + 0x18)?,
            entsize: u64::from(read_u32(map, base + 0x24)?),
        }),
        Class::Elf64 => Ok(Section {
            offset: read_u64(map, base + 0x18)?,
            size: read_u64(map, base + 0x20)?,
            link: read_u32(map, base + 0x28)?,
            entsize: read_u64(map, base + 0x38)?,
        }),
    }
}

fn bytes(map: &[u8], offset: usize, len: usize) -> Result<&[u8], SymbolsError> {
    offset
        .checked_add(len)
        .and_then(|end| map.get(offset..end))
        .ok_or(SymbolsError::Truncated { offset })
}

fn read_u16(map: &[u8], offset: usize) -> Result<u16, SymbolsError> {
    let b = bytes(map, offset, 2)?;
    Ok(u16::from(b[0]) | u16::from(b[1]) << 8)
}

fn read_u32(map: &[u8], offset: usize) -> Result<u32, SymbolsError> {
    let b = bytes(map, offset, 4)?;
    Ok(u32::from(read_u16(map, offset)?) | u32::from(read_u16(map, offset + 2)?) << 16)
}

fn read_u64(map: &[u8], offset: usize) -> Result<u64, SymbolsError> {
    let _ = bytes(map, offset, 8)?;
    Ok(u64::from(read_u32(map, offset)?) | u64::from(read_u32(map, offset + 4)?) << 32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Builds a minimal little-endian ELF image containing a dynamic symbol
    /// table with the given names. Sections: 0 = null, 1 = dynsym, 2 = dynstr.
    fn build_image(class: Class, names: &[&str]) -> Vec<u8> {
        let mut strtab = vec![0u8];
        let mut name_offsets = Vec::new();
        for name in names {
            name_offsets.push(strtab.len() as u32);
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);
        }

        let (ehsize, shentsize, symsize) = match class {
            Class::Elf32 => (0x34usize, 0x28usize, 16usize),
            Class::Elf64 => (0x40, 0x40, 24),
        };

        let symtab_off = ehsize;
        let strtab_off = symtab_off + names.len() * symsize;
        let shoff = strtab_off + strtab.len();
        let mut img = vec![0u8; shoff + 3 * shentsize];

        img[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        img[5] = 1;
        match class {
            Class::Elf32 => {
                img[4] = 1;
                img[0x20..0x24].copy_from_slice(&(shoff as u32).to_le_bytes());
                img[0x2e..0x30].copy_from_slice(&(shentsize as u16).to_le_bytes());
                img[0x30..0x32].copy_from_slice(&3u16.to_le_bytes());
            }
            Class::Elf64 => {
                img[4] = 2;
                img[0x28..0x30].copy_from_slice(&(shoff as u64).to_le_bytes());
                img[0x3a..0x3c].copy_from_slice(&(shentsize as u16).to_le_bytes());
                img[0x3c..0x3e].copy_from_slice(&3u16.to_le_bytes());
            }
        }

        for (i, name_offset) in name_offsets.iter().enumerate() {
            let base = symtab_off + i * symsize;
            img[base..base + 4].copy_from_slice(&name_offset.to_le_bytes());
        }

        img[strtab_off..strtab_off + strtab.len()].copy_from_slice(&strtab);

        let write_section =
            |img: &mut [u8], index: usize, type_: u32, offset: u64, size: u64, link: u32, entsize: u64| {
                let base = shoff + index * shentsize;
                match class {
                    Class::Elf32 => {
                        img[base + 0x04..base + 0x08].copy_from_slice(&type_.to_le_bytes());
                        img[base + 0x10..base + 0x14].copy_from_slice(&(offset as u32).to_le_bytes());
                        img[base + 0x14..base + 0x18].copy_from_slice(&(size as u32).to_le_bytes());
                        img[base + 0x18..base + 0x1c].copy_from_slice(&link.to_le_bytes());
                        img[base + 0x24..base + 0x28].copy_from_slice(&(entsize as u32).to_le_bytes());
                    }
                    Class::Elf64 => {
                        img[base + 0x04..base + 0x08].copy_from_slice(&type_.to_le_bytes());
                        img[base + 0x18..base + 0x20].copy_from_slice(&offset.to_le_bytes());
                        img[base + 0x20..base + 0x28].copy_from_slice(&size.to_le_bytes());
                        img[base + 0x28..base + 0x2c].copy_from_slice(&link.to_le_bytes());
                        img[base + 0x38..base + 0x40].copy_from_slice(&entsize.to_le_bytes());
                    }
                }
            };

        write_section(
            &mut img,
            1,
            SHT_DYNSYM,
            symtab_off as u64,
            (names.len() * symsize) as u64,
            2,
            symsize as u64,
        );
        write_section(&mut img, 2, 3, strtab_off as u64, strtab.len() as u64, 0, 0);

        img
    }

    fn write_temp(img: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(img).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn names_from_elf64() {
        let names = ["once_before", "test_first", "frobnicate", "test_second"];
        let file = write_temp(&build_image(Class::Elf64, &names));

        let symbols = Symbols::open(file.path()).unwrap();

        assert_eq!(symbols.count(), names.len());
        for (i, expected) in names.iter().enumerate() {
            assert_eq!(symbols.name_at(i).unwrap(), *expected);
        }
    }

    #[test]
    fn names_from_elf32() {
        let names = ["test_a", "helper", "test_b"];
        let file = write_temp(&build_image(Class::Elf32, &names));

        let symbols = Symbols::open(file.path()).unwrap();

        assert_eq!(symbols.count(), names.len());
        let collected: Vec<&str> = symbols.iter().map(|n| n.unwrap()).collect();
        assert_eq!(collected, names);
    }

    #[test]
    fn count_matches_section_arithmetic() {
        let names = ["a", "b", "c", "d", "e"];
        let file = write_temp(&build_image(Class::Elf64, &names));

        let symbols = Symbols::open(file.path()).unwrap();

        // size / entsize: 5 entries of 24 bytes each
        assert_eq!(symbols.count(), 5);
    }

    #[test]
    fn rejects_non_elf() {
        let file = write_temp(b"#!/bin/sh\necho not an object\n");

        let err = Symbols::open(file.path()).unwrap_err();
        assert!(matches!(err, SymbolsError::NotObjectFile(_)));
    }

    #[test]
    fn rejects_big_endian() {
        let mut img = build_image(Class::Elf64, &["test_x"]);
        img[5] = 2;
        let file = write_temp(&img);

        let err = Symbols::open(file.path()).unwrap_err();
        assert!(matches!(
            err,
            SymbolsError::UnsupportedClassOrEncoding { encoding: 2, .. }
        ));
    }

    #[test]
    fn rejects_unknown_class() {
        let mut img = build_image(Class::Elf64, &["test_x"]);
        img[4] = 9;
        let file = write_temp(&img);

        let err = Symbols::open(file.path()).unwrap_err();
        assert!(matches!(
            err,
            SymbolsError::UnsupportedClassOrEncoding { class: 9, .. }
        ));
    }

    #[test]
    fn missing_dynsym_is_reported() {
        let mut img = build_image(Class::Elf64, &["test_x"]);
        // Rewrite the dynsym section type so no section matches.
        let shoff = u64::from_le_bytes(img[0x28..0x30].try_into().unwrap()) as usize;
        let base = shoff + 0x40 + 0x04;
        img[base..base + 4].copy_from_slice(&1u32.to_le_bytes());
        let file = write_temp(&img);

        let err = Symbols::open(file.path()).unwrap_err();
        assert!(matches!(err, SymbolsError::DynsymNotFound));
    }

    #[test]
    fn truncated_section_table_is_reported() {
        let img = build_image(Class::Elf64, &["test_x"]);
        let file = write_temp(&img[..img.len() - 8]);

        let err = Symbols::open(file.path()).unwrap_err();
        assert!(matches!(err, SymbolsError::Truncated { .. }));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Symbols::open(Path::new("/nonexistent/libtests.so")).unwrap_err();
        assert!(matches!(err, SymbolsError::Io(_)));
    }

    #[test]
    fn own_executable_has_symbols() {
        let exe = std::env::current_exe().unwrap();
        let symbols = Symbols::open(&exe).unwrap();
        assert!(symbols.count() > 0);
    }
}

//! # zhc-elf — 64-bit little-endian ELF reader
//!
//! Just enough ELF to drive the build pipeline: section headers indexed by
//! name, the symbol table with its string table, and `.note` iteration with
//! the 4-byte alignment rounding the format requires. Other ELF classes and
//! endiannesses are rejected as unsupported rather than parsed wrong.
//!
//! The reader borrows the object bytes; no section data is copied.

use std::fmt;

/// Result type for ELF operations.
pub type Result<T> = std::result::Result<T, ElfError>;

/// Structural errors in an ELF blob.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ElfError {
    #[error("truncated ELF: need {need} bytes at offset {offset}, have {have}")]
    Truncated { offset: u64, need: u64, have: u64 },

    #[error("not an ELF object (bad magic)")]
    BadMagic,

    #[error("unsupported ELF class {0} (only ELFCLASS64 is supported)")]
    UnsupportedClass(u8),

    #[error("unsupported ELF endianness {0} (only little-endian is supported)")]
    UnsupportedEndianness(u8),

    #[error("unsupported ELF version {0}")]
    UnsupportedVersion(u8),

    #[error("string table offset {0} out of bounds")]
    BadStringOffset(u64),

    #[error("string at offset {0} is not valid UTF-8")]
    BadStringEncoding(u64),

    #[error("section {index} has malformed entry size {entsize}")]
    BadEntrySize { index: usize, entsize: u64 },

    #[error("symbol table has no associated string table")]
    MissingSymbolStrings,

    #[error("malformed note entry at offset {0}")]
    MalformedNote(u64),
}

// ================================================================================================
// Constants
// ================================================================================================

pub const EM_AMDGPU: u16 = 224;

pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_NOTE: u32 = 7;

const EHDR_SIZE: usize = 64;
const SHDR_SIZE: usize = 64;
const SYM_SIZE: usize = 24;

// ================================================================================================
// Field cursor
// ================================================================================================

/// Bounds-checked little-endian field reads over the object bytes.
struct Fields<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Fields<'a> {
    fn at(data: &'a [u8], pos: usize) -> Self {
        Fields { data, pos }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.data.len().saturating_sub(self.pos) {
            return Err(ElfError::Truncated {
                offset: self.pos as u64,
                need: n as u64,
                have: self.data.len().saturating_sub(self.pos) as u64,
            });
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }
}

// ================================================================================================
// Headers
// ================================================================================================

/// One section header, fields as in `Elf64_Shdr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    pub name_offset: u32,
    pub sh_type: u32,
    pub flags: u64,
    pub addr: u64,
    pub offset: u64,
    pub size: u64,
    pub link: u32,
    pub info: u32,
    pub addralign: u64,
    pub entsize: u64,
}

/// One symbol-table entry with its name resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol<'a> {
    pub name: &'a str,
    pub info: u8,
    pub other: u8,
    pub shndx: u16,
    pub value: u64,
    pub size: u64,
}

/// One `.note` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Note<'a> {
    /// Owner name with the terminating NUL stripped.
    pub name: &'a [u8],
    pub note_type: u64,
    pub desc: &'a [u8],
}

impl fmt::Display for Note<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "note {} type {} ({} descriptor bytes)",
            String::from_utf8_lossy(self.name),
            self.note_type,
            self.desc.len()
        )
    }
}

// ================================================================================================
// Elf
// ================================================================================================

/// A parsed 64-bit little-endian ELF object.
#[derive(Debug)]
pub struct Elf<'a> {
    data: &'a [u8],
    machine: u16,
    sections: Vec<SectionHeader>,
    shstrtab: &'a [u8],
}

impl<'a> Elf<'a> {
    /// Parse the identification and header tables of `data`.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < EHDR_SIZE {
            return Err(ElfError::Truncated {
                offset: 0,
                need: EHDR_SIZE as u64,
                have: data.len() as u64,
            });
        }
        if &data[0..4] != b"\x7fELF" {
            return Err(ElfError::BadMagic);
        }
        match data[4] {
            2 => {}
            other => return Err(ElfError::UnsupportedClass(other)),
        }
        match data[5] {
            1 => {}
            other => return Err(ElfError::UnsupportedEndianness(other)),
        }
        if data[6] != 1 {
            return Err(ElfError::UnsupportedVersion(data[6]));
        }

        let mut f = Fields::at(data, 18);
        let machine = f.u16()?;
        let _version = f.u32()?;
        let _entry = f.u64()?;
        let _phoff = f.u64()?;
        let shoff = f.u64()?;
        let mut f = Fields::at(data, 58);
        let shentsize = f.u16()?;
        let shnum = f.u16()?;
        let shstrndx = f.u16()?;

        let mut sections = Vec::with_capacity(shnum as usize);
        if shnum > 0 {
            if shentsize as usize != SHDR_SIZE {
                return Err(ElfError::BadEntrySize {
                    index: 0,
                    entsize: shentsize as u64,
                });
            }
            for i in 0..shnum as usize {
                let off = (shoff as usize).checked_add(i * SHDR_SIZE).ok_or(ElfError::Truncated {
                    offset: shoff,
                    need: (shnum as u64) * SHDR_SIZE as u64,
                    have: data.len() as u64,
                })?;
                let mut f = Fields::at(data, off);
                sections.push(SectionHeader {
                    name_offset: f.u32()?,
                    sh_type: f.u32()?,
                    flags: f.u64()?,
                    addr: f.u64()?,
                    offset: f.u64()?,
                    size: f.u64()?,
                    link: f.u32()?,
                    info: f.u32()?,
                    addralign: f.u64()?,
                    entsize: f.u64()?,
                });
            }
        }

        let shstrtab = if (shstrndx as usize) < sections.len() {
            let header = sections[shstrndx as usize];
            slice_of(data, header.offset, header.size)?
        } else {
            &[]
        };

        Ok(Elf {
            data,
            machine,
            sections,
            shstrtab,
        })
    }

    /// `e_machine` of the object.
    pub fn machine(&self) -> u16 {
        self.machine
    }

    pub fn sections(&self) -> &[SectionHeader] {
        &self.sections
    }

    /// Resolve a section's name through the section-header string table.
    pub fn section_name(&self, header: &SectionHeader) -> Result<&'a str> {
        cstr_at(self.shstrtab, header.name_offset as u64)
    }

    /// Find a section header by name.
    pub fn section_by_name(&self, name: &str) -> Option<&SectionHeader> {
        self.sections
            .iter()
            .find(|s| self.section_name(s).is_ok_and(|n| n == name))
    }

    /// The bytes a section header points at.
    pub fn section_data(&self, header: &SectionHeader) -> Result<&'a [u8]> {
        slice_of(self.data, header.offset, header.size)
    }

    /// Iterate every entry of the symbol table (including the null entry at
    /// index zero, whose name is empty). Objects without a symbol table
    /// yield an empty iterator.
    pub fn symbols(&self) -> Result<SymbolIter<'a>> {
        let Some(symtab) = self.sections.iter().find(|s| s.sh_type == SHT_SYMTAB) else {
            return Ok(SymbolIter {
                entries: &[],
                strtab: &[],
                index: 0,
            });
        };
        if symtab.entsize != SYM_SIZE as u64 {
            let index = self.sections.iter().position(|s| s.sh_type == SHT_SYMTAB).unwrap_or(0);
            return Err(ElfError::BadEntrySize {
                index,
                entsize: symtab.entsize,
            });
        }
        let strtab_header = self
            .sections
            .get(symtab.link as usize)
            .filter(|s| s.sh_type == SHT_STRTAB)
            .ok_or(ElfError::MissingSymbolStrings)?;
        Ok(SymbolIter {
            entries: self.section_data(symtab)?,
            strtab: self.section_data(strtab_header)?,
            index: 0,
        })
    }

    /// Iterate the entries of every `SHT_NOTE` section, in section order.
    pub fn notes(&self) -> Result<NoteIter<'a>> {
        let mut ranges = Vec::new();
        for section in self.sections.iter().filter(|s| s.sh_type == SHT_NOTE) {
            ranges.push(self.section_data(section)?);
        }
        Ok(NoteIter {
            ranges,
            range_index: 0,
            pos: 0,
        })
    }
}

fn slice_of(data: &[u8], offset: u64, size: u64) -> Result<&[u8]> {
    let end = offset.checked_add(size).ok_or(ElfError::Truncated {
        offset,
        need: size,
        have: data.len() as u64,
    })?;
    if end > data.len() as u64 {
        return Err(ElfError::Truncated {
            offset,
            need: size,
            have: data.len() as u64,
        });
    }
    Ok(&data[offset as usize..end as usize])
}

fn cstr_at(strtab: &[u8], offset: u64) -> Result<&str> {
    let start = offset as usize;
    if start > strtab.len() {
        return Err(ElfError::BadStringOffset(offset));
    }
    let rest = &strtab[start..];
    let len = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or(ElfError::BadStringOffset(offset))?;
    std::str::from_utf8(&rest[..len]).map_err(|_| ElfError::BadStringEncoding(offset))
}

// ================================================================================================
// Iterators
// ================================================================================================

/// Iterator over symbol-table entries.
pub struct SymbolIter<'a> {
    entries: &'a [u8],
    strtab: &'a [u8],
    index: usize,
}

impl<'a> Iterator for SymbolIter<'a> {
    type Item = Result<Symbol<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let off = self.index * SYM_SIZE;
        if off + SYM_SIZE > self.entries.len() {
            return None;
        }
        self.index += 1;
        let mut f = Fields::at(self.entries, off);
        let mut parse = || -> Result<Symbol<'a>> {
            let name_offset = f.u32()?;
            let info = f.u8()?;
            let other = f.u8()?;
            let shndx = f.u16()?;
            let value = f.u64()?;
            let size = f.u64()?;
            Ok(Symbol {
                name: cstr_at(self.strtab, name_offset as u64)?,
                info,
                other,
                shndx,
                value,
                size,
            })
        };
        Some(parse())
    }
}

/// Iterator over note entries across all note sections.
pub struct NoteIter<'a> {
    ranges: Vec<&'a [u8]>,
    range_index: usize,
    pos: usize,
}

impl<'a> Iterator for NoteIter<'a> {
    type Item = Result<Note<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let range = *self.ranges.get(self.range_index)?;
            if self.pos >= range.len() {
                self.range_index += 1;
                self.pos = 0;
                continue;
            }
            let result = self.parse_one(range);
            if result.is_err() {
                // A malformed entry poisons the rest of the stream.
                self.range_index = self.ranges.len();
            }
            return Some(result);
        }
    }
}

impl<'a> NoteIter<'a> {
    fn parse_one(&mut self, range: &'a [u8]) -> Result<Note<'a>> {
        let base = self.pos;
        let mut f = Fields::at(range, base);
        let namesz = f.u32().map_err(|_| ElfError::MalformedNote(base as u64))? as usize;
        let descsz = f.u32().map_err(|_| ElfError::MalformedNote(base as u64))? as usize;
        let note_type = f.u32().map_err(|_| ElfError::MalformedNote(base as u64))? as u64;

        let name_start = base + 12;
        let name_end = name_start.checked_add(namesz).ok_or(ElfError::MalformedNote(base as u64))?;
        let desc_start = align4(name_end);
        let desc_end = desc_start.checked_add(descsz).ok_or(ElfError::MalformedNote(base as u64))?;
        if desc_end > range.len() {
            return Err(ElfError::MalformedNote(base as u64));
        }

        // Owner names are NUL-terminated on the wire.
        let name = &range[name_start..name_end];
        let name = name.strip_suffix(&[0]).unwrap_or(name);
        let desc = &range[desc_start..desc_end];
        self.pos = align4(desc_end);
        Ok(Note { name, note_type, desc })
    }
}

fn align4(v: usize) -> usize {
    (v + 3) & !3
}

// ================================================================================================
// Tests
// ================================================================================================

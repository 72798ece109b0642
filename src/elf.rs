//! Read-only view of an ELF64 object.
//!
//! Exposes sections by name and index, the symbol table, and typed
//! relocation iterators. Only the little-endian 64-bit layout emitted by
//! eBPF toolchains is accepted.

use crate::error::Error;

/// ELF magic number.
const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// ELF64 section header size.
const SECTION_HEADER_SIZE: usize = 64;
/// ELF64 symbol entry size.
const SYMBOL_ENTRY_SIZE: usize = 24;
/// REL entry size (r_offset, r_info).
const REL_ENTRY_SIZE: usize = 16;
/// RELA entry size (r_offset, r_info, r_addend).
const RELA_ENTRY_SIZE: usize = 24;

/// SHT_PROGBITS
pub const SHT_PROGBITS: u32 = 1;
/// SHT_SYMTAB
const SHT_SYMTAB: u32 = 2;
/// SHT_NOBITS
const SHT_NOBITS: u32 = 8;
/// SHT_RELA
const SHT_RELA: u32 = 4;

/// SHF_ALLOC | SHF_EXECINSTR, the flag pair marking program sections.
pub const SHF_ALLOC_EXEC: u64 = 6;

/// One section of the object, with its data copied out of the image.
#[derive(Debug, Clone)]
pub struct ElfSection {
    /// Section name from the section-header string table.
    pub name: String,
    /// Index in the section header table.
    pub index: usize,
    /// sh_type value.
    pub sh_type: u32,
    /// sh_flags value.
    pub flags: u64,
    /// sh_link value (string table for symtabs, target for rel sections).
    pub link: usize,
    /// Section contents (empty for SHT_NOBITS).
    pub data: Vec<u8>,
}

/// One symbol table entry.
#[derive(Debug, Clone)]
pub struct ElfSymbol {
    /// Symbol name, possibly empty.
    pub name: String,
    /// st_value: offset of the symbol within its section.
    pub value: u64,
    /// st_size in bytes.
    pub size: u64,
    /// Binding (upper nibble of st_info).
    pub bind: u8,
    /// Symbol type (lower nibble of st_info).
    pub sym_type: u8,
    /// Index of the section the symbol lives in.
    pub section_index: u16,
    /// st_other.
    pub other: u8,
}

/// One relocation entry.
#[derive(Debug, Clone, Copy)]
pub struct ElfRelocation {
    /// Byte offset in the target section.
    pub offset: u64,
    /// Index into the symbol table.
    pub symbol: u32,
    /// Relocation type.
    pub rel_type: u32,
    /// Addend (zero for REL sections).
    pub addend: i64,
}

/// Parsed, read-only view of an ELF object.
#[derive(Debug)]
pub struct ElfView {
    sections: Vec<ElfSection>,
    symbols: Vec<ElfSymbol>,
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16, Error> {
    let bytes = data
        .get(offset..offset + 2)
        .ok_or_else(|| Error::ElfStructural(format!("short read at offset {}", offset)))?;
    Ok(u16::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32, Error> {
    let bytes = data
        .get(offset..offset + 4)
        .ok_or_else(|| Error::ElfStructural(format!("short read at offset {}", offset)))?;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_u64(data: &[u8], offset: usize) -> Result<u64, Error> {
    let bytes = data
        .get(offset..offset + 8)
        .ok_or_else(|| Error::ElfStructural(format!("short read at offset {}", offset)))?;
    Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
}

/// Read a NUL-terminated string out of a string table.
fn read_string(strtab: &[u8], offset: usize) -> String {
    let mut end = offset;
    while end < strtab.len() && strtab[end] != 0 {
        end += 1;
    }
    String::from_utf8_lossy(strtab.get(offset..end).unwrap_or(&[])).into_owned()
}

impl ElfView {
    /// Parse an ELF image held in memory.
    pub fn load(data: &[u8]) -> Result<Self, Error> {
        if data.len() < 64 || data[0..4] != ELF_MAGIC {
            return Err(Error::ElfStructural("not an ELF image".into()));
        }
        // EI_CLASS must be ELFCLASS64, EI_DATA must be ELFDATA2LSB.
        if data[4] != 2 || data[5] != 1 {
            return Err(Error::ElfStructural(
                "only little-endian ELF64 objects are supported".into(),
            ));
        }

        let e_shoff = read_u64(data, 40)? as usize;
        let e_shentsize = read_u16(data, 58)? as usize;
        let e_shnum = read_u16(data, 60)? as usize;
        let e_shstrndx = read_u16(data, 62)? as usize;

        if e_shoff == 0 || e_shnum == 0 {
            return Err(Error::ElfStructural("no section header table".into()));
        }
        if e_shentsize < SECTION_HEADER_SIZE {
            return Err(Error::ElfStructural(format!(
                "bad section header entry size {}",
                e_shentsize
            )));
        }

        // Section name string table comes first; section names need it.
        if e_shstrndx >= e_shnum {
            return Err(Error::ElfStructural("bad section string table index".into()));
        }
        let shstrtab_hdr = e_shoff + e_shstrndx * e_shentsize;
        let shstrtab_off = read_u64(data, shstrtab_hdr + 24)? as usize;
        let shstrtab_size = read_u64(data, shstrtab_hdr + 32)? as usize;
        let shstrtab = data
            .get(shstrtab_off..shstrtab_off + shstrtab_size)
            .ok_or_else(|| Error::ElfStructural("section string table out of bounds".into()))?;

        let mut sections = Vec::with_capacity(e_shnum);
        for i in 0..e_shnum {
            let hdr = e_shoff + i * e_shentsize;
            let sh_name = read_u32(data, hdr)? as usize;
            let sh_type = read_u32(data, hdr + 4)?;
            let flags = read_u64(data, hdr + 8)?;
            let sh_offset = read_u64(data, hdr + 24)? as usize;
            let sh_size = read_u64(data, hdr + 32)? as usize;
            let link = read_u32(data, hdr + 40)? as usize;

            let name = read_string(shstrtab, sh_name);
            let contents = if sh_type == SHT_NOBITS || sh_size == 0 {
                Vec::new()
            } else {
                data.get(sh_offset..sh_offset + sh_size)
                    .ok_or_else(|| {
                        Error::ElfStructural(format!("section '{}' data out of bounds", name))
                    })?
                    .to_vec()
            };

            log::debug!(
                "Section [{}] '{}': type={}, flags={:#x}, size={}",
                i,
                name,
                sh_type,
                flags,
                contents.len()
            );

            sections.push(ElfSection {
                name,
                index: i,
                sh_type,
                flags,
                link,
                data: contents,
            });
        }

        let symbols = Self::parse_symbols(&sections)?;
        Ok(Self { sections, symbols })
    }

    /// Parse the first SHT_SYMTAB section, resolving names through its
    /// linked string table. Objects without a symbol table yield an empty
    /// list.
    fn parse_symbols(sections: &[ElfSection]) -> Result<Vec<ElfSymbol>, Error> {
        let Some(symtab) = sections.iter().find(|s| s.sh_type == SHT_SYMTAB) else {
            return Ok(Vec::new());
        };
        let strtab = sections
            .get(symtab.link)
            .map(|s| s.data.as_slice())
            .unwrap_or(&[]);

        let mut symbols = Vec::new();
        for entry in symtab.data.chunks_exact(SYMBOL_ENTRY_SIZE) {
            let st_name = u32::from_le_bytes(entry[0..4].try_into().unwrap()) as usize;
            let st_info = entry[4];
            let other = entry[5];
            let section_index = u16::from_le_bytes(entry[6..8].try_into().unwrap());
            let value = u64::from_le_bytes(entry[8..16].try_into().unwrap());
            let size = u64::from_le_bytes(entry[16..24].try_into().unwrap());

            symbols.push(ElfSymbol {
                name: read_string(strtab, st_name),
                value,
                size,
                bind: st_info >> 4,
                sym_type: st_info & 0x0f,
                section_index,
                other,
            });
        }
        log::debug!("Parsed {} symbols", symbols.len());
        Ok(symbols)
    }

    /// Look up a section by name.
    pub fn section_by_name(&self, name: &str) -> Option<&ElfSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Look up a section by header-table index.
    pub fn section_by_index(&self, index: usize) -> Option<&ElfSection> {
        self.sections.get(index)
    }

    /// All sections in header-table order.
    pub fn sections(&self) -> &[ElfSection] {
        &self.sections
    }

    /// All symbols in symbol-table order.
    pub fn symbols(&self) -> &[ElfSymbol] {
        &self.symbols
    }

    /// Look up a symbol by symbol-table index.
    pub fn symbol(&self, index: usize) -> Option<&ElfSymbol> {
        self.symbols.get(index)
    }

    /// Names of the user program sections: non-empty name not starting with
    /// `.`, type PROGBITS, flags ALLOC|EXEC.
    pub fn program_sections(&self) -> Vec<String> {
        self.sections
            .iter()
            .filter(|s| {
                !s.name.is_empty()
                    && !s.name.starts_with('.')
                    && s.sh_type == SHT_PROGBITS
                    && s.flags == SHF_ALLOC_EXEC
            })
            .map(|s| s.name.clone())
            .collect()
    }

    /// The relocation section for `section_name`, trying `.rel<name>` then
    /// `.rela<name>`.
    pub fn relocation_section(&self, section_name: &str) -> Option<&ElfSection> {
        self.section_by_name(&format!(".rel{}", section_name))
            .or_else(|| self.section_by_name(&format!(".rela{}", section_name)))
    }

    /// Iterate the typed relocation entries of a `.rel*` / `.rela*` section.
    pub fn relocations<'a>(
        &self,
        section: &'a ElfSection,
    ) -> impl Iterator<Item = ElfRelocation> + 'a {
        let entry_size = if section.sh_type == SHT_RELA {
            RELA_ENTRY_SIZE
        } else {
            REL_ENTRY_SIZE
        };
        section.data.chunks_exact(entry_size).map(move |entry| {
            let offset = u64::from_le_bytes(entry[0..8].try_into().unwrap());
            let info = u64::from_le_bytes(entry[8..16].try_into().unwrap());
            let addend = if entry_size == RELA_ENTRY_SIZE {
                i64::from_le_bytes(entry[16..24].try_into().unwrap())
            } else {
                0
            };
            ElfRelocation {
                offset,
                symbol: (info >> 32) as u32,
                rel_type: info as u32,
                addend,
            }
        })
    }
}

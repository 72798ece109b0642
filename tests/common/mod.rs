//! Shared fixtures: raw instruction encoding and a minimal ELF64 image
//! builder for end-to-end translation tests.

#![allow(dead_code)]

/// Encode one eBPF instruction in its 8-byte wire format.
pub fn inst(opcode: u8, dst: u8, src: u8, offset: i16, imm: i32) -> [u8; 8] {
    let mut bytes = [0u8; 8];
    bytes[0] = opcode;
    bytes[1] = (src << 4) | (dst & 0x0f);
    bytes[2..4].copy_from_slice(&offset.to_le_bytes());
    bytes[4..8].copy_from_slice(&imm.to_le_bytes());
    bytes
}

/// Concatenate encoded instructions into section contents.
pub fn program(instructions: &[[u8; 8]]) -> Vec<u8> {
    instructions.iter().flatten().copied().collect()
}

/// One REL-format relocation entry (r_offset, r_info).
pub fn rel_entry(offset: u64, symbol_index: usize) -> Vec<u8> {
    let mut entry = Vec::with_capacity(16);
    entry.extend_from_slice(&offset.to_le_bytes());
    entry.extend_from_slice(&(((symbol_index as u64) << 32) | 1).to_le_bytes());
    entry
}

/// Encode one in-file map definition record (eight u32 fields).
pub fn map_record(map_type: u32, key_size: u32, value_size: u32, max_entries: u32) -> Vec<u8> {
    let fields = [map_type, key_size, value_size, max_entries, 0, 0, 0, 0];
    fields.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Builds a minimal little-endian ELF64 relocatable image: a null section,
/// the caller's sections, then `.symtab`, `.strtab`, and `.shstrtab`.
#[derive(Default)]
pub struct ElfBuilder {
    sections: Vec<(String, u32, u64, Vec<u8>)>,
    symbols: Vec<(String, usize, u64, u64)>,
}

impl ElfBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a section; returns its final header-table index.
    pub fn add_section(&mut self, name: &str, sh_type: u32, flags: u64, data: Vec<u8>) -> usize {
        self.sections.push((name.to_string(), sh_type, flags, data));
        self.sections.len()
    }

    /// Add a symbol; returns its symbol-table index (index 0 is the null
    /// symbol).
    pub fn add_symbol(&mut self, name: &str, section_index: usize, value: u64, size: u64) -> usize {
        self.symbols.push((name.to_string(), section_index, value, size));
        self.symbols.len()
    }

    pub fn build(&self) -> Vec<u8> {
        let symtab_index = self.sections.len() + 1;
        let strtab_index = symtab_index + 1;
        let shstrtab_index = strtab_index + 1;

        // Symbol string table.
        let mut strtab = vec![0u8];
        let mut symbol_name_offsets = Vec::new();
        for (name, _, _, _) in &self.symbols {
            symbol_name_offsets.push(strtab.len() as u32);
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);
        }

        // Symbol table, with the customary null entry first.
        let mut symtab = vec![0u8; 24];
        for (i, (_, section_index, value, size)) in self.symbols.iter().enumerate() {
            let mut entry = [0u8; 24];
            entry[0..4].copy_from_slice(&symbol_name_offsets[i].to_le_bytes());
            entry[4] = 0x10; // GLOBAL, NOTYPE
            entry[6..8].copy_from_slice(&(*section_index as u16).to_le_bytes());
            entry[8..16].copy_from_slice(&value.to_le_bytes());
            entry[16..24].copy_from_slice(&size.to_le_bytes());
            symtab.extend_from_slice(&entry);
        }

        // Full section list: (name, sh_type, flags, link, entsize, data).
        let mut all: Vec<(String, u32, u64, u32, u64, Vec<u8>)> = Vec::new();
        all.push((String::new(), 0, 0, 0, 0, Vec::new()));
        for (name, sh_type, flags, data) in &self.sections {
            let entsize = if *sh_type == 9 { 16 } else { 0 };
            all.push((name.clone(), *sh_type, *flags, 0, entsize, data.clone()));
        }
        all.push((".symtab".into(), 2, 0, strtab_index as u32, 24, symtab));
        all.push((".strtab".into(), 3, 0, 0, 0, strtab));

        // Section-name string table names every section, itself included.
        let mut shstrtab = vec![0u8];
        let mut section_name_offsets = Vec::new();
        for (name, ..) in &all {
            section_name_offsets.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(name.as_bytes());
            shstrtab.push(0);
        }
        section_name_offsets.push(shstrtab.len() as u32);
        shstrtab.extend_from_slice(b".shstrtab");
        shstrtab.push(0);
        all.push((".shstrtab".into(), 3, 0, 0, 0, shstrtab));

        // Layout: header, section contents, then the header table.
        let mut image = vec![0u8; 64];
        image[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        image[4] = 2; // ELFCLASS64
        image[5] = 1; // ELFDATA2LSB
        image[6] = 1; // EV_CURRENT
        image[16..18].copy_from_slice(&1u16.to_le_bytes()); // ET_REL
        image[18..20].copy_from_slice(&247u16.to_le_bytes()); // EM_BPF
        image[20..24].copy_from_slice(&1u32.to_le_bytes());

        let mut offsets = Vec::new();
        for (_, _, _, _, _, data) in &all {
            offsets.push(image.len() as u64);
            image.extend_from_slice(data);
        }

        let shoff = image.len() as u64;
        for (i, (_, sh_type, flags, link, entsize, data)) in all.iter().enumerate() {
            let mut header = [0u8; 64];
            header[0..4].copy_from_slice(&section_name_offsets[i].to_le_bytes());
            header[4..8].copy_from_slice(&sh_type.to_le_bytes());
            header[8..16].copy_from_slice(&flags.to_le_bytes());
            header[24..32].copy_from_slice(&offsets[i].to_le_bytes());
            header[32..40].copy_from_slice(&(data.len() as u64).to_le_bytes());
            header[40..44].copy_from_slice(&link.to_le_bytes());
            header[48..56].copy_from_slice(&1u64.to_le_bytes());
            header[56..64].copy_from_slice(&entsize.to_le_bytes());
            image.extend_from_slice(&header);
        }

        image[40..48].copy_from_slice(&shoff.to_le_bytes());
        image[52..54].copy_from_slice(&64u16.to_le_bytes());
        image[58..60].copy_from_slice(&64u16.to_le_bytes());
        image[60..62].copy_from_slice(&(all.len() as u16).to_le_bytes());
        image[62..64].copy_from_slice(&(shstrtab_index as u16).to_le_bytes());
        image
    }
}

/// Build a `.BTF` blob whose string table holds `strings`; returns the blob
/// and each string's table offset.
pub fn btf_blob(strings: &[&str]) -> (Vec<u8>, Vec<u32>) {
    let mut table = vec![0u8];
    let mut offsets = Vec::new();
    for s in strings {
        offsets.push(table.len() as u32);
        table.extend_from_slice(s.as_bytes());
        table.push(0);
    }

    let mut blob = Vec::new();
    blob.extend_from_slice(&0xeb9fu16.to_le_bytes());
    blob.push(1); // version
    blob.push(0); // flags
    blob.extend_from_slice(&24u32.to_le_bytes()); // hdr_len
    blob.extend_from_slice(&0u32.to_le_bytes()); // type_off
    blob.extend_from_slice(&0u32.to_le_bytes()); // type_len
    blob.extend_from_slice(&0u32.to_le_bytes()); // str_off
    blob.extend_from_slice(&(table.len() as u32).to_le_bytes()); // str_len
    blob.extend_from_slice(&table);
    (blob, offsets)
}

/// One BTF line record: (insn byte offset, file_name_off, line_off, line, column).
pub type BtfLineRecord = (u32, u32, u32, u32, u32);

/// Build a `.BTF.ext` blob carrying line records for one section.
pub fn btf_ext_blob(sec_name_off: u32, records: &[BtfLineRecord]) -> Vec<u8> {
    let mut line_info = Vec::new();
    line_info.extend_from_slice(&16u32.to_le_bytes()); // record size
    line_info.extend_from_slice(&sec_name_off.to_le_bytes());
    line_info.extend_from_slice(&(records.len() as u32).to_le_bytes());
    for (insn_off, file_name_off, line_off, line, column) in records {
        line_info.extend_from_slice(&insn_off.to_le_bytes());
        line_info.extend_from_slice(&file_name_off.to_le_bytes());
        line_info.extend_from_slice(&line_off.to_le_bytes());
        line_info.extend_from_slice(&((line << 10) | (column & 0x3ff)).to_le_bytes());
    }

    let mut blob = Vec::new();
    blob.extend_from_slice(&0xeb9fu16.to_le_bytes());
    blob.push(1);
    blob.push(0);
    blob.extend_from_slice(&24u32.to_le_bytes()); // hdr_len
    blob.extend_from_slice(&0u32.to_le_bytes()); // func_info_off
    blob.extend_from_slice(&0u32.to_le_bytes()); // func_info_len
    blob.extend_from_slice(&0u32.to_le_bytes()); // line_info_off
    blob.extend_from_slice(&(line_info.len() as u32).to_le_bytes()); // line_info_len
    blob.extend_from_slice(&line_info);
    blob
}

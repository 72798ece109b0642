//! BTF line-information decoding.
//!
//! `.BTF` carries a string table; `.BTF.ext` carries per-section line
//! records pointing into it. Types and function info are ignored here: the
//! two sections are consumed solely as a carrier of source-line debugging
//! information, surfaced through a sink callback per record.

use crate::error::Error;

/// Magic number shared by `.BTF` and `.BTF.ext` headers.
const BTF_MAGIC: u16 = 0xeb9f;

/// Fixed part of each line record: insn_off, file_name_off, line_off,
/// line_col.
const LINE_RECORD_MIN_SIZE: usize = 16;

fn read_u16(data: &[u8], offset: usize) -> Result<u16, Error> {
    let bytes = data
        .get(offset..offset + 2)
        .ok_or_else(|| Error::ElfStructural(format!("truncated BTF data at offset {}", offset)))?;
    Ok(u16::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32, Error> {
    let bytes = data
        .get(offset..offset + 4)
        .ok_or_else(|| Error::ElfStructural(format!("truncated BTF data at offset {}", offset)))?;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

/// Read a NUL-terminated string from the `.BTF` string table.
fn read_string(strings: &[u8], offset: u32) -> String {
    let offset = offset as usize;
    let mut end = offset;
    while end < strings.len() && strings[end] != 0 {
        end += 1;
    }
    String::from_utf8_lossy(strings.get(offset..end).unwrap_or(&[])).into_owned()
}

/// Decode the `.BTF` string table.
fn string_table(btf: &[u8]) -> Result<&[u8], Error> {
    if read_u16(btf, 0)? != BTF_MAGIC {
        return Err(Error::ElfStructural("bad .BTF magic".into()));
    }
    let hdr_len = read_u32(btf, 4)? as usize;
    let str_off = read_u32(btf, 16)? as usize;
    let str_len = read_u32(btf, 20)? as usize;
    btf.get(hdr_len + str_off..hdr_len + str_off + str_len)
        .ok_or_else(|| Error::ElfStructural(".BTF string table out of bounds".into()))
}

/// Decode line information from `.BTF` + `.BTF.ext`, invoking `sink` once
/// per record with `(section, instruction_byte_offset, file_name,
/// source_text, line, column)`.
pub fn parse_line_information<F>(btf: &[u8], btf_ext: &[u8], mut sink: F) -> Result<(), Error>
where
    F: FnMut(&str, u32, &str, &str, u32, u32),
{
    let strings = string_table(btf)?;

    if read_u16(btf_ext, 0)? != BTF_MAGIC {
        return Err(Error::ElfStructural("bad .BTF.ext magic".into()));
    }
    let hdr_len = read_u32(btf_ext, 4)? as usize;
    let line_info_off = read_u32(btf_ext, 16)? as usize;
    let line_info_len = read_u32(btf_ext, 20)? as usize;
    if line_info_len == 0 {
        return Ok(());
    }
    let block = btf_ext
        .get(hdr_len + line_info_off..hdr_len + line_info_off + line_info_len)
        .ok_or_else(|| Error::ElfStructural(".BTF.ext line info out of bounds".into()))?;

    let record_size = read_u32(block, 0)? as usize;
    if record_size < LINE_RECORD_MIN_SIZE {
        return Err(Error::ElfStructural(format!(
            "bad BTF line record size {}",
            record_size
        )));
    }

    let mut cursor = 4;
    while cursor < block.len() {
        let sec_name_off = read_u32(block, cursor)?;
        let num_info = read_u32(block, cursor + 4)? as usize;
        cursor += 8;

        let section_name = read_string(strings, sec_name_off);
        for _ in 0..num_info {
            let insn_off = read_u32(block, cursor)?;
            let file_name_off = read_u32(block, cursor + 4)?;
            let line_off = read_u32(block, cursor + 8)?;
            let line_col = read_u32(block, cursor + 12)?;
            cursor += record_size;

            let file_name = read_string(strings, file_name_off);
            let source = read_string(strings, line_off);
            sink(
                &section_name,
                insn_off,
                &file_name,
                &source,
                line_col >> 10,
                line_col & 0x3ff,
            );
        }
    }
    Ok(())
}

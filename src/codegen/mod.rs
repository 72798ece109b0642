//! Translation session state and front-end passes.
//!
//! A [`CodeGenerator`] owns everything one translation needs: the ELF view,
//! the map table, the per-section output buffers, and the BTF line-info
//! table. The passes mirror the pipeline: load a program section, attach
//! its relocations, assign branch labels, build the helper table, lower
//! each instruction to C lines, and finally emit the whole module.

mod emit;
mod lower;

use std::collections::{BTreeMap, BTreeSet};

use crate::btf;
use crate::elf::ElfView;
use crate::error::Error;
use crate::insn::{CLS_JMP, EbpfInst, INSN_SIZE, OP_CALL, OP_EXIT, decode_instructions};
use crate::maps::{self, MapTable};

/// Register names indexed by register id. `r10` is the frame pointer.
pub(crate) const REGISTER_NAMES: [&str; 11] = [
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10",
];

/// 16-byte GUID identifying a program or attach type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

/// Source-line record attached to one instruction ordinal.
#[derive(Debug, Clone, Default)]
pub struct LineInfo {
    /// Source file path as recorded by the compiler.
    pub file_name: String,
    /// Text of the source line.
    pub source: String,
    /// 1-based line number.
    pub line: u32,
    /// Column number.
    pub column: u32,
}

/// Options controlling the C emitter.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmitOptions {
    /// Emit `static GUID` declarations for program and attach types and
    /// reference them from the program registry.
    pub emit_type_guids: bool,
    /// Emit a trace comment before each lowered instruction.
    pub opcode_comments: bool,
}

/// One instruction slot of a section's output buffer.
#[derive(Debug, Clone)]
pub(crate) struct OutputInstruction {
    pub inst: EbpfInst,
    /// Zero-based ordinal of the instruction within its section.
    pub offset: u32,
    /// Symbol name attached by a relocation, if any.
    pub relocation: Option<String>,
    /// True when some branch lands on this slot.
    pub jump_target: bool,
    /// Assigned label, when `jump_target` is set.
    pub label: Option<String>,
    /// Lowered C statement lines.
    pub lines: Vec<String>,
}

impl OutputInstruction {
    fn new(inst: EbpfInst, offset: u32) -> Self {
        Self {
            inst,
            offset,
            relocation: None,
            jump_target: false,
            label: None,
            lines: Vec::new(),
        }
    }
}

/// One entry of a program's helper table.
#[derive(Debug, Clone)]
pub(crate) struct HelperFunction {
    /// Helper identifier: relocation name or `helper_id_<imm>`.
    pub name: String,
    /// The `imm` field of the CALL that introduced the helper.
    pub id: i32,
}

/// Per-program-section translation state.
#[derive(Debug, Default)]
pub(crate) struct Section {
    pub program_name: String,
    pub program_type: Guid,
    pub expected_attach_type: Guid,
    pub output: Vec<OutputInstruction>,
    pub referenced_registers: BTreeSet<&'static str>,
    /// Map indices used by relocated LDDW instructions, in index order.
    pub referenced_map_indices: BTreeSet<usize>,
    /// Helpers in first-occurrence order; the position is the table index.
    pub helpers: Vec<HelperFunction>,
}

impl Section {
    /// A fresh section. The prologue assigns `r1` and `r10` and `EXIT`
    /// reads `r0`, so those three start out referenced.
    fn new() -> Self {
        let mut section = Self::default();
        section.referenced_registers.insert(REGISTER_NAMES[0]);
        section.referenced_registers.insert(REGISTER_NAMES[1]);
        section.referenced_registers.insert(REGISTER_NAMES[10]);
        section
    }

    /// Resolve a register id to its name, recording the reference.
    pub(crate) fn reg(&mut self, id: u8) -> Result<&'static str, Error> {
        let name = REGISTER_NAMES
            .get(id as usize)
            .copied()
            .ok_or(Error::InvalidRegister(id))?;
        self.referenced_registers.insert(name);
        Ok(name)
    }

    /// Table index of a helper, if already registered.
    pub(crate) fn helper_index(&self, name: &str) -> Option<usize> {
        self.helpers.iter().position(|h| h.name == name)
    }

    /// Tag branch targets and hand out `label_1, label_2, …` in ascending
    /// slot order.
    fn generate_labels(&mut self) -> Result<(), Error> {
        for i in 0..self.output.len() {
            let inst = self.output[i].inst;
            if inst.class() != CLS_JMP || inst.opcode == OP_CALL || inst.opcode == OP_EXIT {
                continue;
            }
            let target = i as i64 + inst.offset as i64 + 1;
            let slot = usize::try_from(target)
                .ok()
                .filter(|t| *t < self.output.len())
                .ok_or(Error::InvalidJumpTarget(i as u32))?;
            self.output[slot].jump_target = true;
        }

        let mut label_index = 1;
        for output in &mut self.output {
            if output.jump_target {
                output.label = Some(format!("label_{}", label_index));
                label_index += 1;
            }
        }
        Ok(())
    }

    /// Collect the distinct helpers referenced by CALL instructions, in
    /// first-occurrence order.
    fn build_helper_table(&mut self) {
        for i in 0..self.output.len() {
            if self.output[i].inst.opcode != OP_CALL {
                continue;
            }
            let imm = self.output[i].inst.imm;
            let name = self.output[i]
                .relocation
                .clone()
                .unwrap_or_else(|| format!("helper_id_{}", imm));
            if self.helper_index(&name).is_none() {
                self.helpers.push(HelperFunction { name, id: imm });
            }
        }
    }
}

/// A single translation session.
#[derive(Debug)]
pub struct CodeGenerator {
    c_name: String,
    elf: Option<ElfView>,
    sections: BTreeMap<String, Section>,
    maps: MapTable,
    line_info: BTreeMap<String, BTreeMap<u32, LineInfo>>,
}

impl CodeGenerator {
    /// Start a session from an ELF image held in memory.
    ///
    /// `c_name` names the module; the emitted metadata table is
    /// `<c_name>_metadata_table`. BTF line information, when present, is
    /// decoded immediately.
    pub fn from_elf(data: &[u8], c_name: &str) -> Result<Self, Error> {
        let elf = ElfView::load(data)?;
        let mut generator = Self {
            c_name: c_name.to_string(),
            elf: Some(elf),
            sections: BTreeMap::new(),
            maps: MapTable::default(),
            line_info: BTreeMap::new(),
        };
        generator.extract_btf_information()?;
        Ok(generator)
    }

    /// Start a session directly from decoded instructions, under a single
    /// section named `c_name`. No relocations, maps, or line info exist in
    /// such a session.
    pub fn from_instructions(c_name: &str, instructions: &[EbpfInst]) -> Self {
        let mut section = Section::new();
        for (offset, inst) in instructions.iter().enumerate() {
            section.output.push(OutputInstruction::new(*inst, offset as u32));
        }
        let mut sections = BTreeMap::new();
        sections.insert(c_name.to_string(), section);
        Self {
            c_name: c_name.to_string(),
            elf: None,
            sections,
            maps: MapTable::default(),
            line_info: BTreeMap::new(),
        }
    }

    /// Names of the user program sections in the object.
    pub fn program_sections(&self) -> Vec<String> {
        self.elf
            .as_ref()
            .map(|elf| elf.program_sections())
            .unwrap_or_default()
    }

    /// Extract the map definition table from the `maps` section. A missing
    /// section simply yields an empty table.
    pub fn extract_maps(&mut self) -> Result<(), Error> {
        let Some(elf) = self.elf.as_ref() else {
            return Ok(());
        };
        let Some(map_section) = elf.section_by_name("maps") else {
            log::debug!("No maps section");
            return Ok(());
        };
        let table = maps::extract_maps(&map_section.data, map_section.index, elf.symbols())?;
        log::debug!("Extracted {} map definitions", table.len());
        self.maps = table;
        Ok(())
    }

    /// Load one program section: copy its instructions, pick up the program
    /// name from the symbol at offset 0, and attach relocations.
    ///
    /// Must run after [`extract_maps`](Self::extract_maps) so map
    /// relocations can be validated.
    pub fn parse_section(
        &mut self,
        section_name: &str,
        program_type: Guid,
        attach_type: Guid,
    ) -> Result<(), Error> {
        let Some(elf) = self.elf.as_ref() else {
            return Err(Error::ElfStructural("session has no ELF object".into()));
        };

        let mut section = Section::new();
        section.program_type = program_type;
        section.expected_attach_type = attach_type;
        extract_program(elf, section_name, &mut section)?;
        attach_relocations(elf, section_name, &self.maps, &mut section)?;

        log::debug!(
            "Parsed section '{}': program '{}', {} instructions",
            section_name,
            section.program_name,
            section.output.len()
        );
        self.sections.insert(section_name.to_string(), section);
        Ok(())
    }

    /// Run label assignment, helper table construction, and lowering for a
    /// previously parsed section.
    pub fn generate(&mut self, section_name: &str) -> Result<(), Error> {
        let section = self
            .sections
            .get_mut(section_name)
            .ok_or_else(|| Error::ElfStructural(format!("unknown section '{}'", section_name)))?;
        section.generate_labels()?;
        section.build_helper_table();
        section.lower(section_name, &self.maps)
    }

    /// Record one source-line record for an instruction. The first record
    /// per ordinal wins. `instruction_byte_offset` is in bytes; the
    /// instruction ordinal is that offset divided by the instruction size.
    pub fn record_line_info(
        &mut self,
        section: &str,
        instruction_byte_offset: u32,
        file_name: &str,
        source: &str,
        line: u32,
        column: u32,
    ) {
        self.line_info
            .entry(section.to_string())
            .or_default()
            .entry(instruction_byte_offset / INSN_SIZE as u32)
            .or_insert_with(|| LineInfo {
                file_name: file_name.to_string(),
                source: source.to_string(),
                line,
                column,
            });
    }

    fn extract_btf_information(&mut self) -> Result<(), Error> {
        let Some(elf) = self.elf.as_ref() else {
            return Ok(());
        };
        let (Some(btf_section), Some(btf_ext_section)) =
            (elf.section_by_name(".BTF"), elf.section_by_name(".BTF.ext"))
        else {
            return Ok(());
        };

        let mut line_info: BTreeMap<String, BTreeMap<u32, LineInfo>> = BTreeMap::new();
        btf::parse_line_information(
            &btf_section.data,
            &btf_ext_section.data,
            |section, byte_offset, file_name, source, line, column| {
                line_info
                    .entry(section.to_string())
                    .or_default()
                    .entry(byte_offset / INSN_SIZE as u32)
                    .or_insert_with(|| LineInfo {
                        file_name: file_name.to_string(),
                        source: source.to_string(),
                        line,
                        column,
                    });
            },
        )?;
        self.line_info = line_info;
        Ok(())
    }
}

/// Copy a program section's instructions into the output buffer and record
/// its program name.
fn extract_program(elf: &ElfView, section_name: &str, section: &mut Section) -> Result<(), Error> {
    let program_section = elf
        .section_by_name(section_name)
        .ok_or_else(|| Error::ElfStructural(format!("missing section '{}'", section_name)))?;
    if program_section.data.len() % INSN_SIZE != 0 {
        return Err(Error::ElfStructural(format!(
            "section '{}' size {} is not a multiple of {}",
            section_name,
            program_section.data.len(),
            INSN_SIZE
        )));
    }

    // The program is named by the first symbol sitting at offset 0 of the
    // section.
    for symbol in elf.symbols() {
        if symbol.name.is_empty() {
            continue;
        }
        if symbol.section_index as usize == program_section.index && symbol.value == 0 {
            section.program_name = symbol.name.clone();
            break;
        }
    }

    for (offset, inst) in decode_instructions(&program_section.data).into_iter().enumerate() {
        section.output.push(OutputInstruction::new(inst, offset as u32));
    }
    Ok(())
}

/// Attach relocation symbol names to the instruction slots they target.
fn attach_relocations(
    elf: &ElfView,
    section_name: &str,
    maps: &MapTable,
    section: &mut Section,
) -> Result<(), Error> {
    let maps_section_index = elf.section_by_name("maps").map(|s| s.index);
    let Some(rel_section) = elf.relocation_section(section_name) else {
        return Ok(());
    };

    for relocation in elf.relocations(rel_section) {
        let symbol = elf
            .symbol(relocation.symbol as usize)
            .ok_or(Error::RelocationResolution(relocation.offset))?;
        let slot = section
            .output
            .get_mut((relocation.offset / INSN_SIZE as u64) as usize)
            .ok_or(Error::RelocationResolution(relocation.offset))?;
        if !symbol.name.is_empty() {
            slot.relocation = Some(symbol.name.clone());
        }
        if maps_section_index == Some(symbol.section_index as usize)
            && maps.get(&symbol.name).is_none()
        {
            return Err(Error::MapMissing(symbol.name.clone()));
        }
    }
    Ok(())
}

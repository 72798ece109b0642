//! Instruction lowering: each eBPF instruction becomes zero or more C
//! statement lines, stored back on its output slot for the emitter.

use crate::error::Error;
use crate::insn::{
    CLS_ALU, CLS_ALU64, CLS_JMP, CLS_LD, CLS_LDX, CLS_ST, CLS_STX, EbpfInst, OP_CALL, OP_EXIT,
    OP_JA, OP_LDDW, SIZE_B, SIZE_H, SIZE_MASK, SIZE_W, alu, jmp,
};
use crate::maps::MapTable;

use super::Section;
use super::emit::sanitize_name;

/// C type matching the size subfield of a load/store opcode.
fn size_type(opcode: u8) -> &'static str {
    match opcode & SIZE_MASK {
        SIZE_B => "uint8_t",
        SIZE_H => "uint16_t",
        SIZE_W => "uint32_t",
        _ => "uint64_t",
    }
}

/// Comparison expression for a conditional jump family, or `None` for
/// families with no predicate form.
fn jump_predicate(family: u8, dst: &str, src: &str) -> Option<String> {
    match family {
        jmp::JEQ => Some(format!("{} == {}", dst, src)),
        jmp::JGT => Some(format!("{} > {}", dst, src)),
        jmp::JGE => Some(format!("{} >= {}", dst, src)),
        jmp::JSET => Some(format!("{} & {}", dst, src)),
        jmp::JNE => Some(format!("{} != {}", dst, src)),
        jmp::JSGT => Some(format!("(int64_t){} > (int64_t){}", dst, src)),
        jmp::JSGE => Some(format!("(int64_t){} >= (int64_t){}", dst, src)),
        jmp::JLT => Some(format!("{} < {}", dst, src)),
        jmp::JLE => Some(format!("{} <= {}", dst, src)),
        jmp::JSLT => Some(format!("(int64_t){} < (int64_t){}", dst, src)),
        jmp::JSLE => Some(format!("(int64_t){} <= (int64_t){}", dst, src)),
        _ => None,
    }
}

impl Section {
    /// Lower every instruction in the output buffer. Labels and the helper
    /// table must already be in place.
    pub(crate) fn lower(&mut self, section_name: &str, maps: &MapTable) -> Result<(), Error> {
        let program_name = sanitize_name(if self.program_name.is_empty() {
            section_name
        } else {
            self.program_name.as_str()
        });

        let mut i = 0;
        while i < self.output.len() {
            let slot = i;
            let inst = self.output[slot].inst;
            let relocation = self.output[slot].relocation.clone();
            let mut lines = Vec::new();

            match inst.class() {
                CLS_ALU | CLS_ALU64 => self.lower_alu(inst, slot, &mut lines)?,
                CLS_LD => {
                    // LDDW carries its upper 32 immediate bits in the next
                    // slot, which lowers to nothing.
                    if inst.opcode != OP_LDDW {
                        return Err(Error::InvalidOperand(format!(
                            "load opcode {:#04x}",
                            inst.opcode
                        )));
                    }
                    let next = self
                        .output
                        .get(slot + 1)
                        .map(|o| o.inst)
                        .ok_or_else(|| Error::InvalidOperand("LDDW missing second slot".into()))?;
                    self.lower_lddw(inst, next, relocation.as_deref(), maps, &mut lines)?;
                    i += 1;
                }
                CLS_LDX => {
                    let destination = self.reg(inst.dst())?;
                    let source = self.reg(inst.src())?;
                    lines.push(format!(
                        "{} = *({} *)(uintptr_t)({} + OFFSET({}));",
                        destination,
                        size_type(inst.opcode),
                        source,
                        inst.offset
                    ));
                }
                CLS_ST | CLS_STX => {
                    let destination = self.reg(inst.dst())?;
                    let source = if inst.class() == CLS_ST {
                        format!("IMMEDIATE({})", inst.imm)
                    } else {
                        self.reg(inst.src())?.to_string()
                    };
                    let ty = size_type(inst.opcode);
                    lines.push(format!(
                        "*({} *)(uintptr_t)({} + OFFSET({})) = ({}){};",
                        ty, destination, inst.offset, ty, source
                    ));
                }
                CLS_JMP => {
                    self.lower_jmp(inst, slot, relocation.as_deref(), &program_name, &mut lines)?
                }
                _ => {
                    return Err(Error::InvalidOperand(format!("opcode {:#04x}", inst.opcode)));
                }
            }

            self.output[slot].lines = lines;
            i += 1;
        }
        Ok(())
    }

    fn lower_alu(
        &mut self,
        inst: EbpfInst,
        pc: usize,
        lines: &mut Vec<String>,
    ) -> Result<(), Error> {
        let destination = self.reg(inst.dst())?;
        let source = if inst.uses_src_reg() {
            self.reg(inst.src())?.to_string()
        } else {
            format!("IMMEDIATE({})", inst.imm)
        };
        let mut is64bit = inst.class() == CLS_ALU64;
        let check_div_by_zero = format!(
            "if ({} == 0) {{ division_by_zero({}); return -1; }}",
            source, pc
        );

        match inst.family() {
            alu::ADD => lines.push(format!("{} += {};", destination, source)),
            alu::SUB => lines.push(format!("{} -= {};", destination, source)),
            alu::MUL => lines.push(format!("{} *= {};", destination, source)),
            alu::DIV => {
                lines.push(check_div_by_zero);
                if is64bit {
                    lines.push(format!("{} /= {};", destination, source));
                } else {
                    lines.push(format!(
                        "{} = (uint32_t){} / (uint32_t){};",
                        destination, destination, source
                    ));
                }
            }
            alu::OR => lines.push(format!("{} |= {};", destination, source)),
            alu::AND => lines.push(format!("{} &= {};", destination, source)),
            alu::LSH => lines.push(format!("{} <<= {};", destination, source)),
            alu::RSH => {
                if is64bit {
                    lines.push(format!("{} >>= {};", destination, source));
                } else {
                    lines.push(format!(
                        "{} = (uint32_t){} >> {};",
                        destination, destination, source
                    ));
                }
            }
            // NEG reads only the destination register.
            alu::NEG => {
                if is64bit {
                    lines.push(format!("{} = -{};", destination, destination));
                } else {
                    lines.push(format!("{} = -(int64_t){};", destination, destination));
                }
            }
            alu::MOD => {
                lines.push(check_div_by_zero);
                if is64bit {
                    lines.push(format!("{} %= {};", destination, source));
                } else {
                    lines.push(format!(
                        "{} = (uint32_t){} % (uint32_t){};",
                        destination, destination, source
                    ));
                }
            }
            alu::XOR => lines.push(format!("{} ^= {};", destination, source)),
            alu::MOV => lines.push(format!("{} = {};", destination, source)),
            alu::ASHR => {
                if is64bit {
                    lines.push(format!(
                        "{} = (int64_t){} >> (uint32_t){};",
                        destination, destination, source
                    ));
                } else {
                    lines.push(format!(
                        "{} = (int32_t){} >> {};",
                        destination, destination, source
                    ));
                }
            }
            alu::BYTE_ORDER => {
                let (swap_function, size_type) = match (inst.uses_src_reg(), inst.imm) {
                    (true, 16) => ("htobe16", "uint16_t"),
                    (true, 32) => ("htobe32", "uint32_t"),
                    (true, 64) => {
                        is64bit = true;
                        ("htobe64", "uint64_t")
                    }
                    (false, 16) => ("htole16", "uint16_t"),
                    (false, 32) => ("htole32", "uint32_t"),
                    (false, 64) => {
                        is64bit = true;
                        ("htole64", "uint64_t")
                    }
                    (_, width) => {
                        return Err(Error::InvalidOperand(format!(
                            "byte order width {}",
                            width
                        )));
                    }
                };
                lines.push(format!(
                    "{} = {}(({}){});",
                    destination, swap_function, size_type, destination
                ));
            }
            family => {
                return Err(Error::InvalidOperand(format!("ALU family {:#x}", family)));
            }
        }

        // 32-bit operations clear the upper half of the destination.
        if !is64bit {
            lines.push(format!("{} &= UINT32_MAX;", destination));
        }
        Ok(())
    }

    fn lower_lddw(
        &mut self,
        inst: EbpfInst,
        next: EbpfInst,
        relocation: Option<&str>,
        maps: &MapTable,
        lines: &mut Vec<String>,
    ) -> Result<(), Error> {
        let destination = self.reg(inst.dst())?;
        match relocation {
            None => {
                let imm = ((next.imm as u32 as u64) << 32) | inst.imm as u32 as u64;
                lines.push(format!("{} = (uint64_t){};", destination, imm));
            }
            Some(name) => {
                let entry = maps
                    .get(name)
                    .ok_or_else(|| Error::MapMissing(name.to_string()))?;
                lines.push(format!(
                    "{} = POINTER(_maps[{}].address);",
                    destination, entry.index
                ));
                self.referenced_map_indices.insert(entry.index);
            }
        }
        Ok(())
    }

    fn lower_jmp(
        &mut self,
        inst: EbpfInst,
        slot: usize,
        relocation: Option<&str>,
        program_name: &str,
        lines: &mut Vec<String>,
    ) -> Result<(), Error> {
        let destination = self.reg(inst.dst())?;
        let source = if inst.uses_src_reg() {
            self.reg(inst.src())?.to_string()
        } else {
            format!("IMMEDIATE({})", inst.imm)
        };

        if inst.opcode == OP_JA {
            let target = self.target_label(slot, inst.offset)?;
            lines.push(format!("goto {};", target));
        } else if inst.opcode == OP_CALL {
            let name = relocation
                .map(str::to_string)
                .unwrap_or_else(|| format!("helper_id_{}", inst.imm));
            let index = self
                .helper_index(&name)
                .expect("helper table is built before lowering");
            let function = format!("{}_helpers[{}]", program_name, index);
            let r0 = self.reg(0)?;
            let r1 = self.reg(1)?;
            let r2 = self.reg(2)?;
            let r3 = self.reg(3)?;
            let r4 = self.reg(4)?;
            let r5 = self.reg(5)?;
            lines.push(format!(
                "{} = {}.address({}, {}, {}, {}, {});",
                r0, function, r1, r2, r3, r4, r5
            ));
            // A helper marked tail_call transfers control on success; the
            // caller must not continue.
            lines.push(format!(
                "if (({}.tail_call) && ({} == 0)) return 0;",
                function, r0
            ));
        } else if inst.opcode == OP_EXIT {
            lines.push(format!("return {};", self.reg(0)?));
        } else {
            let predicate = jump_predicate(inst.family(), destination, &source)
                .ok_or_else(|| Error::InvalidOperand(format!("jump opcode {:#04x}", inst.opcode)))?;
            let target = self.target_label(slot, inst.offset)?;
            lines.push(format!("if ({}) goto {};", predicate, target));
        }
        Ok(())
    }

    /// Label of the slot a branch at `slot` with displacement `offset`
    /// lands on.
    fn target_label(&self, slot: usize, offset: i16) -> Result<String, Error> {
        let target = slot as i64 + offset as i64 + 1;
        usize::try_from(target)
            .ok()
            .and_then(|t| self.output.get(t))
            .and_then(|o| o.label.clone())
            .ok_or(Error::InvalidJumpTarget(slot as u32))
    }
}

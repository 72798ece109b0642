//! eBPF instruction format.
//!
//! eBPF instructions are 64 bits (8 bytes) with the following format:
//!
//! ```text
//! +--------+----+----+--------+------------+
//! | opcode | dst| src| offset |  immediate |
//! | 8 bits | 4b | 4b | 16 bits|   32 bits  |
//! +--------+----+----+--------+------------+
//! ```
//!
//! The dst and src fields are packed into a single byte: destination in the
//! low 4 bits, source in the high 4 bits. Wide instructions (LDDW) use two
//! consecutive slots, with the upper 32 bits of the immediate in the second
//! slot.

/// Size of one eBPF instruction in bytes.
pub const INSN_SIZE: usize = 8;

/// Instruction class mask (low 3 bits of the opcode).
pub const CLS_MASK: u8 = 0x07;
/// Non-register load (LDDW).
pub const CLS_LD: u8 = 0x00;
/// Register load.
pub const CLS_LDX: u8 = 0x01;
/// Immediate store.
pub const CLS_ST: u8 = 0x02;
/// Register store.
pub const CLS_STX: u8 = 0x03;
/// 32-bit arithmetic.
pub const CLS_ALU: u8 = 0x04;
/// Jumps, calls, and exit.
pub const CLS_JMP: u8 = 0x05;
/// 64-bit arithmetic.
pub const CLS_ALU64: u8 = 0x07;

/// Memory access width mask (bits 3-4).
pub const SIZE_MASK: u8 = 0x18;
/// 32-bit access.
pub const SIZE_W: u8 = 0x00;
/// 16-bit access.
pub const SIZE_H: u8 = 0x08;
/// 8-bit access.
pub const SIZE_B: u8 = 0x10;
/// 64-bit access.
pub const SIZE_DW: u8 = 0x18;

/// Second operand is a register rather than the immediate.
pub const SRC_REG: u8 = 0x08;

/// Load 64-bit immediate (two slots).
pub const OP_LDDW: u8 = 0x18;
/// Unconditional jump.
pub const OP_JA: u8 = 0x05;
/// Helper call.
pub const OP_CALL: u8 = 0x85;
/// Return from program.
pub const OP_EXIT: u8 = 0x95;

/// Operation families within the ALU classes (`opcode >> 4`).
pub mod alu {
    pub const ADD: u8 = 0x0;
    pub const SUB: u8 = 0x1;
    pub const MUL: u8 = 0x2;
    pub const DIV: u8 = 0x3;
    pub const OR: u8 = 0x4;
    pub const AND: u8 = 0x5;
    pub const LSH: u8 = 0x6;
    pub const RSH: u8 = 0x7;
    pub const NEG: u8 = 0x8;
    pub const MOD: u8 = 0x9;
    pub const XOR: u8 = 0xa;
    pub const MOV: u8 = 0xb;
    pub const ASHR: u8 = 0xc;
    pub const BYTE_ORDER: u8 = 0xd;
}

/// Operation families within the JMP class (`opcode >> 4`).
pub mod jmp {
    pub const JA: u8 = 0x0;
    pub const JEQ: u8 = 0x1;
    pub const JGT: u8 = 0x2;
    pub const JGE: u8 = 0x3;
    pub const JSET: u8 = 0x4;
    pub const JNE: u8 = 0x5;
    pub const JSGT: u8 = 0x6;
    pub const JSGE: u8 = 0x7;
    pub const CALL: u8 = 0x8;
    pub const EXIT: u8 = 0x9;
    pub const JLT: u8 = 0xa;
    pub const JLE: u8 = 0xb;
    pub const JSLT: u8 = 0xc;
    pub const JSLE: u8 = 0xd;
}

/// Single eBPF instruction (8 bytes).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct EbpfInst {
    /// Opcode specifying operation type.
    pub opcode: u8,
    /// Register fields: dst (low 4 bits) | src (high 4 bits).
    pub regs: u8,
    /// Offset for memory operations and jumps.
    pub offset: i16,
    /// Immediate value.
    pub imm: i32,
}

impl EbpfInst {
    /// Create a new instruction.
    pub const fn new(opcode: u8, dst: u8, src: u8, offset: i16, imm: i32) -> Self {
        Self {
            opcode,
            regs: (src << 4) | (dst & 0x0f),
            offset,
            imm,
        }
    }

    /// Decode one instruction from its 8-byte little-endian encoding.
    pub fn from_bytes(bytes: &[u8; INSN_SIZE]) -> Self {
        Self {
            opcode: bytes[0],
            regs: bytes[1],
            offset: i16::from_le_bytes([bytes[2], bytes[3]]),
            imm: i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    /// Destination register field.
    pub const fn dst(&self) -> u8 {
        self.regs & 0x0f
    }

    /// Source register field.
    pub const fn src(&self) -> u8 {
        (self.regs >> 4) & 0x0f
    }

    /// Instruction class (low 3 bits of the opcode).
    pub const fn class(&self) -> u8 {
        self.opcode & CLS_MASK
    }

    /// Operation family (high 4 bits of the opcode).
    pub const fn family(&self) -> u8 {
        self.opcode >> 4
    }

    /// True when the second operand is a register.
    pub const fn uses_src_reg(&self) -> bool {
        self.opcode & SRC_REG != 0
    }

    /// Synthesized mnemonic for trace comments, e.g. `ADD64_IMM` or `LDXW`.
    pub fn mnemonic(&self) -> String {
        let size_suffix = |op: u8| match op & SIZE_MASK {
            SIZE_B => "B",
            SIZE_H => "H",
            SIZE_W => "W",
            _ => "DW",
        };
        let operand_suffix = if self.uses_src_reg() { "_REG" } else { "_IMM" };
        match self.class() {
            CLS_ALU | CLS_ALU64 => {
                let width = if self.class() == CLS_ALU64 { "64" } else { "" };
                match self.family() {
                    alu::ADD => format!("ADD{}{}", width, operand_suffix),
                    alu::SUB => format!("SUB{}{}", width, operand_suffix),
                    alu::MUL => format!("MUL{}{}", width, operand_suffix),
                    alu::DIV => format!("DIV{}{}", width, operand_suffix),
                    alu::OR => format!("OR{}{}", width, operand_suffix),
                    alu::AND => format!("AND{}{}", width, operand_suffix),
                    alu::LSH => format!("LSH{}{}", width, operand_suffix),
                    alu::RSH => format!("RSH{}{}", width, operand_suffix),
                    alu::NEG => format!("NEG{}", width),
                    alu::MOD => format!("MOD{}{}", width, operand_suffix),
                    alu::XOR => format!("XOR{}{}", width, operand_suffix),
                    alu::MOV => format!("MOV{}{}", width, operand_suffix),
                    alu::ASHR => format!("ARSH{}{}", width, operand_suffix),
                    alu::BYTE_ORDER => {
                        let order = if self.uses_src_reg() { "BE" } else { "LE" };
                        format!("{}{}", order, self.imm)
                    }
                    _ => format!("OP_{:#04x}", self.opcode),
                }
            }
            CLS_LD => {
                if self.opcode == OP_LDDW {
                    "LDDW".to_string()
                } else {
                    format!("OP_{:#04x}", self.opcode)
                }
            }
            CLS_LDX => format!("LDX{}", size_suffix(self.opcode)),
            CLS_ST => format!("ST{}", size_suffix(self.opcode)),
            CLS_STX => format!("STX{}", size_suffix(self.opcode)),
            CLS_JMP => match self.opcode {
                OP_JA => "JA".to_string(),
                OP_CALL => "CALL".to_string(),
                OP_EXIT => "EXIT".to_string(),
                _ => match self.family() {
                    jmp::JEQ => format!("JEQ{}", operand_suffix),
                    jmp::JGT => format!("JGT{}", operand_suffix),
                    jmp::JGE => format!("JGE{}", operand_suffix),
                    jmp::JSET => format!("JSET{}", operand_suffix),
                    jmp::JNE => format!("JNE{}", operand_suffix),
                    jmp::JSGT => format!("JSGT{}", operand_suffix),
                    jmp::JSGE => format!("JSGE{}", operand_suffix),
                    jmp::JLT => format!("JLT{}", operand_suffix),
                    jmp::JLE => format!("JLE{}", operand_suffix),
                    jmp::JSLT => format!("JSLT{}", operand_suffix),
                    jmp::JSLE => format!("JSLE{}", operand_suffix),
                    _ => format!("OP_{:#04x}", self.opcode),
                },
            },
            _ => format!("OP_{:#04x}", self.opcode),
        }
    }
}

/// Decode a byte buffer into instructions.
///
/// The buffer length must be a multiple of [`INSN_SIZE`]; trailing bytes are
/// the caller's error to reject.
pub fn decode_instructions(data: &[u8]) -> Vec<EbpfInst> {
    data.chunks_exact(INSN_SIZE)
        .map(|chunk| EbpfInst::from_bytes(chunk.try_into().unwrap()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_mov64_imm() {
        // mov64 r0, 42
        let inst = EbpfInst::from_bytes(&[0xb7, 0x00, 0x00, 0x00, 0x2a, 0x00, 0x00, 0x00]);
        assert_eq!(inst.opcode, 0xb7);
        assert_eq!(inst.dst(), 0);
        assert_eq!(inst.src(), 0);
        assert_eq!(inst.imm, 42);
        assert_eq!(inst.class(), CLS_ALU64);
        assert_eq!(inst.family(), alu::MOV);
        assert!(!inst.uses_src_reg());
    }

    #[test]
    fn test_decode_register_fields() {
        // add64 r3, r7
        let inst = EbpfInst::new(0x0f, 3, 7, 0, 0);
        assert_eq!(inst.dst(), 3);
        assert_eq!(inst.src(), 7);
        assert!(inst.uses_src_reg());
    }

    #[test]
    fn test_decode_negative_offset() {
        let inst = EbpfInst::from_bytes(&[0x55, 0x01, 0xfe, 0xff, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(inst.offset, -2);
        assert_eq!(inst.class(), CLS_JMP);
        assert_eq!(inst.family(), jmp::JNE);
    }

    #[test]
    fn test_decode_buffer() {
        let program = [
            0xb7, 0x00, 0x00, 0x00, 0x2a, 0x00, 0x00, 0x00, // mov r0, 42
            0x95, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // exit
        ];
        let insts = decode_instructions(&program);
        assert_eq!(insts.len(), 2);
        assert_eq!(insts[1].opcode, OP_EXIT);
    }

    #[test]
    fn test_mnemonics() {
        assert_eq!(EbpfInst::new(0xb7, 0, 0, 0, 42).mnemonic(), "MOV64_IMM");
        assert_eq!(EbpfInst::new(0x0c, 1, 2, 0, 0).mnemonic(), "ADD_REG");
        assert_eq!(EbpfInst::new(0x61, 1, 2, 8, 0).mnemonic(), "LDXW");
        assert_eq!(EbpfInst::new(0x18, 6, 0, 0, 0).mnemonic(), "LDDW");
        assert_eq!(EbpfInst::new(0x85, 0, 0, 0, 5).mnemonic(), "CALL");
        assert_eq!(EbpfInst::new(0xdc, 1, 0, 0, 16).mnemonic(), "BE16");
    }
}

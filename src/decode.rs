//! Decoding of 32-bit instruction encodings
//!
//! Decoding is by opcode (bits 6:0), then funct3 (bits 14:12), then
//! funct7 (bits 31:25) or specific immediate bits where required.
//! The immediate is extracted and sign-extended according to the
//! format (I, S, B, U or J) of the instruction, so the decoded form
//! carries operands that are ready to use.
//!
//! Encodings that exist only in RV64 (the w-suffixed operations, ld,
//! lwu, sd, and 6-bit shift amounts) are decode failures in 32-bit
//! mode. The execution engine converts any decode failure into an
//! illegal instruction exception.

use thiserror::Error;

use crate::instr::{BranchCond, CsrOp, Instr, LoadWidth, RegImmOp, RegRegOp, StoreWidth};
use crate::utils::{extract_field, sign_extend};
use crate::Xlen;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("got invalid or unimplemented opcode 0x{0:x}")]
    InvalidOpcode(u32),
    #[error("invalid instruction encoding 0x{0:08x}")]
    InvalidEncoding(u32),
    #[error("encoding 0x{0:08x} is only defined in 64-bit mode")]
    Rv64Only(u32),
}

// Major opcodes (bits 6:0)
const OP_LUI: u32 = 0b0110111;
const OP_AUIPC: u32 = 0b0010111;
const OP_JAL: u32 = 0b1101111;
const OP_JALR: u32 = 0b1100111;
const OP_BRANCH: u32 = 0b1100011;
const OP_LOAD: u32 = 0b0000011;
const OP_STORE: u32 = 0b0100011;
const OP_IMM: u32 = 0b0010011;
const OP: u32 = 0b0110011;
const OP_IMM_32: u32 = 0b0011011;
const OP_32: u32 = 0b0111011;
const OP_MISC_MEM: u32 = 0b0001111;
const OP_SYSTEM: u32 = 0b1110011;

const FUNCT7_MULDIV: u32 = 0b0000001;
const FUNCT7_SUB_SRA: u32 = 0b0100000;

/// Makes a function called field_name which gets that field from a
/// 32-bit instruction. The function extracts instr[end:start]
/// (verilog notation).
macro_rules! make_field_getter {
    ($field_name:ident, $field_type:ty, $end:expr, $start:expr) => {
        fn $field_name(instr: u32) -> $field_type {
            extract_field(instr, $end, $start) as $field_type
        }
    };
}

make_field_getter!(opcode, u32, 6, 0);
make_field_getter!(rd, u8, 11, 7);
make_field_getter!(funct3, u32, 14, 12);
make_field_getter!(rs1, u8, 19, 15);
make_field_getter!(rs2, u8, 24, 20);
make_field_getter!(funct7, u32, 31, 25);

/// The I-type immediate, instr[31:20], sign extended
fn imm_itype(instr: u32) -> i64 {
    sign_extend(extract_field(instr, 31, 20).into(), 11) as i64
}

/// The S-type immediate, sign extended
fn imm_stype(instr: u32) -> i64 {
    let imm11_5 = extract_field(instr, 31, 25);
    let imm4_0 = extract_field(instr, 11, 7);
    sign_extend(((imm11_5 << 5) | imm4_0).into(), 11) as i64
}

/// The B-type immediate (a multiple of 2), sign extended
fn imm_btype(instr: u32) -> i64 {
    let imm12 = extract_field(instr, 31, 31);
    let imm11 = extract_field(instr, 7, 7);
    let imm10_5 = extract_field(instr, 30, 25);
    let imm4_1 = extract_field(instr, 11, 8);
    let imm = (imm12 << 12) | (imm11 << 11) | (imm10_5 << 5) | (imm4_1 << 1);
    sign_extend(imm.into(), 12) as i64
}

/// The U-type immediate, already in bits 31:12, sign extended
fn imm_utype(instr: u32) -> i64 {
    sign_extend((instr & 0xffff_f000).into(), 31) as i64
}

/// The J-type immediate (a multiple of 2), sign extended
fn imm_jtype(instr: u32) -> i64 {
    let imm20 = extract_field(instr, 31, 31);
    let imm19_12 = extract_field(instr, 19, 12);
    let imm11 = extract_field(instr, 20, 20);
    let imm10_1 = extract_field(instr, 30, 21);
    let imm = (imm20 << 20) | (imm19_12 << 12) | (imm11 << 11) | (imm10_1 << 1);
    sign_extend(imm.into(), 20) as i64
}

/// Decode the shift amount of a shift-by-immediate instruction,
/// checking that the bits above it hold the expected upper field. The
/// shift amount is 5 bits in 32-bit mode and 6 bits in 64-bit mode.
fn shift_imm(instr: u32, upper: u32, xlen: Xlen) -> Result<i64, DecodeError> {
    let (shamt, found_upper) = match xlen {
        Xlen::Xlen32 => (extract_field(instr, 24, 20), extract_field(instr, 31, 25)),
        Xlen::Xlen64 => (extract_field(instr, 25, 20), extract_field(instr, 31, 26)),
    };
    // In 64-bit mode the upper field loses its low bit to the wider
    // shift amount
    let expected = match xlen {
        Xlen::Xlen32 => upper,
        Xlen::Xlen64 => upper >> 1,
    };
    if found_upper == expected {
        Ok(shamt.into())
    } else {
        Err(DecodeError::InvalidEncoding(instr))
    }
}

/// Decode a 32-bit instruction encoding
pub fn decode(instr: u32, xlen: Xlen) -> Result<Instr, DecodeError> {
    match opcode(instr) {
        OP_LUI => Ok(Instr::Lui {
            dest: rd(instr),
            imm: imm_utype(instr),
        }),
        OP_AUIPC => Ok(Instr::Auipc {
            dest: rd(instr),
            imm: imm_utype(instr),
        }),
        OP_JAL => Ok(Instr::Jal {
            dest: rd(instr),
            offset: imm_jtype(instr),
        }),
        OP_JALR => {
            if funct3(instr) != 0 {
                return Err(DecodeError::InvalidEncoding(instr));
            }
            Ok(Instr::Jalr {
                dest: rd(instr),
                base: rs1(instr),
                offset: imm_itype(instr),
            })
        }
        OP_BRANCH => {
            let cond = match funct3(instr) {
                0b000 => BranchCond::Beq,
                0b001 => BranchCond::Bne,
                0b100 => BranchCond::Blt,
                0b101 => BranchCond::Bge,
                0b110 => BranchCond::Bltu,
                0b111 => BranchCond::Bgeu,
                _ => return Err(DecodeError::InvalidEncoding(instr)),
            };
            Ok(Instr::Branch {
                cond,
                src1: rs1(instr),
                src2: rs2(instr),
                offset: imm_btype(instr),
            })
        }
        OP_LOAD => {
            let width = match funct3(instr) {
                0b000 => LoadWidth::Lb,
                0b001 => LoadWidth::Lh,
                0b010 => LoadWidth::Lw,
                0b011 => rv64(LoadWidth::Ld, instr, xlen)?,
                0b100 => LoadWidth::Lbu,
                0b101 => LoadWidth::Lhu,
                0b110 => rv64(LoadWidth::Lwu, instr, xlen)?,
                _ => return Err(DecodeError::InvalidEncoding(instr)),
            };
            Ok(Instr::Load {
                width,
                dest: rd(instr),
                base: rs1(instr),
                offset: imm_itype(instr),
            })
        }
        OP_STORE => {
            let width = match funct3(instr) {
                0b000 => StoreWidth::Sb,
                0b001 => StoreWidth::Sh,
                0b010 => StoreWidth::Sw,
                0b011 => rv64(StoreWidth::Sd, instr, xlen)?,
                _ => return Err(DecodeError::InvalidEncoding(instr)),
            };
            Ok(Instr::Store {
                width,
                src: rs2(instr),
                base: rs1(instr),
                offset: imm_stype(instr),
            })
        }
        OP_IMM => {
            let (op, imm) = match funct3(instr) {
                0b000 => (RegImmOp::Addi, imm_itype(instr)),
                0b010 => (RegImmOp::Slti, imm_itype(instr)),
                0b011 => (RegImmOp::Sltiu, imm_itype(instr)),
                0b100 => (RegImmOp::Xori, imm_itype(instr)),
                0b110 => (RegImmOp::Ori, imm_itype(instr)),
                0b111 => (RegImmOp::Andi, imm_itype(instr)),
                0b001 => (RegImmOp::Slli, shift_imm(instr, 0, xlen)?),
                0b101 => {
                    if extract_field(instr, 30, 30) == 1 {
                        (RegImmOp::Srai, shift_imm(instr, FUNCT7_SUB_SRA, xlen)?)
                    } else {
                        (RegImmOp::Srli, shift_imm(instr, 0, xlen)?)
                    }
                }
                _ => unreachable!("funct3 is a 3-bit field"),
            };
            Ok(Instr::RegImm {
                op,
                dest: rd(instr),
                src: rs1(instr),
                imm,
            })
        }
        OP => {
            let op = match (funct7(instr), funct3(instr)) {
                (0, 0b000) => RegRegOp::Add,
                (0, 0b001) => RegRegOp::Sll,
                (0, 0b010) => RegRegOp::Slt,
                (0, 0b011) => RegRegOp::Sltu,
                (0, 0b100) => RegRegOp::Xor,
                (0, 0b101) => RegRegOp::Srl,
                (0, 0b110) => RegRegOp::Or,
                (0, 0b111) => RegRegOp::And,
                (FUNCT7_SUB_SRA, 0b000) => RegRegOp::Sub,
                (FUNCT7_SUB_SRA, 0b101) => RegRegOp::Sra,
                (FUNCT7_MULDIV, 0b000) => RegRegOp::Mul,
                (FUNCT7_MULDIV, 0b001) => RegRegOp::Mulh,
                (FUNCT7_MULDIV, 0b010) => RegRegOp::Mulhsu,
                (FUNCT7_MULDIV, 0b011) => RegRegOp::Mulhu,
                (FUNCT7_MULDIV, 0b100) => RegRegOp::Div,
                (FUNCT7_MULDIV, 0b101) => RegRegOp::Divu,
                (FUNCT7_MULDIV, 0b110) => RegRegOp::Rem,
                (FUNCT7_MULDIV, 0b111) => RegRegOp::Remu,
                _ => return Err(DecodeError::InvalidEncoding(instr)),
            };
            Ok(Instr::RegReg {
                op,
                dest: rd(instr),
                src1: rs1(instr),
                src2: rs2(instr),
            })
        }
        OP_IMM_32 => {
            if xlen != Xlen::Xlen64 {
                return Err(DecodeError::Rv64Only(instr));
            }
            let (op, imm) = match funct3(instr) {
                0b000 => (RegImmOp::Addiw, imm_itype(instr)),
                // The w-suffixed shifts always take a 5-bit shift
                // amount, even though the registers are 64 bits wide
                0b001 => (RegImmOp::Slliw, shift_imm(instr, 0, Xlen::Xlen32)?),
                0b101 => {
                    if extract_field(instr, 30, 30) == 1 {
                        (
                            RegImmOp::Sraiw,
                            shift_imm(instr, FUNCT7_SUB_SRA, Xlen::Xlen32)?,
                        )
                    } else {
                        (RegImmOp::Srliw, shift_imm(instr, 0, Xlen::Xlen32)?)
                    }
                }
                _ => return Err(DecodeError::InvalidEncoding(instr)),
            };
            Ok(Instr::RegImm {
                op,
                dest: rd(instr),
                src: rs1(instr),
                imm,
            })
        }
        OP_32 => {
            if xlen != Xlen::Xlen64 {
                return Err(DecodeError::Rv64Only(instr));
            }
            let op = match (funct7(instr), funct3(instr)) {
                (0, 0b000) => RegRegOp::Addw,
                (0, 0b001) => RegRegOp::Sllw,
                (0, 0b101) => RegRegOp::Srlw,
                (FUNCT7_SUB_SRA, 0b000) => RegRegOp::Subw,
                (FUNCT7_SUB_SRA, 0b101) => RegRegOp::Sraw,
                (FUNCT7_MULDIV, 0b000) => RegRegOp::Mulw,
                (FUNCT7_MULDIV, 0b100) => RegRegOp::Divw,
                (FUNCT7_MULDIV, 0b101) => RegRegOp::Divuw,
                (FUNCT7_MULDIV, 0b110) => RegRegOp::Remw,
                (FUNCT7_MULDIV, 0b111) => RegRegOp::Remuw,
                _ => return Err(DecodeError::InvalidEncoding(instr)),
            };
            Ok(Instr::RegReg {
                op,
                dest: rd(instr),
                src1: rs1(instr),
                src2: rs2(instr),
            })
        }
        OP_MISC_MEM => match funct3(instr) {
            0b000 => Ok(Instr::Fence),
            0b001 => Ok(Instr::FenceI),
            _ => Err(DecodeError::InvalidEncoding(instr)),
        },
        OP_SYSTEM => {
            let op = match funct3(instr) {
                0b000 => {
                    // The privileged instructions are fully
                    // determined encodings
                    return match instr {
                        0x0000_0073 => Ok(Instr::Ecall),
                        0x0010_0073 => Ok(Instr::Ebreak),
                        0x3020_0073 => Ok(Instr::Mret),
                        _ => Err(DecodeError::InvalidEncoding(instr)),
                    };
                }
                0b001 => CsrOp::Csrrw,
                0b010 => CsrOp::Csrrs,
                0b011 => CsrOp::Csrrc,
                0b101 => CsrOp::Csrrwi,
                0b110 => CsrOp::Csrrsi,
                0b111 => CsrOp::Csrrci,
                _ => return Err(DecodeError::InvalidEncoding(instr)),
            };
            Ok(Instr::Csr {
                op,
                dest: rd(instr),
                source: rs1(instr),
                csr: extract_field(instr, 31, 20) as u16,
            })
        }
        op => Err(DecodeError::InvalidOpcode(op)),
    }
}

/// Accept a decoded value only in 64-bit mode
fn rv64<T>(value: T, instr: u32, xlen: Xlen) -> Result<T, DecodeError> {
    match xlen {
        Xlen::Xlen64 => Ok(value),
        Xlen::Xlen32 => Err(DecodeError::Rv64Only(instr)),
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::encode::*;

    #[test]
    fn check_decode_lui() {
        let instr = decode(lui(2, 53), Xlen::Xlen32).unwrap();
        assert_eq!(
            instr,
            Instr::Lui {
                dest: 2,
                imm: 53 << 12
            }
        );
    }

    #[test]
    fn check_decode_lui_negative_immediate() {
        let instr = decode(lui(2, 0xfffff), Xlen::Xlen32).unwrap();
        assert_eq!(instr, Instr::Lui { dest: 2, imm: -4096 });
    }

    #[test]
    fn check_decode_addi_sign_extension() {
        let instr = decode(addi(1, 0, -1), Xlen::Xlen32).unwrap();
        assert_eq!(
            instr,
            Instr::RegImm {
                op: RegImmOp::Addi,
                dest: 1,
                src: 0,
                imm: -1
            }
        );
    }

    #[test]
    fn check_decode_jal_offset() {
        let instr = decode(jal(4, -4), Xlen::Xlen32).unwrap();
        assert_eq!(instr, Instr::Jal { dest: 4, offset: -4 });
        let instr = decode(jal(0, 0x42), Xlen::Xlen32).unwrap();
        assert_eq!(instr, Instr::Jal { dest: 0, offset: 0x42 });
    }

    #[test]
    fn check_decode_branch_offset() {
        let instr = decode(bne(1, 2, 8), Xlen::Xlen32).unwrap();
        assert_eq!(
            instr,
            Instr::Branch {
                cond: BranchCond::Bne,
                src1: 1,
                src2: 2,
                offset: 8
            }
        );
        let instr = decode(beq(5, 6, -16), Xlen::Xlen32).unwrap();
        assert_eq!(
            instr,
            Instr::Branch {
                cond: BranchCond::Beq,
                src1: 5,
                src2: 6,
                offset: -16
            }
        );
    }

    #[test]
    fn check_decode_store_offset() {
        let instr = decode(sw(1, 2, -15), Xlen::Xlen32).unwrap();
        assert_eq!(
            instr,
            Instr::Store {
                width: StoreWidth::Sw,
                src: 1,
                base: 2,
                offset: -15
            }
        );
    }

    #[test]
    fn check_decode_shifts() {
        let instr = decode(slli(1, 2, 31), Xlen::Xlen32).unwrap();
        assert_eq!(
            instr,
            Instr::RegImm {
                op: RegImmOp::Slli,
                dest: 1,
                src: 2,
                imm: 31
            }
        );
        let instr = decode(srai(1, 2, 4), Xlen::Xlen32).unwrap();
        assert_eq!(
            instr,
            Instr::RegImm {
                op: RegImmOp::Srai,
                dest: 1,
                src: 2,
                imm: 4
            }
        );
    }

    #[test]
    fn check_64bit_shamt_rejected_in_32bit_mode() {
        // slli x1, x2, 32 has shamt bit 5 set, which is reserved in
        // 32-bit mode but fine in 64-bit mode
        let encoding = slli(1, 2, 32);
        assert!(decode(encoding, Xlen::Xlen32).is_err());
        assert_eq!(
            decode(encoding, Xlen::Xlen64).unwrap(),
            Instr::RegImm {
                op: RegImmOp::Slli,
                dest: 1,
                src: 2,
                imm: 32
            }
        );
    }

    #[test]
    fn check_decode_muldiv() {
        let instr = decode(div(3, 1, 2), Xlen::Xlen32).unwrap();
        assert_eq!(
            instr,
            Instr::RegReg {
                op: RegRegOp::Div,
                dest: 3,
                src1: 1,
                src2: 2
            }
        );
        let instr = decode(mulhu(3, 1, 2), Xlen::Xlen32).unwrap();
        assert_eq!(
            instr,
            Instr::RegReg {
                op: RegRegOp::Mulhu,
                dest: 3,
                src1: 1,
                src2: 2
            }
        );
    }

    #[test]
    fn check_rv64_only_encodings() {
        for encoding in [ld(1, 2, 0), sd(1, 2, 0), addiw(1, 2, 1), addw(1, 2, 3)] {
            assert!(matches!(
                decode(encoding, Xlen::Xlen32),
                Err(DecodeError::Rv64Only(_))
            ));
            assert!(decode(encoding, Xlen::Xlen64).is_ok());
        }
    }

    #[test]
    fn check_decode_system() {
        assert_eq!(decode(ecall(), Xlen::Xlen32).unwrap(), Instr::Ecall);
        assert_eq!(decode(ebreak(), Xlen::Xlen32).unwrap(), Instr::Ebreak);
        assert_eq!(decode(mret(), Xlen::Xlen32).unwrap(), Instr::Mret);
        // wfi is not implemented
        assert!(decode(0x1050_0073, Xlen::Xlen32).is_err());
    }

    #[test]
    fn check_decode_csr() {
        let instr = decode(csrrs(3, 0x340, 0), Xlen::Xlen32).unwrap();
        assert_eq!(
            instr,
            Instr::Csr {
                op: CsrOp::Csrrs,
                dest: 3,
                source: 0,
                csr: 0x340
            }
        );
        let instr = decode(csrrwi(1, 0x305, 21), Xlen::Xlen32).unwrap();
        assert_eq!(
            instr,
            Instr::Csr {
                op: CsrOp::Csrrwi,
                dest: 1,
                source: 21,
                csr: 0x305
            }
        );
    }

    #[test]
    fn check_invalid_opcode() {
        assert_eq!(
            decode(0xffff_ffff, Xlen::Xlen32),
            Err(DecodeError::InvalidOpcode(0x7f))
        );
    }
}

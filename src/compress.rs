//! Expansion of compressed (C extension) instructions
//!
//! Every 16-bit instruction maps to exactly one 32-bit instruction
//! with identical observable behaviour, so the expander re-encodes
//! each recognised form using the ordinary instruction encoders and
//! lets the 32-bit decoder do the rest. Defined in chapter 16 of the
//! unprivileged specification version 20191213.
//!
//! The low two bits of a compressed instruction select one of three
//! quadrants (0b11 would mean the instruction is not compressed), and
//! bits 15:13 select the function within the quadrant. Reserved
//! sub-cases (a zero immediate in c.addi4spn, rd=x0 in c.lwsp, rs1=x0
//! in c.jr, and so on) fail expansion, which the hart reports as an
//! illegal instruction. Encodings reserved for the floating-point
//! extensions are not valid on this hart.
//!
//! Compressed registers (rd', rs1', rs2') are 3-bit fields addressing
//! x8-x15.

use thiserror::Error;

use crate::encode;
use crate::utils::{extract_field, sign_extend};
use crate::Xlen;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompressedError {
    #[error("invalid or unimplemented compressed encoding 0x{0:04x}")]
    InvalidEncoding(u16),
    #[error("compressed encoding 0x{0:04x} is reserved")]
    ReservedEncoding(u16),
}

/// Map a 3-bit compressed register field to the full register index
fn compressed_reg(field: u32) -> u32 {
    8 + (field & 0b111)
}

/// rd/rs1 field of the wide-register formats (bits 11:7)
fn rd_full(instr: u32) -> u32 {
    extract_field(instr, 11, 7)
}

/// rs2 field of the wide-register formats (bits 6:2)
fn rs2_full(instr: u32) -> u32 {
    extract_field(instr, 6, 2)
}

/// rd'/rs2' field (bits 4:2)
fn rd_prime(instr: u32) -> u32 {
    compressed_reg(extract_field(instr, 4, 2))
}

/// rs1' field (bits 9:7)
fn rs1_prime(instr: u32) -> u32 {
    compressed_reg(extract_field(instr, 9, 7))
}

/// The 6-bit immediate of the CI format (bit 12, then bits 6:2),
/// sign extended
fn imm_ci(instr: u32) -> i32 {
    let imm = (extract_field(instr, 12, 12) << 5) | extract_field(instr, 6, 2);
    sign_extend(imm.into(), 5) as i32
}

/// The shift amount of c.slli/c.srli/c.srai (bit 12 is shamt[5])
fn shamt_ci(instr: u32) -> u32 {
    (extract_field(instr, 12, 12) << 5) | extract_field(instr, 6, 2)
}

/// Expand a 16-bit compressed instruction to its 32-bit equivalent
pub fn expand(instr: u16, xlen: Xlen) -> Result<u32, CompressedError> {
    let i = u32::from(instr);
    let funct3 = extract_field(i, 15, 13);
    match extract_field(i, 1, 0) {
        0b00 => expand_quadrant0(instr, i, funct3, xlen),
        0b01 => expand_quadrant1(instr, i, funct3, xlen),
        0b10 => expand_quadrant2(instr, i, funct3, xlen),
        _ => Err(CompressedError::InvalidEncoding(instr)),
    }
}

fn expand_quadrant0(
    instr: u16,
    i: u32,
    funct3: u32,
    xlen: Xlen,
) -> Result<u32, CompressedError> {
    match funct3 {
        // c.addi4spn rd', nzuimm -> addi rd', x2, nzuimm
        0b000 => {
            let nzuimm = (extract_field(i, 10, 7) << 6)
                | (extract_field(i, 12, 11) << 4)
                | (extract_field(i, 5, 5) << 3)
                | (extract_field(i, 6, 6) << 2);
            if nzuimm == 0 {
                return Err(CompressedError::ReservedEncoding(instr));
            }
            Ok(encode::addi(rd_prime(i), 2, nzuimm as i32))
        }
        // c.lw rd', uimm(rs1') -> lw
        0b010 => {
            let uimm = (extract_field(i, 5, 5) << 6)
                | (extract_field(i, 12, 10) << 3)
                | (extract_field(i, 6, 6) << 2);
            Ok(encode::lw(rd_prime(i), rs1_prime(i), uimm as i32))
        }
        // c.ld rd', uimm(rs1') -> ld (the RV32 form in this slot is
        // c.flw, which needs the F extension)
        0b011 => match xlen {
            Xlen::Xlen64 => {
                let uimm =
                    (extract_field(i, 6, 5) << 6) | (extract_field(i, 12, 10) << 3);
                Ok(encode::ld(rd_prime(i), rs1_prime(i), uimm as i32))
            }
            Xlen::Xlen32 => Err(CompressedError::InvalidEncoding(instr)),
        },
        // c.sw rs2', uimm(rs1') -> sw
        0b110 => {
            let uimm = (extract_field(i, 5, 5) << 6)
                | (extract_field(i, 12, 10) << 3)
                | (extract_field(i, 6, 6) << 2);
            Ok(encode::sw(rd_prime(i), rs1_prime(i), uimm as i32))
        }
        // c.sd rs2', uimm(rs1') -> sd
        0b111 => match xlen {
            Xlen::Xlen64 => {
                let uimm =
                    (extract_field(i, 6, 5) << 6) | (extract_field(i, 12, 10) << 3);
                Ok(encode::sd(rd_prime(i), rs1_prime(i), uimm as i32))
            }
            Xlen::Xlen32 => Err(CompressedError::InvalidEncoding(instr)),
        },
        // 100 is reserved; 001 and 101 are c.fld/c.fsd
        _ => Err(CompressedError::InvalidEncoding(instr)),
    }
}

fn expand_quadrant1(
    instr: u16,
    i: u32,
    funct3: u32,
    xlen: Xlen,
) -> Result<u32, CompressedError> {
    match funct3 {
        // c.nop / c.addi rd, nzimm -> addi rd, rd, imm. The nzimm==0
        // cases are hints, which retire with no effect, exactly what
        // the expansion does.
        0b000 => {
            let rd = rd_full(i);
            Ok(encode::addi(rd, rd, imm_ci(i)))
        }
        // RV32: c.jal offset -> jal x1, offset
        // RV64: c.addiw rd, imm -> addiw rd, rd, imm (rd=x0 reserved)
        0b001 => match xlen {
            Xlen::Xlen32 => Ok(encode::jal(1, imm_cj(i))),
            Xlen::Xlen64 => {
                let rd = rd_full(i);
                if rd == 0 {
                    return Err(CompressedError::ReservedEncoding(instr));
                }
                Ok(encode::addiw(rd, rd, imm_ci(i)))
            }
        },
        // c.li rd, imm -> addi rd, x0, imm
        0b010 => Ok(encode::addi(rd_full(i), 0, imm_ci(i))),
        0b011 => {
            let rd = rd_full(i);
            if rd == 2 {
                // c.addi16sp nzimm -> addi x2, x2, nzimm
                let nzimm = (extract_field(i, 12, 12) << 9)
                    | (extract_field(i, 4, 3) << 7)
                    | (extract_field(i, 5, 5) << 6)
                    | (extract_field(i, 2, 2) << 5)
                    | (extract_field(i, 6, 6) << 4);
                let nzimm = sign_extend(nzimm.into(), 9) as i32;
                if nzimm == 0 {
                    return Err(CompressedError::ReservedEncoding(instr));
                }
                Ok(encode::addi(2, 2, nzimm))
            } else {
                // c.lui rd, nzimm -> lui rd, nzimm (nzimm==0 reserved)
                let imm = imm_ci(i);
                if imm == 0 {
                    return Err(CompressedError::ReservedEncoding(instr));
                }
                Ok(encode::lui(rd, imm as u32))
            }
        }
        0b100 => expand_quadrant1_alu(instr, i, xlen),
        // c.j offset -> jal x0, offset
        0b101 => Ok(encode::jal(0, imm_cj(i))),
        // c.beqz rs1', offset -> beq rs1', x0, offset
        0b110 => Ok(encode::beq(rs1_prime(i), 0, imm_cb(i))),
        // c.bnez rs1', offset -> bne rs1', x0, offset
        0b111 => Ok(encode::bne(rs1_prime(i), 0, imm_cb(i))),
        _ => unreachable!("funct3 is a 3-bit field"),
    }
}

/// The quadrant 1 ALU group (funct3 = 100), selected by bits 11:10
fn expand_quadrant1_alu(instr: u16, i: u32, xlen: Xlen) -> Result<u32, CompressedError> {
    let rd = rs1_prime(i);
    match extract_field(i, 11, 10) {
        // c.srli / c.srai rd', shamt. A shift amount with bit 5 set
        // is reserved in 32-bit mode.
        0b00 | 0b01 => {
            let shamt = shamt_ci(i);
            if xlen == Xlen::Xlen32 && shamt >= 32 {
                return Err(CompressedError::ReservedEncoding(instr));
            }
            if extract_field(i, 10, 10) == 0 {
                Ok(encode::srli(rd, rd, shamt))
            } else {
                Ok(encode::srai(rd, rd, shamt))
            }
        }
        // c.andi rd', imm
        0b10 => Ok(encode::andi(rd, rd, imm_ci(i))),
        0b11 => {
            let rs2 = rd_prime(i);
            match (extract_field(i, 12, 12), extract_field(i, 6, 5)) {
                (0, 0b00) => Ok(encode::sub(rd, rd, rs2)),
                (0, 0b01) => Ok(encode::xor(rd, rd, rs2)),
                (0, 0b10) => Ok(encode::or(rd, rd, rs2)),
                (0, 0b11) => Ok(encode::and(rd, rd, rs2)),
                (1, 0b00) if xlen == Xlen::Xlen64 => Ok(encode::subw(rd, rd, rs2)),
                (1, 0b01) if xlen == Xlen::Xlen64 => Ok(encode::addw(rd, rd, rs2)),
                _ => Err(CompressedError::ReservedEncoding(instr)),
            }
        }
        _ => unreachable!("two-bit field"),
    }
}

fn expand_quadrant2(
    instr: u16,
    i: u32,
    funct3: u32,
    xlen: Xlen,
) -> Result<u32, CompressedError> {
    match funct3 {
        // c.slli rd, shamt
        0b000 => {
            let shamt = shamt_ci(i);
            if xlen == Xlen::Xlen32 && shamt >= 32 {
                return Err(CompressedError::ReservedEncoding(instr));
            }
            let rd = rd_full(i);
            Ok(encode::slli(rd, rd, shamt))
        }
        // c.lwsp rd, uimm -> lw rd, uimm(x2) (rd=x0 reserved)
        0b010 => {
            let rd = rd_full(i);
            if rd == 0 {
                return Err(CompressedError::ReservedEncoding(instr));
            }
            let uimm = (extract_field(i, 3, 2) << 6)
                | (extract_field(i, 12, 12) << 5)
                | (extract_field(i, 6, 4) << 2);
            Ok(encode::lw(rd, 2, uimm as i32))
        }
        // c.ldsp rd, uimm -> ld rd, uimm(x2)
        0b011 => match xlen {
            Xlen::Xlen64 => {
                let rd = rd_full(i);
                if rd == 0 {
                    return Err(CompressedError::ReservedEncoding(instr));
                }
                let uimm = (extract_field(i, 4, 2) << 6)
                    | (extract_field(i, 12, 12) << 5)
                    | (extract_field(i, 6, 5) << 3);
                Ok(encode::ld(rd, 2, uimm as i32))
            }
            Xlen::Xlen32 => Err(CompressedError::InvalidEncoding(instr)),
        },
        0b100 => {
            let rd = rd_full(i);
            let rs2 = rs2_full(i);
            match (extract_field(i, 12, 12), rd, rs2) {
                // c.jr rs1 -> jalr x0, rs1, 0 (rs1=x0 reserved)
                (0, 0, 0) => Err(CompressedError::ReservedEncoding(instr)),
                (0, rs1, 0) => Ok(encode::jalr(0, rs1, 0)),
                // c.mv rd, rs2 -> add rd, x0, rs2
                (0, rd, rs2) => Ok(encode::add(rd, 0, rs2)),
                // c.ebreak
                (1, 0, 0) => Ok(encode::ebreak()),
                // c.jalr rs1 -> jalr x1, rs1, 0
                (1, rs1, 0) => Ok(encode::jalr(1, rs1, 0)),
                // c.add rd, rs2 -> add rd, rd, rs2
                (1, rd, rs2) => Ok(encode::add(rd, rd, rs2)),
                _ => unreachable!("single-bit field"),
            }
        }
        // c.swsp rs2, uimm -> sw rs2, uimm(x2)
        0b110 => {
            let uimm = (extract_field(i, 8, 7) << 6) | (extract_field(i, 12, 9) << 2);
            Ok(encode::sw(rs2_full(i), 2, uimm as i32))
        }
        // c.sdsp rs2, uimm -> sd rs2, uimm(x2)
        0b111 => match xlen {
            Xlen::Xlen64 => {
                let uimm =
                    (extract_field(i, 9, 7) << 6) | (extract_field(i, 12, 10) << 3);
                Ok(encode::sd(rs2_full(i), 2, uimm as i32))
            }
            Xlen::Xlen32 => Err(CompressedError::InvalidEncoding(instr)),
        },
        // 001, 101 and (in 32-bit mode) 011 and 111 are the
        // floating-point stack loads and stores
        _ => Err(CompressedError::InvalidEncoding(instr)),
    }
}

/// The c.j/c.jal offset (a scrambled 12-bit multiple of 2), sign
/// extended
fn imm_cj(i: u32) -> i32 {
    let imm = (extract_field(i, 12, 12) << 11)
        | (extract_field(i, 8, 8) << 10)
        | (extract_field(i, 10, 9) << 8)
        | (extract_field(i, 6, 6) << 7)
        | (extract_field(i, 7, 7) << 6)
        | (extract_field(i, 2, 2) << 5)
        | (extract_field(i, 11, 11) << 4)
        | (extract_field(i, 5, 3) << 1);
    sign_extend(imm.into(), 11) as i32
}

/// The c.beqz/c.bnez offset (a scrambled 9-bit multiple of 2), sign
/// extended
fn imm_cb(i: u32) -> i32 {
    let imm = (extract_field(i, 12, 12) << 8)
        | (extract_field(i, 6, 5) << 6)
        | (extract_field(i, 2, 2) << 5)
        | (extract_field(i, 11, 10) << 3)
        | (extract_field(i, 4, 3) << 1);
    sign_extend(imm.into(), 8) as i32
}

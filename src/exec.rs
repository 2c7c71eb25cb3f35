//! Execution of decoded instructions
//!
//! A single dispatcher performs an exhaustive match over the decoded
//! instruction sum type. Instruction behaviour is defined in the
//! RISC-V unprivileged specification version 20191213 (chapters 2, 7
//! and 9 for the base integer instructions, the M extension and the
//! Zicsr extension).
//!
//! The dispatcher is entered with the program counter already
//! advanced past the instruction, so the pc is the link value for
//! jumps and is only written by taken branches, jumps and traps.
//! All arithmetic is two's-complement modulo the register width:
//! values are computed in 64 bits and truncated on write-back.
//!
//! Faults are returned as an exception cause plus trap value; the
//! hart converts them into a machine-mode trap. No instruction here
//! modifies architectural state before its fault checks have passed
//! (in particular, a misaligned jump target leaves both the pc and
//! the link register unwritten).

use crate::hart::Hart;
use crate::instr::{BranchCond, CsrOp, Instr, LoadWidth, RegImmOp, RegRegOp, StoreWidth};
use crate::memory::{MemoryError, Wordsize};
use crate::trap::{Exception, Fault};
use crate::utils::{sign_extend, sign_extend_word};
use crate::{PrivilegeMode, Xlen};

/// Execute one decoded instruction on the hart
pub fn execute(hart: &mut Hart, instr: Instr) -> Result<(), Fault> {
    match instr {
        Instr::Lui { dest, imm } => {
            hart.set_x(dest, imm as u64);
            Ok(())
        }
        Instr::Auipc { dest, imm } => {
            let value = hart.curr_pc().wrapping_add(imm as u64);
            hart.set_x(dest, value);
            Ok(())
        }
        Instr::Jal { dest, offset } => {
            let link = hart.pc();
            let target = hart.curr_pc().wrapping_add(offset as u64);
            jump_to(hart, target)?;
            hart.set_x(dest, link);
            Ok(())
        }
        Instr::Jalr { dest, base, offset } => {
            let link = hart.pc();
            // The least significant bit of the computed target is
            // cleared, so the target is always 2-byte aligned
            let target = hart.x(base).wrapping_add(offset as u64) & !1;
            jump_to(hart, target)?;
            hart.set_x(dest, link);
            Ok(())
        }
        Instr::Branch {
            cond,
            src1,
            src2,
            offset,
        } => {
            let src1 = hart.x(src1);
            let src2 = hart.x(src2);
            let xlen = hart.xlen();
            let taken = match cond {
                BranchCond::Beq => src1 == src2,
                BranchCond::Bne => src1 != src2,
                BranchCond::Blt => xlen.to_signed(src1) < xlen.to_signed(src2),
                BranchCond::Bge => xlen.to_signed(src1) >= xlen.to_signed(src2),
                BranchCond::Bltu => src1 < src2,
                BranchCond::Bgeu => src1 >= src2,
            };
            if taken {
                let target = hart.curr_pc().wrapping_add(offset as u64);
                jump_to(hart, target)?;
            }
            Ok(())
        }
        Instr::Load {
            width,
            dest,
            base,
            offset,
        } => {
            let addr = hart.xlen().wrap(hart.x(base).wrapping_add(offset as u64));
            let value = match width {
                LoadWidth::Lb => {
                    sign_extend(load(hart, addr, Wordsize::Byte)?, 7)
                }
                LoadWidth::Lh => {
                    sign_extend(load(hart, addr, Wordsize::Halfword)?, 15)
                }
                LoadWidth::Lw => {
                    sign_extend(load(hart, addr, Wordsize::Word)?, 31)
                }
                LoadWidth::Lbu => load(hart, addr, Wordsize::Byte)?,
                LoadWidth::Lhu => load(hart, addr, Wordsize::Halfword)?,
                LoadWidth::Lwu => load(hart, addr, Wordsize::Word)?,
                LoadWidth::Ld => load(hart, addr, Wordsize::Doubleword)?,
            };
            hart.set_x(dest, value);
            Ok(())
        }
        Instr::Store {
            width,
            src,
            base,
            offset,
        } => {
            let addr = hart.xlen().wrap(hart.x(base).wrapping_add(offset as u64));
            let value = hart.x(src);
            let word_size = match width {
                StoreWidth::Sb => Wordsize::Byte,
                StoreWidth::Sh => Wordsize::Halfword,
                StoreWidth::Sw => Wordsize::Word,
                StoreWidth::Sd => Wordsize::Doubleword,
            };
            hart.memory
                .write(addr, value, word_size)
                .map_err(|e| store_fault(e, addr))?;
            Ok(())
        }
        Instr::RegImm { op, dest, src, imm } => {
            let value = reg_imm_op(hart.xlen(), op, hart.x(src), imm);
            hart.set_x(dest, value);
            Ok(())
        }
        Instr::RegReg {
            op,
            dest,
            src1,
            src2,
        } => {
            let value = reg_reg_op(hart.xlen(), op, hart.x(src1), hart.x(src2));
            hart.set_x(dest, value);
            Ok(())
        }
        Instr::Csr {
            op,
            dest,
            source,
            csr,
        } => execute_csr(hart, op, dest, source, csr),
        Instr::Ecall => {
            let cause = match hart.privilege() {
                PrivilegeMode::User => Exception::UmodeEcall,
                PrivilegeMode::Supervisor => Exception::SmodeEcall,
                PrivilegeMode::Machine => Exception::MmodeEcall,
            };
            Err(Fault::new(cause, 0))
        }
        Instr::Ebreak => Err(Fault::new(Exception::Breakpoint, 0)),
        Instr::Mret => {
            if hart.privilege() != PrivilegeMode::Machine {
                return Err(Fault::new(Exception::IllegalInstruction, 0));
            }
            hart.trap_return();
            Ok(())
        }
        // A single in-order hart with no instruction cache retires
        // fences without further effect
        Instr::Fence | Instr::FenceI => Ok(()),
    }
}

/// Jump to a target address, checking 2-byte alignment (IALIGN=16
/// with the C extension). On a misaligned target the pc is not
/// written and the target goes to mtval.
fn jump_to(hart: &mut Hart, target: u64) -> Result<(), Fault> {
    let target = hart.xlen().wrap(target);
    if target % 2 != 0 {
        return Err(Fault::new(Exception::InstructionAddressMisaligned, target));
    }
    hart.set_pc(target);
    Ok(())
}

fn load(hart: &Hart, addr: u64, word_size: Wordsize) -> Result<u64, Fault> {
    hart.memory.read(addr, word_size).map_err(|e| match e {
        MemoryError::OutOfRange(_) => Fault::new(Exception::LoadAccessFault, addr),
        MemoryError::Misaligned(_) => Fault::new(Exception::LoadAddressMisaligned, addr),
    })
}

fn store_fault(e: MemoryError, addr: u64) -> Fault {
    match e {
        MemoryError::OutOfRange(_) => Fault::new(Exception::StoreAccessFault, addr),
        MemoryError::Misaligned(_) => Fault::new(Exception::StoreAddressMisaligned, addr),
    }
}

/// The register-immediate operations. Shift operations carry their
/// shift amount in imm, already validated by the decoder.
fn reg_imm_op(xlen: Xlen, op: RegImmOp, src: u64, imm: i64) -> u64 {
    match op {
        RegImmOp::Addi => xlen.wrap(src.wrapping_add(imm as u64)),
        RegImmOp::Slti => (xlen.to_signed(src) < imm) as u64,
        RegImmOp::Sltiu => (src < xlen.wrap(imm as u64)) as u64,
        RegImmOp::Xori => xlen.wrap(src ^ imm as u64),
        RegImmOp::Ori => xlen.wrap(src | imm as u64),
        RegImmOp::Andi => xlen.wrap(src & imm as u64),
        RegImmOp::Slli => xlen.wrap(src << imm),
        RegImmOp::Srli => src >> imm,
        RegImmOp::Srai => xlen.wrap((xlen.to_signed(src) >> imm) as u64),
        RegImmOp::Addiw => sign_extend_word((src as u32).wrapping_add(imm as u32)),
        RegImmOp::Slliw => sign_extend_word((src as u32) << imm),
        RegImmOp::Srliw => sign_extend_word((src as u32) >> imm),
        RegImmOp::Sraiw => sign_extend_word(((src as u32 as i32) >> imm) as u32),
    }
}

/// The register-register operations, including the M extension
fn reg_reg_op(xlen: Xlen, op: RegRegOp, src1: u64, src2: u64) -> u64 {
    match op {
        RegRegOp::Add => xlen.wrap(src1.wrapping_add(src2)),
        RegRegOp::Sub => xlen.wrap(src1.wrapping_sub(src2)),
        RegRegOp::Sll => xlen.wrap(src1 << (src2 as u32 & xlen.shamt_mask())),
        RegRegOp::Slt => (xlen.to_signed(src1) < xlen.to_signed(src2)) as u64,
        RegRegOp::Sltu => (src1 < src2) as u64,
        RegRegOp::Xor => src1 ^ src2,
        RegRegOp::Srl => src1 >> (src2 as u32 & xlen.shamt_mask()),
        RegRegOp::Sra => {
            xlen.wrap((xlen.to_signed(src1) >> (src2 as u32 & xlen.shamt_mask())) as u64)
        }
        RegRegOp::Or => src1 | src2,
        RegRegOp::And => src1 & src2,
        RegRegOp::Mul => xlen.wrap(src1.wrapping_mul(src2)),
        RegRegOp::Mulh => mulh(xlen, src1, src2),
        RegRegOp::Mulhsu => mulhsu(xlen, src1, src2),
        RegRegOp::Mulhu => mulhu(xlen, src1, src2),
        RegRegOp::Div => div(xlen, src1, src2),
        RegRegOp::Divu => divu(xlen, src1, src2),
        RegRegOp::Rem => rem(xlen, src1, src2),
        RegRegOp::Remu => remu(xlen, src1, src2),
        RegRegOp::Addw => sign_extend_word((src1 as u32).wrapping_add(src2 as u32)),
        RegRegOp::Subw => sign_extend_word((src1 as u32).wrapping_sub(src2 as u32)),
        RegRegOp::Sllw => sign_extend_word((src1 as u32) << (src2 as u32 & 0x1f)),
        RegRegOp::Srlw => sign_extend_word((src1 as u32) >> (src2 as u32 & 0x1f)),
        RegRegOp::Sraw => {
            sign_extend_word(((src1 as u32 as i32) >> (src2 as u32 & 0x1f)) as u32)
        }
        RegRegOp::Mulw => sign_extend_word((src1 as u32).wrapping_mul(src2 as u32)),
        RegRegOp::Divw => sign_extend_word(divw(src1 as u32, src2 as u32)),
        RegRegOp::Divuw => sign_extend_word(divuw(src1 as u32, src2 as u32)),
        RegRegOp::Remw => sign_extend_word(remw(src1 as u32, src2 as u32)),
        RegRegOp::Remuw => sign_extend_word(remuw(src1 as u32, src2 as u32)),
    }
}

/// High half of the signed x signed product. In 32-bit mode the
/// product fits in an i64; in 64-bit mode a 128-bit intermediate is
/// needed.
fn mulh(xlen: Xlen, src1: u64, src2: u64) -> u64 {
    match xlen {
        Xlen::Xlen32 => {
            let product = xlen.to_signed(src1) * xlen.to_signed(src2);
            xlen.wrap((product >> 32) as u64)
        }
        Xlen::Xlen64 => {
            let product = (src1 as i64 as i128) * (src2 as i64 as i128);
            (product >> 64) as u64
        }
    }
}

/// High half of the signed x unsigned product
fn mulhsu(xlen: Xlen, src1: u64, src2: u64) -> u64 {
    match xlen {
        Xlen::Xlen32 => {
            let product = xlen.to_signed(src1) * (src2 as i64);
            xlen.wrap((product >> 32) as u64)
        }
        Xlen::Xlen64 => {
            let product = (src1 as i64 as i128) * (src2 as i128);
            (product >> 64) as u64
        }
    }
}

/// High half of the unsigned x unsigned product
fn mulhu(xlen: Xlen, src1: u64, src2: u64) -> u64 {
    match xlen {
        Xlen::Xlen32 => (src1 * src2) >> 32,
        Xlen::Xlen64 => (((src1 as u128) * (src2 as u128)) >> 64) as u64,
    }
}

/// Signed division. Division by zero returns all ones and overflow
/// (the most negative value divided by -1) returns the dividend;
/// neither traps (unprivileged spec section 7.2).
fn div(xlen: Xlen, src1: u64, src2: u64) -> u64 {
    let dividend = xlen.to_signed(src1);
    let divisor = xlen.to_signed(src2);
    if divisor == 0 {
        xlen.wrap(u64::MAX)
    } else if dividend == xlen.min_signed() && divisor == -1 {
        src1
    } else {
        xlen.wrap(dividend.wrapping_div(divisor) as u64)
    }
}

/// Unsigned division; division by zero returns all ones
fn divu(xlen: Xlen, src1: u64, src2: u64) -> u64 {
    if src2 == 0 {
        xlen.wrap(u64::MAX)
    } else {
        src1 / src2
    }
}

/// Signed remainder. Division by zero returns the dividend and the
/// overflow case returns zero.
fn rem(xlen: Xlen, src1: u64, src2: u64) -> u64 {
    let dividend = xlen.to_signed(src1);
    let divisor = xlen.to_signed(src2);
    if divisor == 0 {
        src1
    } else if dividend == xlen.min_signed() && divisor == -1 {
        0
    } else {
        xlen.wrap(dividend.wrapping_rem(divisor) as u64)
    }
}

/// Unsigned remainder; division by zero returns the dividend
fn remu(_xlen: Xlen, src1: u64, src2: u64) -> u64 {
    if src2 == 0 {
        src1
    } else {
        src1 % src2
    }
}

fn divw(src1: u32, src2: u32) -> u32 {
    let dividend = src1 as i32;
    let divisor = src2 as i32;
    if divisor == 0 {
        u32::MAX
    } else if dividend == i32::MIN && divisor == -1 {
        src1
    } else {
        dividend.wrapping_div(divisor) as u32
    }
}

fn divuw(src1: u32, src2: u32) -> u32 {
    if src2 == 0 {
        u32::MAX
    } else {
        src1 / src2
    }
}

fn remw(src1: u32, src2: u32) -> u32 {
    let dividend = src1 as i32;
    let divisor = src2 as i32;
    if divisor == 0 {
        src1
    } else if dividend == i32::MIN && divisor == -1 {
        0
    } else {
        dividend.wrapping_rem(divisor) as u32
    }
}

fn remuw(src1: u32, src2: u32) -> u32 {
    if src2 == 0 {
        src1
    } else {
        src1 % src2
    }
}

/// The Zicsr read/modify/write operations
///
/// The read is skipped for csrrw with rd=x0, and the write is skipped
/// for the set/clear forms when the source operand is x0 (or a zero
/// immediate), so those cases have no side effects beyond the read.
/// Any CSR access failure becomes an illegal instruction exception.
fn execute_csr(hart: &mut Hart, op: CsrOp, dest: u8, source: u8, csr: u16) -> Result<(), Fault> {
    let illegal = |_| Fault::new(Exception::IllegalInstruction, 0);
    let privilege = hart.privilege();
    let operand = match op {
        CsrOp::Csrrw | CsrOp::Csrrs | CsrOp::Csrrc => hart.x(source),
        CsrOp::Csrrwi | CsrOp::Csrrsi | CsrOp::Csrrci => source.into(),
    };
    match op {
        CsrOp::Csrrw | CsrOp::Csrrwi => {
            // Cannot combine the read with the write: the read is
            // suppressed for rd=x0, but the write must still be
            // checked and performed
            let old = if dest != 0 {
                Some(hart.csrs.read(csr, privilege).map_err(illegal)?)
            } else {
                None
            };
            hart.csrs.write(csr, privilege, operand).map_err(illegal)?;
            if let Some(old) = old {
                hart.set_x(dest, old);
            }
        }
        CsrOp::Csrrs | CsrOp::Csrrsi => {
            let old = hart.csrs.read(csr, privilege).map_err(illegal)?;
            if source != 0 {
                hart.csrs
                    .write(csr, privilege, old | operand)
                    .map_err(illegal)?;
            }
            hart.set_x(dest, old);
        }
        CsrOp::Csrrc | CsrOp::Csrrci => {
            let old = hart.csrs.read(csr, privilege).map_err(illegal)?;
            if source != 0 {
                hart.csrs
                    .write(csr, privilege, old & !operand)
                    .map_err(illegal)?;
            }
            hart.set_x(dest, old);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {

    use super::*;

    // Direct unit tests of the arithmetic helpers; full
    // fetch/decode/execute behaviour is tested through the hart

    #[test]
    fn check_mulh_32() {
        // -1 * -1 = 1, high word 0
        assert_eq!(mulh(Xlen::Xlen32, 0xffff_ffff, 0xffff_ffff), 0);
        // 0x80000000 * 0x80000000 = 2^62, high word 0x40000000
        assert_eq!(mulh(Xlen::Xlen32, 0x8000_0000, 0x8000_0000), 0x4000_0000);
    }

    #[test]
    fn check_mulh_64() {
        assert_eq!(mulh(Xlen::Xlen64, u64::MAX, u64::MAX), 0);
        assert_eq!(
            mulh(Xlen::Xlen64, 0x8000_0000_0000_0000, 0x8000_0000_0000_0000),
            0x4000_0000_0000_0000
        );
    }

    #[test]
    fn check_mulhsu() {
        // -1 (signed) * 0xffffffff (unsigned): product is
        // -(2^32 - 1), whose high word is 0xffffffff
        assert_eq!(
            mulhsu(Xlen::Xlen32, 0xffff_ffff, 0xffff_ffff),
            0xffff_ffff
        );
        assert_eq!(mulhsu(Xlen::Xlen32, 2, 0x8000_0000), 1);
    }

    #[test]
    fn check_mulhu() {
        assert_eq!(
            mulhu(Xlen::Xlen32, 0xffff_ffff, 0xffff_ffff),
            0xffff_fffe
        );
        assert_eq!(
            mulhu(Xlen::Xlen64, u64::MAX, u64::MAX),
            0xffff_ffff_ffff_fffe
        );
    }

    #[test]
    fn check_div_edge_cases_32() {
        let xlen = Xlen::Xlen32;
        // Division by zero returns all ones, no trap
        assert_eq!(div(xlen, 7, 0), 0xffff_ffff);
        // Signed overflow returns the dividend
        assert_eq!(div(xlen, 0x8000_0000, 0xffff_ffff), 0x8000_0000);
        // Ordinary signed division truncates towards zero
        assert_eq!(div(xlen, 7, 2), 3);
        let minus_seven = xlen.wrap(-7i64 as u64);
        assert_eq!(div(xlen, minus_seven, 2), xlen.wrap(-3i64 as u64));
    }

    #[test]
    fn check_div_edge_cases_64() {
        let xlen = Xlen::Xlen64;
        assert_eq!(div(xlen, 7, 0), u64::MAX);
        assert_eq!(
            div(xlen, 0x8000_0000_0000_0000, u64::MAX),
            0x8000_0000_0000_0000
        );
    }

    #[test]
    fn check_rem_edge_cases() {
        let xlen = Xlen::Xlen32;
        // Remainder of division by zero is the dividend
        assert_eq!(rem(xlen, 7, 0), 7);
        // Remainder of the overflow case is zero
        assert_eq!(rem(xlen, 0x8000_0000, 0xffff_ffff), 0);
        // Remainder takes the sign of the dividend
        let minus_seven = xlen.wrap(-7i64 as u64);
        assert_eq!(rem(xlen, minus_seven, 2), xlen.wrap(-1i64 as u64));
    }

    #[test]
    fn check_divu_remu_edge_cases() {
        let xlen = Xlen::Xlen32;
        assert_eq!(divu(xlen, 7, 0), 0xffff_ffff);
        assert_eq!(remu(xlen, 7, 0), 7);
        assert_eq!(divu(xlen, 0xffff_ffff, 2), 0x7fff_ffff);
        assert_eq!(remu(xlen, 0xffff_ffff, 2), 1);
    }

    #[test]
    fn check_divide_identity() {
        // a == (a/b)*b + (a%b) away from the edge cases
        let xlen = Xlen::Xlen32;
        for (a, b) in [(100u64, 7u64), (0xffff_fff1, 3), (5, 0x7fff_ffff)] {
            let q = div(xlen, a, b);
            let r = rem(xlen, a, b);
            assert_eq!(xlen.wrap(q.wrapping_mul(b).wrapping_add(r)), a);
            let q = divu(xlen, a, b);
            let r = remu(xlen, a, b);
            assert_eq!(xlen.wrap(q.wrapping_mul(b).wrapping_add(r)), a);
        }
    }

    #[test]
    fn check_word_ops_sign_extend() {
        // addw wraps at 32 bits and sign-extends the result
        assert_eq!(
            reg_reg_op(Xlen::Xlen64, RegRegOp::Addw, 0x7fff_ffff, 1),
            0xffff_ffff_8000_0000
        );
        // sraw shifts the low word arithmetically
        assert_eq!(
            reg_reg_op(Xlen::Xlen64, RegRegOp::Sraw, 0x8000_0000, 4),
            0xffff_ffff_f800_0000
        );
        // divw by zero gives sign-extended all ones
        assert_eq!(reg_reg_op(Xlen::Xlen64, RegRegOp::Divw, 7, 0), u64::MAX);
    }

    #[test]
    fn check_shift_amount_masking() {
        // Shift amounts use only the low log2(XLEN) bits of rs2
        assert_eq!(reg_reg_op(Xlen::Xlen32, RegRegOp::Sll, 1, 33), 2);
        assert_eq!(reg_reg_op(Xlen::Xlen64, RegRegOp::Sll, 1, 65), 2);
        assert_eq!(
            reg_reg_op(Xlen::Xlen32, RegRegOp::Srl, 0x8000_0000, 0x21),
            0x4000_0000
        );
    }

    #[test]
    fn check_sra_preserves_sign() {
        assert_eq!(
            reg_reg_op(Xlen::Xlen32, RegRegOp::Sra, 0xf000_0f00, 4),
            0xff00_00f0
        );
        assert_eq!(
            reg_imm_op(Xlen::Xlen32, RegImmOp::Srai, 0xf000_0f00, 4),
            0xff00_00f0
        );
    }

    #[test]
    fn check_sltiu_set_if_zero_idiom() {
        // sltiu rd, rs1, 1 sets rd to 1 exactly when rs1 is zero
        assert_eq!(reg_imm_op(Xlen::Xlen32, RegImmOp::Sltiu, 0, 1), 1);
        assert_eq!(reg_imm_op(Xlen::Xlen32, RegImmOp::Sltiu, 5, 1), 0);
    }

    #[test]
    fn check_sltiu_negative_immediate_wraps() {
        // The immediate -1 compares as the largest unsigned value
        assert_eq!(reg_imm_op(Xlen::Xlen32, RegImmOp::Sltiu, 5, -1), 1);
        assert_eq!(
            reg_imm_op(Xlen::Xlen32, RegImmOp::Sltiu, 0xffff_ffff, -1),
            0
        );
    }
}

use std::ops::{BitAnd, Shl, Shr};

use num::Integer;

/// Make an n_bits-long mask (all ones)
pub fn mask<T>(n_bits: T) -> T
where
    T: Integer + Shl<Output = T>,
{
    (T::one() << n_bits) - T::one()
}

/// Obtain value[end:start] (verilog notation) from value
pub fn extract_field<T>(value: T, end: T, start: T) -> T
where
    T: Copy + Integer + Shl<Output = T> + Shr<Output = T> + BitAnd<Output = T>,
{
    mask(end - start + T::one()) & (value >> start)
}

/// Take an unsigned value and a bit position for the sign bit, and
/// copy the value of the sign bit into all the higher bits of the
/// u64.
pub fn sign_extend(value: u64, sign_bit_position: u32) -> u64 {
    let sign_bit = 1 & (value >> sign_bit_position);
    if sign_bit == 1 {
        let sign_extension = u64::MAX - mask(u64::from(sign_bit_position));
        value | sign_extension
    } else {
        value
    }
}

/// Sign-extend a 32-bit value into a 64-bit register value. Used by
/// the RV64 word (\*w) instructions, which operate on the low 32 bits
/// of their operands.
pub fn sign_extend_word(value: u32) -> u64 {
    value as i32 as i64 as u64
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn check_mask() {
        assert_eq!(mask(0u32), 0);
        assert_eq!(mask(5u32), 0b11111);
        assert_eq!(mask(32u64), 0xffff_ffff);
    }

    #[test]
    fn check_extract_field() {
        assert_eq!(extract_field(0xdead_beefu32, 15, 0), 0xbeef);
        assert_eq!(extract_field(0xdead_beefu32, 31, 16), 0xdead);
        assert_eq!(extract_field(0b1101_0000u32, 7, 4), 0b1101);
    }

    #[test]
    fn check_sign_extend() {
        assert_eq!(sign_extend(0xfff, 11), u64::MAX);
        assert_eq!(sign_extend(0x7ff, 11), 0x7ff);
        assert_eq!(sign_extend(0x800, 11), u64::MAX - 0x7ff);
    }

    #[test]
    fn check_sign_extend_word() {
        assert_eq!(sign_extend_word(0xffff_ffff), u64::MAX);
        assert_eq!(sign_extend_word(0x7fff_ffff), 0x7fff_ffff);
    }
}

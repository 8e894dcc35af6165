use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Packed form of the flags, used when they go through the stack or xsave.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FlagWord: u32 {
        const CARRY = 1 << 0;
        const DIRECTION = 1 << 1;
        const INTERRUPT = 1 << 2;
        const OVERFLOW = 1 << 3;
        const SIGN = 1 << 4;
        const ZERO = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags {
    pub carry: bool,
    pub direction: bool,
    pub interrupt: bool,
    pub overflow: bool,
    pub sign: bool,
    pub zero: bool,
}

impl Flags {
    pub fn pack(&self) -> u32 {
        let mut word = FlagWord::empty();
        word.set(FlagWord::CARRY, self.carry);
        word.set(FlagWord::DIRECTION, self.direction);
        word.set(FlagWord::INTERRUPT, self.interrupt);
        word.set(FlagWord::OVERFLOW, self.overflow);
        word.set(FlagWord::SIGN, self.sign);
        word.set(FlagWord::ZERO, self.zero);
        word.bits()
    }

    /// Bits outside the six known flags are ignored.
    pub fn unpack(value: u32) -> Self {
        let word = FlagWord::from_bits_truncate(value);
        Self {
            carry: word.contains(FlagWord::CARRY),
            direction: word.contains(FlagWord::DIRECTION),
            interrupt: word.contains(FlagWord::INTERRUPT),
            overflow: word.contains(FlagWord::OVERFLOW),
            sign: word.contains(FlagWord::SIGN),
            zero: word.contains(FlagWord::ZERO),
        }
    }

    /// Sign and zero from a result of `size` bytes.
    pub fn set_sign_zero(&mut self, result: u32, size: u32) {
        self.sign = sign(result, size);
        self.zero = zero(u64::from(result), size);
    }

    /// Flags left behind by an addition `a + b (+ carry_in)` whose unmasked sum is `result`.
    pub fn set_add(&mut self, a: u32, b: u32, result: u64, size: u32) {
        let masked = (result & u64::from(mask(size))) as u32;
        self.carry = carry(result, size);
        self.overflow = overflow_add(a, b, masked, size);
        self.set_sign_zero(masked, size);
    }

    /// Flags left behind by `a - b` where `borrow` tells whether the subtraction
    /// needed to borrow.
    pub fn set_sub(&mut self, a: u32, b: u32, result: u32, borrow: bool, size: u32) {
        let masked = result & mask(size);
        self.carry = borrow;
        self.overflow = overflow_sub(a, b, masked, size);
        self.set_sign_zero(masked, size);
    }

    /// and/or/xor/test
    pub fn set_logic(&mut self, result: u32, size: u32) {
        self.carry = false;
        self.overflow = false;
        self.set_sign_zero(result & mask(size), size);
    }
}

pub fn mask(size: u32) -> u32 {
    match size {
        1 => 0xFF,
        2 => 0xFFFF,
        _ => 0xFFFF_FFFF,
    }
}

pub fn sign_bit(size: u32) -> u32 {
    match size {
        1 => 0x80,
        2 => 0x8000,
        _ => 0x8000_0000,
    }
}

pub fn bits(size: u32) -> u32 {
    match size {
        1 => 8,
        2 => 16,
        _ => 32,
    }
}

/// Sign extends the low `size` bytes of `value` to 32 bits.
pub fn sign_extend(value: u32, size: u32) -> u32 {
    match size {
        1 => value as u8 as i8 as i32 as u32,
        2 => value as u16 as i16 as i32 as u32,
        _ => value,
    }
}

/// Unsigned result does not fit in the width.
pub fn carry(result: u64, size: u32) -> bool {
    result > u64::from(mask(size))
}

pub fn overflow_add(a: u32, b: u32, result: u32, size: u32) -> bool {
    let s = sign_bit(size);
    (a & s) == (b & s) && (result & s) != (a & s)
}

pub fn overflow_sub(a: u32, b: u32, result: u32, size: u32) -> bool {
    let s = sign_bit(size);
    (a & s) != (b & s) && (result & s) != (a & s)
}

pub fn sign(result: u32, size: u32) -> bool {
    result & sign_bit(size) != 0
}

pub fn zero(result: u64, size: u32) -> bool {
    result & u64::from(mask(size)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn add(a: u32, b: u32, size: u32) -> Flags {
        let mut flags = Flags::default();
        flags.set_add(a, b, u64::from(a) + u64::from(b), size);
        flags
    }

    fn sub(a: u32, b: u32, size: u32) -> Flags {
        let mut flags = Flags::default();
        flags.set_sub(a, b, a.wrapping_sub(b), b > a, size);
        flags
    }

    #[traced_test]
    #[test]
    fn test_add_flag_table() {
        let f = add(0x7FFF_FFFF, 1, 4);
        assert!(f.overflow && f.sign && !f.carry && !f.zero);

        let f = add(0xFFFF_FFFF, 1, 4);
        assert!(f.carry && f.zero && !f.overflow && !f.sign);

        let f = add(0x80, 0x80, 1);
        assert!(f.carry && f.zero && f.overflow);

        let f = add(0x7F, 0x01, 1);
        assert!(!f.carry && f.overflow && f.sign);
    }

    #[traced_test]
    #[test]
    fn test_sub_flag_table() {
        let f = sub(0, 1, 4);
        assert!(f.carry && f.sign && !f.zero && !f.overflow);

        let f = sub(0x8000, 1, 2);
        assert!(!f.carry && f.overflow && !f.sign);

        let f = sub(5, 5, 1);
        assert!(f.zero && !f.carry && !f.sign);
    }

    #[test]
    fn test_pack_layout() {
        let flags = Flags {
            carry: true,
            zero: true,
            ..Flags::default()
        };
        assert_eq!(flags.pack(), 0b10_0001);
        assert_eq!(Flags::unpack(0b11_1111).pack(), 0b11_1111);
        let interrupt_only = Flags {
            interrupt: true,
            ..Flags::default()
        };
        assert_eq!(Flags::unpack(0xFFFF_FF04), interrupt_only);
        assert!(Flags::unpack(0b0100_0000) == Flags::default());
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0x80, 1), 0xFFFF_FF80);
        assert_eq!(sign_extend(0x7FFF, 2), 0x7FFF);
        assert_eq!(sign_extend(0x1_8000, 2), 0xFFFF_8000);
    }
}

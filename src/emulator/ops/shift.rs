use super::{validate, Op, OperatorDef, RI, RM};
use crate::emulator::error::RuntimeError;
use crate::emulator::flags::{bits, mask, sign, sign_bit, sign_extend};
use crate::emulator::operand::Operand;
use crate::emulator::Emulator;
use serde::{Deserialize, Serialize};

static SHIFT: OperatorDef = OperatorDef::new(2, RM, RI, validate::shift);

/// Shifts and rotates. The count is masked to 5 bits; a zero count changes nothing,
/// flags included. Overflow is only defined for a count of 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShiftOp {
    Rcl,
    Rcr,
    Rol,
    Ror,
    Shl,
    Shr,
    Sar,
}

impl Op for ShiftOp {
    fn definition(&self) -> &'static OperatorDef {
        &SHIFT
    }

    fn execute(
        &self,
        emulator: &mut Emulator,
        op1: Option<Operand>,
        op2: Option<Operand>,
    ) -> Result<(), RuntimeError> {
        let (Some(dst), Some(count)) = (op1, op2) else {
            return Ok(());
        };
        let size = dst.size();
        let width = bits(size);
        let a = emulator.read(&dst)?;
        let n = emulator.read(&count)? & 31;
        if n == 0 {
            return Ok(());
        }

        let (result, carry) = match self {
            ShiftOp::Shl => {
                let wide = u64::from(a) << n;
                let carry = n <= width && (wide >> width) & 1 != 0;
                (wide as u32, carry)
            }
            ShiftOp::Shr => (a >> n, (a >> (n - 1)) & 1 != 0),
            ShiftOp::Sar => {
                let signed = sign_extend(a, size) as i32;
                ((signed >> n) as u32, (signed >> (n - 1)) & 1 != 0)
            }
            ShiftOp::Rol => {
                let r = rotate_left(a, n % width, width);
                (r, r & 1 != 0)
            }
            ShiftOp::Ror => {
                let r = rotate_left(a, (width - n % width) % width, width);
                (r, sign(r, size))
            }
            ShiftOp::Rcl | ShiftOp::Rcr => {
                // rotate through carry: a (width + 1)-bit value with the carry on top
                let span = width + 1;
                let joined = (u64::from(emulator.flags.carry) << width) | u64::from(a);
                let k = n % span;
                let k = if *self == ShiftOp::Rcl { k } else { (span - k) % span };
                let all = (1u64 << span) - 1;
                let rotated = if k == 0 {
                    joined
                } else {
                    ((joined << k) | (joined >> (span - k))) & all
                };
                (rotated as u32 & mask(size), (rotated >> width) & 1 != 0)
            }
        };

        let r = emulator.write(&dst, result)?;
        let old_carry = emulator.flags.carry;
        let flags = &mut emulator.flags;
        flags.carry = carry;
        match self {
            ShiftOp::Shl | ShiftOp::Shr | ShiftOp::Sar => flags.set_sign_zero(r, size),
            _ => {}
        }
        if n == 1 {
            flags.overflow = match self {
                ShiftOp::Shl => carry ^ sign(r, size),
                ShiftOp::Shr => a & sign_bit(size) != 0,
                ShiftOp::Sar => false,
                ShiftOp::Rol => carry ^ sign(r, size),
                ShiftOp::Ror => sign(r, size) ^ (r & (sign_bit(size) >> 1) != 0),
                ShiftOp::Rcl => carry ^ sign(r, size),
                ShiftOp::Rcr => old_carry ^ (a & sign_bit(size) != 0),
            };
        }
        Ok(())
    }
}

fn rotate_left(value: u32, n: u32, width: u32) -> u32 {
    if n == 0 {
        return value;
    }
    let m = mask(width / 8);
    ((value << n) | (value >> (width - n))) & m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_left_within_width() {
        assert_eq!(rotate_left(0x81, 1, 8), 0x03);
        assert_eq!(rotate_left(0x8001, 4, 16), 0x0018);
        assert_eq!(rotate_left(0x8000_0000, 1, 32), 1);
        assert_eq!(rotate_left(0x12, 0, 8), 0x12);
    }
}

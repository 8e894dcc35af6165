use super::{validate, Op, OperatorDef, NONE, RM};
use crate::emulator::error::RuntimeError;
use crate::emulator::flags::{bits, mask, sign_extend};
use crate::emulator::operand::Operand;
use crate::emulator::registers::Register;
use crate::emulator::Emulator;
use serde::{Deserialize, Serialize};

static WIDENING: OperatorDef = OperatorDef::new(1, RM, NONE, validate::sized);

/// One-operand multiply and divide against the accumulator pair
/// (ax, dx:ax or edx:eax depending on the operand width).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MulDivOp {
    Mul,
    Imul,
    Div,
    Idiv,
}

/// Low and high halves of the double-width accumulator for an operand of `size` bytes.
fn halves(size: u32) -> (Register, Register) {
    match size {
        1 => (Register::Al, Register::Ah),
        2 => (Register::Ax, Register::Dx),
        _ => (Register::Eax, Register::Edx),
    }
}

impl MulDivOp {
    fn dividend(emulator: &Emulator, size: u32) -> u64 {
        let (low, high) = halves(size);
        (u64::from(emulator.reg(high)) << bits(size)) | u64::from(emulator.reg(low))
    }

    /// Stores a double-width product and returns the high half.
    fn store_product(emulator: &mut Emulator, product: u64, size: u32) -> u32 {
        let (low, high) = halves(size);
        emulator.set_reg(low, product as u32 & mask(size));
        emulator.set_reg(high, (product >> bits(size)) as u32 & mask(size))
    }
}

impl Op for MulDivOp {
    fn definition(&self) -> &'static OperatorDef {
        &WIDENING
    }

    fn execute(
        &self,
        emulator: &mut Emulator,
        op1: Option<Operand>,
        _op2: Option<Operand>,
    ) -> Result<(), RuntimeError> {
        let Some(src) = op1 else {
            return Ok(());
        };
        let size = src.size();
        let width = bits(size);
        let a = emulator.read(&src)?;
        let accumulator = emulator.reg(Register::accumulator(size));

        match self {
            MulDivOp::Mul => {
                let product = u64::from(a) * u64::from(accumulator);
                let high = Self::store_product(emulator, product, size);
                emulator.flags.carry = high != 0;
                emulator.flags.overflow = high != 0;
            }
            MulDivOp::Imul => {
                let product = i64::from(sign_extend(a, size) as i32)
                    * i64::from(sign_extend(accumulator, size) as i32);
                let high = Self::store_product(emulator, product as u64, size);
                // the high half must be nothing but sign extension
                let extended = high == 0 || high == mask(size);
                emulator.flags.carry = !extended;
                emulator.flags.overflow = !extended;
            }
            MulDivOp::Div => {
                if a == 0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                let dividend = Self::dividend(emulator, size);
                let quotient = dividend / u64::from(a);
                if quotient > u64::from(mask(size)) {
                    return Err(RuntimeError::DivisionOverflow);
                }
                let remainder = dividend % u64::from(a);
                let (low, high) = halves(size);
                emulator.set_reg(low, quotient as u32);
                emulator.set_reg(high, remainder as u32);
            }
            MulDivOp::Idiv => {
                if a == 0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                let divisor = i64::from(sign_extend(a, size) as i32);
                // sign extend the double-width dividend from 2 * width bits
                let raw = Self::dividend(emulator, size);
                let shift = 64 - 2 * width;
                let dividend = ((raw << shift) as i64) >> shift;
                let quotient = dividend
                    .checked_div(divisor)
                    .ok_or(RuntimeError::DivisionOverflow)?;
                let limit = 1i64 << (width - 1);
                if quotient >= limit || quotient < -limit {
                    return Err(RuntimeError::DivisionOverflow);
                }
                let remainder = dividend % divisor;
                let (low, high) = halves(size);
                emulator.set_reg(low, quotient as u32);
                emulator.set_reg(high, remainder as u32);
            }
        }
        Ok(())
    }
}

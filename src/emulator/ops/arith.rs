use super::{validate, Op, OperatorDef, NONE, RM, RMI};
use crate::emulator::error::RuntimeError;
use crate::emulator::flags::{mask, overflow_add, overflow_sub};
use crate::emulator::operand::Operand;
use crate::emulator::Emulator;
use serde::{Deserialize, Serialize};

static BINARY: OperatorDef = OperatorDef::new(2, RM, RMI, validate::same_size);
static UNARY: OperatorDef = OperatorDef::new(1, RM, NONE, validate::sized);

/// Integer add/subtract family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Adc,
    Sub,
    Sbb,
    Cmp,
    Inc,
    Dec,
    Neg,
}

impl Op for ArithOp {
    fn definition(&self) -> &'static OperatorDef {
        match self {
            ArithOp::Add | ArithOp::Adc | ArithOp::Sub | ArithOp::Sbb | ArithOp::Cmp => &BINARY,
            ArithOp::Inc | ArithOp::Dec | ArithOp::Neg => &UNARY,
        }
    }

    fn execute(
        &self,
        emulator: &mut Emulator,
        op1: Option<Operand>,
        op2: Option<Operand>,
    ) -> Result<(), RuntimeError> {
        let Some(dst) = op1 else {
            return Ok(());
        };
        let size = dst.size();
        let a = emulator.read(&dst)?;

        match self {
            ArithOp::Inc => {
                let r = emulator.write(&dst, a.wrapping_add(1))?;
                let flags = &mut emulator.flags;
                flags.overflow = overflow_add(a, 1, r, size);
                flags.set_sign_zero(r, size);
                return Ok(());
            }
            ArithOp::Dec => {
                let r = emulator.write(&dst, a.wrapping_sub(1))?;
                let flags = &mut emulator.flags;
                flags.overflow = overflow_sub(a, 1, r, size);
                flags.set_sign_zero(r, size);
                return Ok(());
            }
            ArithOp::Neg => {
                let r = emulator.write(&dst, 0u32.wrapping_sub(a))?;
                let flags = &mut emulator.flags;
                flags.carry = r != 0;
                flags.overflow = overflow_sub(0, a, r, size);
                flags.set_sign_zero(r, size);
                return Ok(());
            }
            _ => {}
        }

        let Some(src) = op2 else {
            return Ok(());
        };
        let b = emulator.read(&src)?;
        tracing::trace!("{:?} {:08X}, {:08X}", self, a, b);

        match self {
            ArithOp::Add => {
                let wide = u64::from(a) + u64::from(b);
                emulator.write(&dst, wide as u32)?;
                emulator.flags.set_add(a, b, wide, size);
            }
            ArithOp::Adc => {
                let wide = u64::from(a) + u64::from(b) + u64::from(emulator.flags.carry);
                emulator.write(&dst, wide as u32)?;
                emulator.flags.set_add(a, b, wide, size);
            }
            ArithOp::Sub => {
                let r = emulator.write(&dst, a.wrapping_sub(b))?;
                emulator.flags.set_sub(a, b, r, b > a, size);
            }
            ArithOp::Sbb => {
                let (result, borrow) = if emulator.flags.carry {
                    (a.wrapping_sub(b).wrapping_sub(1), b >= a)
                } else {
                    (a.wrapping_sub(b), b > a)
                };
                let r = emulator.write(&dst, result)?;
                emulator.flags.set_sub(a, b, r, borrow, size);
            }
            ArithOp::Cmp => {
                let r = a.wrapping_sub(b) & mask(size);
                emulator.flags.set_sub(a, b, r, b > a, size);
            }
            ArithOp::Inc | ArithOp::Dec | ArithOp::Neg => {}
        }
        Ok(())
    }
}

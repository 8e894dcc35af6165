use super::{validate, Op, OperatorDef, M, NONE, R, RM, RMIL};
use crate::emulator::error::RuntimeError;
use crate::emulator::flags::{mask, sign_extend};
use crate::emulator::operand::Operand;
use crate::emulator::registers::Register;
use crate::emulator::Emulator;
use serde::{Deserialize, Serialize};

static MOVE: OperatorDef = OperatorDef::new(2, RM, RMIL, validate::same_size);
static EXTEND: OperatorDef = OperatorDef::new(2, R, RM, validate::extend);
static EXCHANGE: OperatorDef = OperatorDef::new(2, RM, RM, validate::same_size);
static ADDRESS: OperatorDef = OperatorDef::new(2, R, M, validate::load_address);
static ATOMIC: OperatorDef = OperatorDef::new(2, RM, R, validate::same_size);
static NULLARY: OperatorDef = OperatorDef::nullary();
static SWAP: OperatorDef = OperatorDef::new(1, R, NONE, validate::register32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferOp {
    Mov,
    Movzx,
    Movsx,
    Xchg,
    Lea,
    Xadd,
    Cmpxchg,
    Xlatb,
    Bswap,
}

impl Op for TransferOp {
    fn definition(&self) -> &'static OperatorDef {
        match self {
            TransferOp::Mov => &MOVE,
            TransferOp::Movzx | TransferOp::Movsx => &EXTEND,
            TransferOp::Xchg => &EXCHANGE,
            TransferOp::Lea => &ADDRESS,
            TransferOp::Xadd | TransferOp::Cmpxchg => &ATOMIC,
            TransferOp::Xlatb => &NULLARY,
            TransferOp::Bswap => &SWAP,
        }
    }

    fn execute(
        &self,
        emulator: &mut Emulator,
        op1: Option<Operand>,
        op2: Option<Operand>,
    ) -> Result<(), RuntimeError> {
        if *self == TransferOp::Xlatb {
            let address = emulator
                .reg(Register::Ebx)
                .wrapping_add(emulator.reg(Register::Al));
            let value = emulator.read_mem(address, 1)?;
            emulator.set_reg(Register::Al, value);
            return Ok(());
        }
        if *self == TransferOp::Bswap {
            if let Some(dst) = op1 {
                let value = emulator.read(&dst)?;
                emulator.write(&dst, value.swap_bytes())?;
            }
            return Ok(());
        }

        let (Some(dst), Some(src)) = (op1, op2) else {
            return Ok(());
        };
        match self {
            TransferOp::Mov | TransferOp::Movzx => {
                let value = emulator.read(&src)?;
                emulator.write(&dst, value)?;
            }
            TransferOp::Movsx => {
                let value = emulator.read(&src)?;
                emulator.write(&dst, sign_extend(value, src.size()))?;
            }
            TransferOp::Xchg => {
                let a = emulator.read(&dst)?;
                let b = emulator.read(&src)?;
                emulator.write(&src, a)?;
                emulator.write(&dst, b)?;
            }
            TransferOp::Lea => {
                if let Operand::Memory(memory) = src {
                    let address = emulator.address_of(&memory);
                    emulator.write(&dst, address)?;
                }
            }
            TransferOp::Xadd => {
                let size = dst.size();
                let a = emulator.read(&dst)?;
                let b = emulator.read(&src)?;
                let wide = u64::from(a) + u64::from(b);
                emulator.write(&dst, wide as u32)?;
                emulator.write(&src, a)?;
                emulator.flags.set_add(a, b, wide, size);
            }
            TransferOp::Cmpxchg => {
                let size = dst.size();
                let current = emulator.read(&dst)?;
                let accumulator = Register::accumulator(size);
                let expected = emulator.reg(accumulator);
                let r = expected.wrapping_sub(current) & mask(size);
                emulator
                    .flags
                    .set_sub(expected, current, r, current > expected, size);
                if emulator.flags.zero {
                    let value = emulator.read(&src)?;
                    emulator.write(&dst, value)?;
                } else {
                    emulator.set_reg(accumulator, current);
                }
            }
            TransferOp::Xlatb | TransferOp::Bswap => {}
        }
        Ok(())
    }
}

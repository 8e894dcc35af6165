use super::{validate, Op, OperatorDef, NONE, RM, RMI};
use crate::emulator::error::RuntimeError;
use crate::emulator::operand::Operand;
use crate::emulator::Emulator;
use serde::{Deserialize, Serialize};

static BINARY: OperatorDef = OperatorDef::new(2, RM, RMI, validate::same_size);
static UNARY: OperatorDef = OperatorDef::new(1, RM, NONE, validate::sized);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicOp {
    And,
    Or,
    Xor,
    Test,
    Not,
}

impl Op for LogicOp {
    fn definition(&self) -> &'static OperatorDef {
        match self {
            LogicOp::Not => &UNARY,
            _ => &BINARY,
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
        let a = emulator.read(&dst)?;
        if *self == LogicOp::Not {
            // not leaves every flag alone
            emulator.write(&dst, !a)?;
            return Ok(());
        }

        let Some(src) = op2 else {
            return Ok(());
        };
        let b = emulator.read(&src)?;
        let result = match self {
            LogicOp::And | LogicOp::Test => a & b,
            LogicOp::Or => a | b,
            LogicOp::Xor => a ^ b,
            LogicOp::Not => !a,
        };
        if *self != LogicOp::Test {
            emulator.write(&dst, result)?;
        }
        emulator.flags.set_logic(result, dst.size());
        Ok(())
    }
}

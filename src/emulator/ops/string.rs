use super::{Op, OperatorDef};
use crate::emulator::error::RuntimeError;
use crate::emulator::operand::Operand;
use crate::emulator::registers::Register;
use crate::emulator::Emulator;
use serde::{Deserialize, Serialize};

static STRING: OperatorDef = OperatorDef::nullary().repeatable();
static REP: OperatorDef = OperatorDef::nullary().prefix();

/// stos/lods/movs. Pointers move by the element size, backwards when the
/// direction flag is set, and only after the access succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StringOp {
    Stosb,
    Stosw,
    Stosd,
    Lodsb,
    Lodsw,
    Lodsd,
    Movsb,
    Movsw,
    Movsd,
}

impl StringOp {
    pub fn size(&self) -> u32 {
        match self {
            StringOp::Stosb | StringOp::Lodsb | StringOp::Movsb => 1,
            StringOp::Stosw | StringOp::Lodsw | StringOp::Movsw => 2,
            StringOp::Stosd | StringOp::Lodsd | StringOp::Movsd => 4,
        }
    }
}

impl Op for StringOp {
    fn definition(&self) -> &'static OperatorDef {
        &STRING
    }

    fn execute(
        &self,
        emulator: &mut Emulator,
        _op1: Option<Operand>,
        _op2: Option<Operand>,
    ) -> Result<(), RuntimeError> {
        let size = self.size();
        let accumulator = Register::accumulator(size);
        match self {
            StringOp::Stosb | StringOp::Stosw | StringOp::Stosd => {
                let edi = emulator.reg(Register::Edi);
                emulator.write_mem(edi, emulator.reg(accumulator), size)?;
                emulator.advance(Register::Edi, size);
            }
            StringOp::Lodsb | StringOp::Lodsw | StringOp::Lodsd => {
                let value = emulator.read_mem(emulator.reg(Register::Esi), size)?;
                emulator.set_reg(accumulator, value);
                emulator.advance(Register::Esi, size);
            }
            StringOp::Movsb | StringOp::Movsw | StringOp::Movsd => {
                let value = emulator.read_mem(emulator.reg(Register::Esi), size)?;
                emulator.write_mem(emulator.reg(Register::Edi), value, size)?;
                emulator.advance(Register::Esi, size);
                emulator.advance(Register::Edi, size);
            }
        }
        Ok(())
    }
}

/// `rep`. Executed by the stepper rather than on its own: each step it either
/// consumes one count from ecx and lets the next instruction run, or ends the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepPrefix;

impl RepPrefix {
    /// Whether the prefixed instruction runs again. Decrements ecx when it does.
    pub fn continues(&self, emulator: &mut Emulator) -> bool {
        let ecx = emulator.reg(Register::Ecx);
        if ecx == 0 {
            return false;
        }
        emulator.set_reg(Register::Ecx, ecx - 1);
        true
    }
}

impl Op for RepPrefix {
    fn definition(&self) -> &'static OperatorDef {
        &REP
    }

    fn execute(
        &self,
        emulator: &mut Emulator,
        _op1: Option<Operand>,
        _op2: Option<Operand>,
    ) -> Result<(), RuntimeError> {
        self.continues(emulator);
        Ok(())
    }
}

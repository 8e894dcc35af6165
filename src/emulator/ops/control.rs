use super::{validate, Op, OperatorDef, I, L, NONE, RML};
use crate::emulator::error::RuntimeError;
use crate::emulator::flags::Flags;
use crate::emulator::operand::Operand;
use crate::emulator::registers::Register;
use crate::emulator::Emulator;
use serde::{Deserialize, Serialize};

static TRANSFER: OperatorDef = OperatorDef::new(1, RML, NONE, validate::basic);
static RETURN: OperatorDef = OperatorDef::new(1, I, NONE, validate::ret);
static INTERRUPT: OperatorDef = OperatorDef::new(1, I, NONE, validate::interrupt);
static NULLARY: OperatorDef = OperatorDef::nullary();
static LOOP: OperatorDef = OperatorDef::new(1, L, NONE, validate::basic);

/// Calls, returns, jumps and interrupts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlOp {
    Call,
    Ret,
    Int,
    Iret,
    Hlt,
    Jmp,
}

impl Op for ControlOp {
    fn definition(&self) -> &'static OperatorDef {
        match self {
            ControlOp::Call | ControlOp::Jmp => &TRANSFER,
            ControlOp::Ret => &RETURN,
            ControlOp::Int => &INTERRUPT,
            ControlOp::Iret | ControlOp::Hlt => &NULLARY,
        }
    }

    fn execute(
        &self,
        emulator: &mut Emulator,
        op1: Option<Operand>,
        _op2: Option<Operand>,
    ) -> Result<(), RuntimeError> {
        match self {
            ControlOp::Call => {
                let Some(target) = op1 else {
                    return Ok(());
                };
                let address = emulator.read(&target)?;
                let ret = emulator.next_instruction;
                emulator.push(ret, 4)?;
                emulator.next_instruction = address;
            }
            ControlOp::Ret => {
                let esp = emulator.reg(Register::Esp);
                let address = emulator.read_mem(esp, 4)?;
                let release = match op1 {
                    Some(count) => emulator.read(&count)?,
                    None => 0,
                };
                emulator.set_reg(Register::Esp, esp.wrapping_add(release).wrapping_add(4));
                emulator.next_instruction = address;
            }
            ControlOp::Int => {
                let Some(number) = op1 else {
                    return Ok(());
                };
                let number = emulator.read(&number)?;
                if number == 3 {
                    tracing::debug!("breakpoint");
                    emulator.halted = true;
                    emulator.debug_request = true;
                } else {
                    emulator.goto_interrupt_handler(number)?;
                }
            }
            ControlOp::Iret => {
                let esp = emulator.reg(Register::Esp);
                let address = emulator.read_mem(esp, 4)?;
                let flags = emulator.read_mem(esp.wrapping_add(4), 4)?;
                emulator.set_reg(Register::Esp, esp.wrapping_add(8));
                emulator.flags = Flags::unpack(flags);
                emulator.next_instruction = address;
            }
            ControlOp::Hlt => {
                emulator.halted = true;
            }
            ControlOp::Jmp => {
                let Some(target) = op1 else {
                    return Ok(());
                };
                emulator.next_instruction = emulator.read(&target)?;
            }
        }
        Ok(())
    }
}

/// `loop`, `loope`, `loopne`: ecx is always decremented, the jump is taken while
/// it stays non-zero and the zero flag agrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoopOp {
    Loop,
    Loope,
    Loopne,
}

impl Op for LoopOp {
    fn definition(&self) -> &'static OperatorDef {
        &LOOP
    }

    fn execute(
        &self,
        emulator: &mut Emulator,
        op1: Option<Operand>,
        _op2: Option<Operand>,
    ) -> Result<(), RuntimeError> {
        let Some(target) = op1 else {
            return Ok(());
        };
        let ecx = emulator.set_reg(Register::Ecx, emulator.reg(Register::Ecx).wrapping_sub(1));
        let condition = match self {
            LoopOp::Loop => true,
            LoopOp::Loope => emulator.flags.zero,
            LoopOp::Loopne => !emulator.flags.zero,
        };
        if ecx != 0 && condition {
            emulator.next_instruction = emulator.read(&target)?;
        }
        Ok(())
    }
}

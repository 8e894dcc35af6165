use super::{validate, Op, OperatorDef, NONE, RM, RMI};
use crate::emulator::error::RuntimeError;
use crate::emulator::flags::Flags;
use crate::emulator::operand::Operand;
use crate::emulator::registers::Register;
use crate::emulator::Emulator;
use serde::{Deserialize, Serialize};

static PUSH: OperatorDef = OperatorDef::new(1, RMI, NONE, validate::push);
static POP: OperatorDef = OperatorDef::new(1, RM, NONE, validate::pop);
static NULLARY: OperatorDef = OperatorDef::nullary();

/// pushad layout from the lowest address up.
const ALL_REGISTERS: [Register; 8] = [
    Register::Edi,
    Register::Esi,
    Register::Ebp,
    Register::Esp,
    Register::Ebx,
    Register::Edx,
    Register::Ecx,
    Register::Eax,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StackOp {
    Push,
    Pushad,
    Pushfd,
    Pop,
    Popad,
    Popfd,
}

impl Op for StackOp {
    fn definition(&self) -> &'static OperatorDef {
        match self {
            StackOp::Push => &PUSH,
            StackOp::Pop => &POP,
            _ => &NULLARY,
        }
    }

    fn execute(
        &self,
        emulator: &mut Emulator,
        op1: Option<Operand>,
        _op2: Option<Operand>,
    ) -> Result<(), RuntimeError> {
        match self {
            StackOp::Push => {
                let Some(src) = op1 else {
                    return Ok(());
                };
                let value = emulator.read(&src)?;
                emulator.push(value, src.size())?;
            }
            StackOp::Pop => {
                let Some(dst) = op1 else {
                    return Ok(());
                };
                // esp moves last so a faulting destination leaves the stack as it was
                let esp = emulator.reg(Register::Esp);
                let value = emulator.read_mem(esp, dst.size())?;
                emulator.write(&dst, value)?;
                emulator.set_reg(Register::Esp, esp.wrapping_add(dst.size()));
            }
            StackOp::Pushfd => {
                let flags = emulator.flags.pack();
                emulator.push(flags, 4)?;
            }
            StackOp::Popfd => {
                let flags = emulator.pop(4)?;
                emulator.flags = Flags::unpack(flags);
            }
            StackOp::Pushad => {
                let esp = emulator.reg(Register::Esp);
                let base = esp.wrapping_sub(32);
                // the lowest slot is checked first so a bad stack faults before anything is written
                emulator.write_mem(base, emulator.reg(Register::Edi), 4)?;
                for (slot, register) in ALL_REGISTERS.iter().enumerate().skip(1) {
                    let value = if *register == Register::Esp {
                        esp
                    } else {
                        emulator.reg(*register)
                    };
                    emulator.write_mem(base.wrapping_add(slot as u32 * 4), value, 4)?;
                }
                emulator.set_reg(Register::Esp, base);
            }
            StackOp::Popad => {
                let esp = emulator.reg(Register::Esp);
                let mut values = [0u32; 8];
                for (slot, value) in values.iter_mut().enumerate() {
                    *value = emulator.read_mem(esp.wrapping_add(slot as u32 * 4), 4)?;
                }
                for (register, value) in ALL_REGISTERS.iter().zip(values) {
                    if *register != Register::Esp {
                        emulator.set_reg(*register, value);
                    }
                }
                emulator.set_reg(Register::Esp, esp.wrapping_add(32));
            }
        }
        Ok(())
    }
}

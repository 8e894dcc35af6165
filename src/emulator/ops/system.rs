use super::{validate, Op, OperatorDef, M, NONE, R};
use crate::emulator::error::RuntimeError;
use crate::emulator::flags::Flags;
use crate::emulator::operand::Operand;
use crate::emulator::registers::Register;
use crate::emulator::Emulator;
use serde::{Deserialize, Serialize};

static NULLARY: OperatorDef = OperatorDef::nullary();
static TABLE: OperatorDef = OperatorDef::new(1, R, NONE, validate::register32);
static RANDOM: OperatorDef = OperatorDef::new(1, R, NONE, validate::wide_destination);
static STATE: OperatorDef = OperatorDef::new(1, M, NONE, validate::state_block);

/// xsave/xrstor block: eight registers then the packed flags at +32.
const STATE_REGISTERS: [Register; 8] = [
    Register::Eax,
    Register::Ebx,
    Register::Ecx,
    Register::Edx,
    Register::Esi,
    Register::Edi,
    Register::Ebp,
    Register::Esp,
];
const STATE_FLAGS_OFFSET: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemOp {
    Nop,
    Clc,
    Stc,
    Cmc,
    Cld,
    Std,
    Cli,
    Sti,
    Cwd,
    Cdq,
    Lidt,
    Sidt,
    Rdrand,
    Xsave,
    Xrstor,
}

impl Op for SystemOp {
    fn definition(&self) -> &'static OperatorDef {
        match self {
            SystemOp::Lidt | SystemOp::Sidt => &TABLE,
            SystemOp::Rdrand => &RANDOM,
            SystemOp::Xsave | SystemOp::Xrstor => &STATE,
            _ => &NULLARY,
        }
    }

    fn execute(
        &self,
        emulator: &mut Emulator,
        op1: Option<Operand>,
        _op2: Option<Operand>,
    ) -> Result<(), RuntimeError> {
        let flags = &mut emulator.flags;
        match self {
            SystemOp::Nop => {}
            SystemOp::Clc => flags.carry = false,
            SystemOp::Stc => flags.carry = true,
            SystemOp::Cmc => flags.carry = !flags.carry,
            SystemOp::Cld => flags.direction = false,
            SystemOp::Std => flags.direction = true,
            SystemOp::Cli => flags.interrupt = false,
            SystemOp::Sti => flags.interrupt = true,
            SystemOp::Cwd => {
                let fill = if emulator.reg(Register::Ax) & 0x8000 != 0 { 0xFFFF } else { 0 };
                emulator.set_reg(Register::Dx, fill);
            }
            SystemOp::Cdq => {
                let fill = if emulator.reg(Register::Eax) & 0x8000_0000 != 0 {
                    0xFFFF_FFFF
                } else {
                    0
                };
                emulator.set_reg(Register::Edx, fill);
            }
            SystemOp::Lidt => {
                if let Some(src) = op1 {
                    emulator.idt = emulator.read(&src)?;
                    tracing::debug!("idt at {:#010X}", emulator.idt);
                }
            }
            SystemOp::Sidt => {
                if let Some(dst) = op1 {
                    emulator.write(&dst, emulator.idt)?;
                }
            }
            SystemOp::Rdrand => {
                let Some(dst) = op1 else {
                    return Ok(());
                };
                *flags = Flags {
                    carry: true,
                    overflow: false,
                    zero: false,
                    sign: false,
                    ..*flags
                };
                emulator.write(&dst, rand::random::<u32>())?;
            }
            SystemOp::Xsave => {
                let Some(Operand::Memory(block)) = op1 else {
                    return Ok(());
                };
                let base = emulator.address_of(&block);
                // both ends first, so a block that does not fit writes nothing
                emulator.write_mem(base, emulator.reg(Register::Eax), 4)?;
                emulator.write_mem(
                    base.wrapping_add(STATE_FLAGS_OFFSET),
                    emulator.flags.pack(),
                    4,
                )?;
                for (slot, register) in STATE_REGISTERS.iter().enumerate().skip(1) {
                    let value = emulator.reg(*register);
                    emulator.write_mem(base.wrapping_add(slot as u32 * 4), value, 4)?;
                }
            }
            SystemOp::Xrstor => {
                let Some(Operand::Memory(block)) = op1 else {
                    return Ok(());
                };
                let base = emulator.address_of(&block);
                let mut values = [0u32; 8];
                for (slot, value) in values.iter_mut().enumerate() {
                    *value = emulator.read_mem(base.wrapping_add(slot as u32 * 4), 4)?;
                }
                let packed = emulator.read_mem(base.wrapping_add(STATE_FLAGS_OFFSET), 4)?;
                for (register, value) in STATE_REGISTERS.iter().zip(values) {
                    emulator.set_reg(*register, value);
                }
                emulator.flags = Flags::unpack(packed);
            }
        }
        Ok(())
    }
}

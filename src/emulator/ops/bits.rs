use super::{validate, Op, OperatorDef, R, RI, RM};
use crate::emulator::error::RuntimeError;
use crate::emulator::flags::sign_extend;
use crate::emulator::operand::Operand;
use crate::emulator::Emulator;
use serde::{Deserialize, Serialize};

static BIT_TEST: OperatorDef = OperatorDef::new(2, RM, RI, validate::bit_test);
static BIT_SCAN: OperatorDef = OperatorDef::new(2, R, RM, validate::bit_scan);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BitOp {
    Bt,
    Btc,
    Btr,
    Bts,
    Bsf,
    Bsr,
}

impl BitOp {
    /// New value of the tested bit, `None` for a plain test.
    fn update(&self, bit: bool) -> Option<bool> {
        match self {
            BitOp::Btc => Some(!bit),
            BitOp::Btr => Some(false),
            BitOp::Bts => Some(true),
            _ => None,
        }
    }

    fn test(
        &self,
        emulator: &mut Emulator,
        dst: Operand,
        index: Operand,
    ) -> Result<(), RuntimeError> {
        let offset = emulator.read(&index)?;

        if let (Operand::Memory(memory), Operand::Register(_)) = (dst, index) {
            // register bit offsets reach outside the operand: signed byte offset + bit in byte
            let signed = sign_extend(offset, index.size()) as i32;
            let address = emulator
                .address_of(&memory)
                .wrapping_add((signed >> 3) as u32);
            let bit = (signed & 7) as u32;
            let byte = emulator.read_mem(address, 1)?;
            let current = (byte >> bit) & 1 != 0;
            emulator.flags.carry = current;
            if let Some(new) = self.update(current) {
                let byte = if new { byte | (1 << bit) } else { byte & !(1 << bit) };
                emulator.write_mem(address, byte, 1)?;
            }
            return Ok(());
        }

        let a = emulator.read(&dst)?;
        let bit = offset & if dst.size() == 4 { 31 } else { 15 };
        let current = (a >> bit) & 1 != 0;
        emulator.flags.carry = current;
        if let Some(new) = self.update(current) {
            let value = if new { a | (1 << bit) } else { a & !(1 << bit) };
            emulator.write(&dst, value)?;
        }
        Ok(())
    }

    fn scan(&self, emulator: &mut Emulator, dst: Operand, src: Operand) -> Result<(), RuntimeError> {
        let value = emulator.read(&src)?;
        if value == 0 {
            // destination is left untouched
            emulator.flags.zero = true;
            return Ok(());
        }
        emulator.flags.zero = false;
        let index = if *self == BitOp::Bsf {
            value.trailing_zeros()
        } else {
            31 - value.leading_zeros()
        };
        emulator.write(&dst, index)?;
        Ok(())
    }
}

impl Op for BitOp {
    fn definition(&self) -> &'static OperatorDef {
        match self {
            BitOp::Bsf | BitOp::Bsr => &BIT_SCAN,
            _ => &BIT_TEST,
        }
    }

    fn execute(
        &self,
        emulator: &mut Emulator,
        op1: Option<Operand>,
        op2: Option<Operand>,
    ) -> Result<(), RuntimeError> {
        let (Some(dst), Some(src)) = (op1, op2) else {
            return Ok(());
        };
        match self {
            BitOp::Bsf | BitOp::Bsr => self.scan(emulator, dst, src),
            _ => self.test(emulator, dst, src),
        }
    }
}

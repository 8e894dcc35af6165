use super::{validate, Op, OperatorDef, L, NONE, R, RM};
use crate::emulator::error::RuntimeError;
use crate::emulator::flags::Flags;
use crate::emulator::operand::Operand;
use crate::emulator::Emulator;
use serde::{Deserialize, Serialize};

static JUMP: OperatorDef = OperatorDef::new(1, L, NONE, validate::basic);
static MOVE: OperatorDef = OperatorDef::new(2, R, RM, validate::conditional_move);
static SET: OperatorDef = OperatorDef::new(1, RM, NONE, validate::conditional_set);

/// Flag predicates shared by jcc, cmovcc and setcc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    Z,
    Nz,
    Ae,
    A,
    Be,
    B,
    Ge,
    G,
    Le,
    L,
    S,
    Ns,
    O,
    No,
}

impl Condition {
    pub fn holds(&self, flags: &Flags) -> bool {
        match self {
            Condition::Z => flags.zero,
            Condition::Nz => !flags.zero,
            Condition::Ae => !flags.carry,
            Condition::A => !flags.carry && !flags.zero,
            Condition::Be => flags.carry || flags.zero,
            Condition::B => flags.carry,
            Condition::Ge => flags.sign == flags.overflow,
            Condition::G => flags.sign == flags.overflow && !flags.zero,
            Condition::Le => flags.sign != flags.overflow || flags.zero,
            Condition::L => flags.sign != flags.overflow,
            Condition::S => flags.sign,
            Condition::Ns => !flags.sign,
            Condition::O => flags.overflow,
            Condition::No => !flags.overflow,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Jcc(pub Condition);

impl Op for Jcc {
    fn definition(&self) -> &'static OperatorDef {
        &JUMP
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
        if self.0.holds(&emulator.flags) {
            emulator.next_instruction = emulator.read(&target)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cmov(pub Condition);

impl Op for Cmov {
    fn definition(&self) -> &'static OperatorDef {
        &MOVE
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
        // the source is read even when the move does not happen, so a bad address still faults
        let value = emulator.read(&src)?;
        if self.0.holds(&emulator.flags) {
            emulator.write(&dst, value)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Setcc(pub Condition);

impl Op for Setcc {
    fn definition(&self) -> &'static OperatorDef {
        &SET
    }

    fn execute(
        &self,
        emulator: &mut Emulator,
        op1: Option<Operand>,
        _op2: Option<Operand>,
    ) -> Result<(), RuntimeError> {
        let Some(dst) = op1 else {
            return Ok(());
        };
        let value = u32::from(self.0.holds(&emulator.flags));
        emulator.write(&dst, value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_conditions() {
        let less = Flags {
            sign: true,
            ..Flags::default()
        };
        assert!(Condition::L.holds(&less));
        assert!(Condition::Le.holds(&less));
        assert!(!Condition::Ge.holds(&less));

        let overflowed = Flags {
            sign: true,
            overflow: true,
            ..Flags::default()
        };
        assert!(Condition::G.holds(&overflowed));
        assert!(!Condition::L.holds(&overflowed));
    }

    #[test]
    fn test_unsigned_conditions() {
        let equal = Flags {
            zero: true,
            ..Flags::default()
        };
        assert!(Condition::Be.holds(&equal));
        assert!(Condition::Ae.holds(&equal));
        assert!(!Condition::A.holds(&equal));
        assert!(!Condition::B.holds(&equal));
    }
}

pub use arith::ArithOp;
pub use bits::BitOp;
pub use conditional::{Cmov, Condition, Jcc, Setcc};
pub use control::{ControlOp, LoopOp};
pub use io::IoOp;
pub use logic::LogicOp;
pub use muldiv::MulDivOp;
pub use shift::ShiftOp;
pub use stack::StackOp;
pub use string::{RepPrefix, StringOp};
pub use system::SystemOp;
pub use transfer::TransferOp;
pub use validate::{ValidationError, Validator};

use super::error::RuntimeError;
use super::operand::{Operand, OperandKind};
use super::Emulator;
use indexmap::IndexMap;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::fmt;

mod arith;
mod bits;
mod conditional;
mod control;
mod io;
mod logic;
mod muldiv;
mod shift;
mod stack;
mod string;
mod system;
mod transfer;
pub mod validate;

pub(crate) const NONE: OperandKind = OperandKind::empty();
pub(crate) const R: OperandKind = OperandKind::REG;
pub(crate) const M: OperandKind = OperandKind::MEM;
pub(crate) const I: OperandKind = OperandKind::IMM;
pub(crate) const L: OperandKind = OperandKind::LABEL_REF;
pub(crate) const RM: OperandKind = OperandKind::REG.union(OperandKind::MEM);
pub(crate) const RI: OperandKind = OperandKind::REG.union(OperandKind::IMM);
pub(crate) const RMI: OperandKind = RM.union(OperandKind::IMM);
pub(crate) const RML: OperandKind = RM.union(OperandKind::LABEL_REF);
pub(crate) const RMIL: OperandKind = RMI.union(OperandKind::LABEL_REF);

/// Static description of an operator, shared by every instruction (and every
/// alias) that uses it.
#[derive(Clone, Copy)]
pub struct OperatorDef {
    pub operand_count: u8,
    pub op1: OperandKind,
    pub op2: OperandKind,
    pub validator: Validator,
    /// `rep`: modifies the instruction after it instead of standing alone
    pub is_prefix: bool,
    /// may follow `rep`
    pub accepts_prefix: bool,
}

impl OperatorDef {
    pub const fn new(operand_count: u8, op1: OperandKind, op2: OperandKind, validator: Validator) -> Self {
        Self {
            operand_count,
            op1,
            op2,
            validator,
            is_prefix: false,
            accepts_prefix: false,
        }
    }

    pub const fn nullary() -> Self {
        Self::new(0, NONE, NONE, validate::basic)
    }

    pub const fn repeatable(mut self) -> Self {
        self.accepts_prefix = true;
        self
    }

    pub const fn prefix(mut self) -> Self {
        self.is_prefix = true;
        self
    }

    pub fn validate(
        &self,
        op1: &mut Option<Operand>,
        op2: &mut Option<Operand>,
    ) -> Result<(), ValidationError> {
        (self.validator)(self, op1, op2)
    }
}

impl fmt::Debug for OperatorDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorDef")
            .field("operand_count", &self.operand_count)
            .field("op1", &self.op1)
            .field("op2", &self.op2)
            .field("is_prefix", &self.is_prefix)
            .field("accepts_prefix", &self.accepts_prefix)
            .finish()
    }
}

/// An instruction family.
///
/// Executors only ever see instructions that passed their validator, so an
/// operand that is missing where one is required is treated as a no-op rather
/// than reported.
pub trait Op: std::fmt::Debug {
    fn definition(&self) -> &'static OperatorDef;

    /// Runs the instruction. Returns on the first failing read or write, leaving
    /// whatever already happened in place.
    fn execute(
        &self,
        emulator: &mut Emulator,
        op1: Option<Operand>,
        op2: Option<Operand>,
    ) -> Result<(), RuntimeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpCode {
    Arith(ArithOp),
    Logic(LogicOp),
    Shift(ShiftOp),
    Bits(BitOp),
    Transfer(TransferOp),
    Stack(StackOp),
    Control(ControlOp),
    Loop(LoopOp),
    Jcc(Jcc),
    Cmov(Cmov),
    Setcc(Setcc),
    String(StringOp),
    Io(IoOp),
    MulDiv(MulDivOp),
    System(SystemOp),
    Rep(RepPrefix),
}

impl OpCode {
    /// Case-insensitive mnemonic lookup, aliases included.
    pub fn from_mnemonic(name: &str) -> Option<OpCode> {
        MNEMONICS.get(name.to_ascii_lowercase().as_str()).copied()
    }

    /// Canonical name; aliases resolve to the first name listed for the operator.
    pub fn mnemonic(&self) -> &'static str {
        MNEMONIC_LIST
            .iter()
            .find(|(_, op)| op == self)
            .map(|(name, _)| *name)
            .unwrap_or("?")
    }

    pub fn is_prefix(&self) -> bool {
        self.definition().is_prefix
    }
}

impl Op for OpCode {
    fn definition(&self) -> &'static OperatorDef {
        match self {
            OpCode::Arith(op) => op.definition(),
            OpCode::Logic(op) => op.definition(),
            OpCode::Shift(op) => op.definition(),
            OpCode::Bits(op) => op.definition(),
            OpCode::Transfer(op) => op.definition(),
            OpCode::Stack(op) => op.definition(),
            OpCode::Control(op) => op.definition(),
            OpCode::Loop(op) => op.definition(),
            OpCode::Jcc(op) => op.definition(),
            OpCode::Cmov(op) => op.definition(),
            OpCode::Setcc(op) => op.definition(),
            OpCode::String(op) => op.definition(),
            OpCode::Io(op) => op.definition(),
            OpCode::MulDiv(op) => op.definition(),
            OpCode::System(op) => op.definition(),
            OpCode::Rep(op) => op.definition(),
        }
    }

    fn execute(
        &self,
        emulator: &mut Emulator,
        op1: Option<Operand>,
        op2: Option<Operand>,
    ) -> Result<(), RuntimeError> {
        match self {
            OpCode::Arith(op) => op.execute(emulator, op1, op2),
            OpCode::Logic(op) => op.execute(emulator, op1, op2),
            OpCode::Shift(op) => op.execute(emulator, op1, op2),
            OpCode::Bits(op) => op.execute(emulator, op1, op2),
            OpCode::Transfer(op) => op.execute(emulator, op1, op2),
            OpCode::Stack(op) => op.execute(emulator, op1, op2),
            OpCode::Control(op) => op.execute(emulator, op1, op2),
            OpCode::Loop(op) => op.execute(emulator, op1, op2),
            OpCode::Jcc(op) => op.execute(emulator, op1, op2),
            OpCode::Cmov(op) => op.execute(emulator, op1, op2),
            OpCode::Setcc(op) => op.execute(emulator, op1, op2),
            OpCode::String(op) => op.execute(emulator, op1, op2),
            OpCode::Io(op) => op.execute(emulator, op1, op2),
            OpCode::MulDiv(op) => op.execute(emulator, op1, op2),
            OpCode::System(op) => op.execute(emulator, op1, op2),
            OpCode::Rep(op) => op.execute(emulator, op1, op2),
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

use Condition as C;

/// Every mnemonic. Aliases come after the name they alias and map to the same value.
const MNEMONIC_LIST: &[(&str, OpCode)] = &[
    ("nop", OpCode::System(SystemOp::Nop)),
    ("clc", OpCode::System(SystemOp::Clc)),
    ("stc", OpCode::System(SystemOp::Stc)),
    ("cmc", OpCode::System(SystemOp::Cmc)),
    ("cld", OpCode::System(SystemOp::Cld)),
    ("std", OpCode::System(SystemOp::Std)),
    ("cli", OpCode::System(SystemOp::Cli)),
    ("sti", OpCode::System(SystemOp::Sti)),
    ("cwd", OpCode::System(SystemOp::Cwd)),
    ("cdq", OpCode::System(SystemOp::Cdq)),
    ("lidt", OpCode::System(SystemOp::Lidt)),
    ("sidt", OpCode::System(SystemOp::Sidt)),
    ("rdrand", OpCode::System(SystemOp::Rdrand)),
    ("xsave", OpCode::System(SystemOp::Xsave)),
    ("xrstor", OpCode::System(SystemOp::Xrstor)),
    ("bt", OpCode::Bits(BitOp::Bt)),
    ("btc", OpCode::Bits(BitOp::Btc)),
    ("btr", OpCode::Bits(BitOp::Btr)),
    ("bts", OpCode::Bits(BitOp::Bts)),
    ("bsf", OpCode::Bits(BitOp::Bsf)),
    ("bsr", OpCode::Bits(BitOp::Bsr)),
    ("mov", OpCode::Transfer(TransferOp::Mov)),
    ("movzx", OpCode::Transfer(TransferOp::Movzx)),
    ("movsx", OpCode::Transfer(TransferOp::Movsx)),
    ("xchg", OpCode::Transfer(TransferOp::Xchg)),
    ("lea", OpCode::Transfer(TransferOp::Lea)),
    ("xadd", OpCode::Transfer(TransferOp::Xadd)),
    ("cmpxchg", OpCode::Transfer(TransferOp::Cmpxchg)),
    ("xlatb", OpCode::Transfer(TransferOp::Xlatb)),
    ("bswap", OpCode::Transfer(TransferOp::Bswap)),
    ("not", OpCode::Logic(LogicOp::Not)),
    ("and", OpCode::Logic(LogicOp::And)),
    ("or", OpCode::Logic(LogicOp::Or)),
    ("xor", OpCode::Logic(LogicOp::Xor)),
    ("test", OpCode::Logic(LogicOp::Test)),
    ("add", OpCode::Arith(ArithOp::Add)),
    ("adc", OpCode::Arith(ArithOp::Adc)),
    ("sub", OpCode::Arith(ArithOp::Sub)),
    ("sbb", OpCode::Arith(ArithOp::Sbb)),
    ("cmp", OpCode::Arith(ArithOp::Cmp)),
    ("inc", OpCode::Arith(ArithOp::Inc)),
    ("dec", OpCode::Arith(ArithOp::Dec)),
    ("neg", OpCode::Arith(ArithOp::Neg)),
    ("rcl", OpCode::Shift(ShiftOp::Rcl)),
    ("rcr", OpCode::Shift(ShiftOp::Rcr)),
    ("rol", OpCode::Shift(ShiftOp::Rol)),
    ("ror", OpCode::Shift(ShiftOp::Ror)),
    ("shl", OpCode::Shift(ShiftOp::Shl)),
    ("sal", OpCode::Shift(ShiftOp::Shl)),
    ("shr", OpCode::Shift(ShiftOp::Shr)),
    ("sar", OpCode::Shift(ShiftOp::Sar)),
    ("push", OpCode::Stack(StackOp::Push)),
    ("pushad", OpCode::Stack(StackOp::Pushad)),
    ("pushfd", OpCode::Stack(StackOp::Pushfd)),
    ("pop", OpCode::Stack(StackOp::Pop)),
    ("popad", OpCode::Stack(StackOp::Popad)),
    ("popfd", OpCode::Stack(StackOp::Popfd)),
    ("call", OpCode::Control(ControlOp::Call)),
    ("ret", OpCode::Control(ControlOp::Ret)),
    ("int", OpCode::Control(ControlOp::Int)),
    ("iret", OpCode::Control(ControlOp::Iret)),
    ("hlt", OpCode::Control(ControlOp::Hlt)),
    ("jmp", OpCode::Control(ControlOp::Jmp)),
    ("loop", OpCode::Loop(LoopOp::Loop)),
    ("loope", OpCode::Loop(LoopOp::Loope)),
    ("loopz", OpCode::Loop(LoopOp::Loope)),
    ("loopne", OpCode::Loop(LoopOp::Loopne)),
    ("loopnz", OpCode::Loop(LoopOp::Loopne)),
    ("jz", OpCode::Jcc(Jcc(C::Z))),
    ("je", OpCode::Jcc(Jcc(C::Z))),
    ("jnz", OpCode::Jcc(Jcc(C::Nz))),
    ("jne", OpCode::Jcc(Jcc(C::Nz))),
    ("jae", OpCode::Jcc(Jcc(C::Ae))),
    ("jnb", OpCode::Jcc(Jcc(C::Ae))),
    ("jnc", OpCode::Jcc(Jcc(C::Ae))),
    ("ja", OpCode::Jcc(Jcc(C::A))),
    ("jnbe", OpCode::Jcc(Jcc(C::A))),
    ("jbe", OpCode::Jcc(Jcc(C::Be))),
    ("jna", OpCode::Jcc(Jcc(C::Be))),
    ("jb", OpCode::Jcc(Jcc(C::B))),
    ("jnae", OpCode::Jcc(Jcc(C::B))),
    ("jc", OpCode::Jcc(Jcc(C::B))),
    ("jge", OpCode::Jcc(Jcc(C::Ge))),
    ("jnl", OpCode::Jcc(Jcc(C::Ge))),
    ("jg", OpCode::Jcc(Jcc(C::G))),
    ("jnle", OpCode::Jcc(Jcc(C::G))),
    ("jle", OpCode::Jcc(Jcc(C::Le))),
    ("jng", OpCode::Jcc(Jcc(C::Le))),
    ("jl", OpCode::Jcc(Jcc(C::L))),
    ("jnge", OpCode::Jcc(Jcc(C::L))),
    ("js", OpCode::Jcc(Jcc(C::S))),
    ("jns", OpCode::Jcc(Jcc(C::Ns))),
    ("jo", OpCode::Jcc(Jcc(C::O))),
    ("jno", OpCode::Jcc(Jcc(C::No))),
    ("cmovz", OpCode::Cmov(Cmov(C::Z))),
    ("cmove", OpCode::Cmov(Cmov(C::Z))),
    ("cmovnz", OpCode::Cmov(Cmov(C::Nz))),
    ("cmovne", OpCode::Cmov(Cmov(C::Nz))),
    ("cmovae", OpCode::Cmov(Cmov(C::Ae))),
    ("cmovnb", OpCode::Cmov(Cmov(C::Ae))),
    ("cmovnc", OpCode::Cmov(Cmov(C::Ae))),
    ("cmova", OpCode::Cmov(Cmov(C::A))),
    ("cmovnbe", OpCode::Cmov(Cmov(C::A))),
    ("cmovbe", OpCode::Cmov(Cmov(C::Be))),
    ("cmovna", OpCode::Cmov(Cmov(C::Be))),
    ("cmovb", OpCode::Cmov(Cmov(C::B))),
    ("cmovnae", OpCode::Cmov(Cmov(C::B))),
    ("cmovc", OpCode::Cmov(Cmov(C::B))),
    ("cmovge", OpCode::Cmov(Cmov(C::Ge))),
    ("cmovnl", OpCode::Cmov(Cmov(C::Ge))),
    ("cmovg", OpCode::Cmov(Cmov(C::G))),
    ("cmovnle", OpCode::Cmov(Cmov(C::G))),
    ("cmovle", OpCode::Cmov(Cmov(C::Le))),
    ("cmovng", OpCode::Cmov(Cmov(C::Le))),
    ("cmovl", OpCode::Cmov(Cmov(C::L))),
    ("cmovnge", OpCode::Cmov(Cmov(C::L))),
    ("cmovs", OpCode::Cmov(Cmov(C::S))),
    ("cmovns", OpCode::Cmov(Cmov(C::Ns))),
    ("cmovo", OpCode::Cmov(Cmov(C::O))),
    ("cmovno", OpCode::Cmov(Cmov(C::No))),
    ("setz", OpCode::Setcc(Setcc(C::Z))),
    ("sete", OpCode::Setcc(Setcc(C::Z))),
    ("setnz", OpCode::Setcc(Setcc(C::Nz))),
    ("setne", OpCode::Setcc(Setcc(C::Nz))),
    ("setae", OpCode::Setcc(Setcc(C::Ae))),
    ("setnb", OpCode::Setcc(Setcc(C::Ae))),
    ("setnc", OpCode::Setcc(Setcc(C::Ae))),
    ("seta", OpCode::Setcc(Setcc(C::A))),
    ("setnbe", OpCode::Setcc(Setcc(C::A))),
    ("setbe", OpCode::Setcc(Setcc(C::Be))),
    ("setna", OpCode::Setcc(Setcc(C::Be))),
    ("setb", OpCode::Setcc(Setcc(C::B))),
    ("setnae", OpCode::Setcc(Setcc(C::B))),
    ("setc", OpCode::Setcc(Setcc(C::B))),
    ("setge", OpCode::Setcc(Setcc(C::Ge))),
    ("setnl", OpCode::Setcc(Setcc(C::Ge))),
    ("setg", OpCode::Setcc(Setcc(C::G))),
    ("setnle", OpCode::Setcc(Setcc(C::G))),
    ("setle", OpCode::Setcc(Setcc(C::Le))),
    ("setng", OpCode::Setcc(Setcc(C::Le))),
    ("setl", OpCode::Setcc(Setcc(C::L))),
    ("setnge", OpCode::Setcc(Setcc(C::L))),
    ("sets", OpCode::Setcc(Setcc(C::S))),
    ("setns", OpCode::Setcc(Setcc(C::Ns))),
    ("seto", OpCode::Setcc(Setcc(C::O))),
    ("setno", OpCode::Setcc(Setcc(C::No))),
    ("rep", OpCode::Rep(RepPrefix)),
    ("stosb", OpCode::String(StringOp::Stosb)),
    ("stosw", OpCode::String(StringOp::Stosw)),
    ("stosd", OpCode::String(StringOp::Stosd)),
    ("lodsb", OpCode::String(StringOp::Lodsb)),
    ("lodsw", OpCode::String(StringOp::Lodsw)),
    ("lodsd", OpCode::String(StringOp::Lodsd)),
    ("movsb", OpCode::String(StringOp::Movsb)),
    ("movsw", OpCode::String(StringOp::Movsw)),
    ("movsd", OpCode::String(StringOp::Movsd)),
    ("in", OpCode::Io(IoOp::In)),
    ("out", OpCode::Io(IoOp::Out)),
    ("insb", OpCode::Io(IoOp::Insb)),
    ("insw", OpCode::Io(IoOp::Insw)),
    ("insd", OpCode::Io(IoOp::Insd)),
    ("outsb", OpCode::Io(IoOp::Outsb)),
    ("outsw", OpCode::Io(IoOp::Outsw)),
    ("outsd", OpCode::Io(IoOp::Outsd)),
    ("mul", OpCode::MulDiv(MulDivOp::Mul)),
    ("imul", OpCode::MulDiv(MulDivOp::Imul)),
    ("div", OpCode::MulDiv(MulDivOp::Div)),
    ("idiv", OpCode::MulDiv(MulDivOp::Idiv)),
];

lazy_static! {
    /// Mnemonic table, sorted by name.
    static ref MNEMONICS: IndexMap<&'static str, OpCode> = {
        let mut table: IndexMap<&'static str, OpCode> = MNEMONIC_LIST.iter().copied().collect();
        table.sort_keys();
        table
    };
}

/// Every operator name, aliases included, sorted.
pub fn operator_names() -> Vec<&'static str> {
    MNEMONICS.keys().copied().collect()
}

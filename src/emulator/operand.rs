use super::flags::mask;
use super::registers::{Register, RegisterFile};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// Which operand kinds an operator accepts in a given position.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct OperandKind: u8 {
        const REG = 1;
        const MEM = 2;
        const IMM = 4;
        const LABEL_REF = 8;
    }
}

/// `[base + index * 2^scale + displacement]`, plus the access width.
///
/// The address is recomputed from the live registers on every access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemoryRef {
    pub base: Option<Register>,
    pub index: Option<Register>,
    /// log2 of the index multiplier (0..=3)
    pub scale: u8,
    pub displacement: u32,
    /// access width in bytes, 0 while still unknown
    pub size: u32,
}

impl MemoryRef {
    /// A plain `[address]` access, the form variables compile to.
    pub fn direct(address: u32, size: u32) -> Self {
        Self {
            displacement: address,
            size,
            ..Self::default()
        }
    }

    pub fn effective_address(&self, regs: &RegisterFile) -> u32 {
        let mut address = self.displacement;
        if let Some(base) = self.base {
            address = address.wrapping_add(regs.get(base));
        }
        if let Some(index) = self.index {
            address = address.wrapping_add(regs.get(index) << self.scale);
        }
        address
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    Register(Register),
    Memory(MemoryRef),
    /// `size` is 0 until a validator gives the constant a width.
    Immediate { value: u32, size: u32 },
    /// Instruction address of a label.
    Label { address: u32 },
}

impl Operand {
    pub fn immediate(value: u32) -> Self {
        Operand::Immediate { value, size: 0 }
    }

    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::Register(_) => OperandKind::REG,
            Operand::Memory(_) => OperandKind::MEM,
            Operand::Immediate { .. } => OperandKind::IMM,
            Operand::Label { .. } => OperandKind::LABEL_REF,
        }
    }

    /// Width in bytes, 0 when unknown.
    pub fn size(&self) -> u32 {
        match self {
            Operand::Register(register) => register.size(),
            Operand::Memory(memory) => memory.size,
            Operand::Immediate { size, .. } => *size,
            Operand::Label { .. } => 4,
        }
    }

    /// Registers and labels have a fixed width, so only memory and immediates change.
    pub fn set_size(&mut self, new_size: u32) {
        match self {
            Operand::Memory(memory) => memory.size = new_size,
            Operand::Immediate { size, .. } => *size = new_size,
            Operand::Register(_) | Operand::Label { .. } => {}
        }
    }

    pub fn register(&self) -> Option<Register> {
        match self {
            Operand::Register(register) => Some(*register),
            _ => None,
        }
    }

    pub fn is_register(&self, register: Register) -> bool {
        self.register() == Some(register)
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Operand::Memory(_))
    }

    /// Constant value of an immediate or label, masked to its width.
    pub fn constant(&self) -> Option<u32> {
        match self {
            Operand::Immediate { value, size } if *size == 0 => Some(*value),
            Operand::Immediate { value, size } => Some(value & mask(*size)),
            Operand::Label { address } => Some(*address),
            _ => None,
        }
    }
}

impl fmt::Display for MemoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.size {
            1 => write!(f, "byte ptr ")?,
            2 => write!(f, "word ptr ")?,
            4 => write!(f, "dword ptr ")?,
            _ => {}
        }
        write!(f, "[")?;
        let mut first = true;
        if let Some(base) = self.base {
            write!(f, "{}", base)?;
            first = false;
        }
        if let Some(index) = self.index {
            if !first {
                write!(f, " + ")?;
            }
            write!(f, "{}", index)?;
            if self.scale != 0 {
                write!(f, " * {}", 1u32 << self.scale)?;
            }
            first = false;
        }
        if self.displacement != 0 || first {
            if !first {
                write!(f, " + ")?;
            }
            write!(f, "0x{:X}", self.displacement)?;
        }
        write!(f, "]")
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(register) => write!(f, "{}", register),
            Operand::Memory(memory) => write!(f, "{}", memory),
            Operand::Immediate { value, .. } => write!(f, "0x{:X}", value),
            Operand::Label { address } => write!(f, "0x{:08X}", address),
        }
    }
}

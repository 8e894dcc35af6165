pub mod error;
mod executor;
pub mod flags;
pub mod memory;
pub mod operand;
pub mod ops;
pub mod parse;
pub mod registers;
#[cfg(test)]
mod tests;
pub mod variables;

use crate::config::{validate_memory_size, ConfigError, DEFAULT_TIMER_INTERVAL_MS};
use crate::ports::{DefaultPorts, PortIo};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use error::RuntimeError;
pub use flags::Flags;
pub use memory::{Memory, MEMORY_BASE};
pub use operand::{MemoryRef, Operand, OperandKind};
pub use ops::{Op, OpCode};
pub use registers::{Register, RegisterFile};

use flags::mask;

/// 0-based location of a token in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourcePosition {
    pub line: usize,
    pub column: usize,
    pub index: usize,
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // humans count lines and columns from 1
        write!(f, "{}:{}", self.line + 1, self.column + 1)
    }
}

/// One compiled instruction. Every instruction occupies a 4 byte slot in the
/// instruction address space that starts at the memory limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: OpCode,
    pub op1: Option<Operand>,
    pub op2: Option<Operand>,
    pub position: SourcePosition,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)?;
        if let Some(op1) = &self.op1 {
            write!(f, " {}", op1)?;
        }
        if let Some(op2) = &self.op2 {
            write!(f, ", {}", op2)?;
        }
        Ok(())
    }
}

/// A port transfer the device could not complete yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingIo {
    /// `in`: the register receives the io buffer.
    In { target: Register, size: u32 },
    /// `ins*`: the io buffer goes to `[edi]`, then edi moves.
    InString { size: u32 },
    /// `out`/`outs*`: nothing left to transfer, `outs*` still has to move esi.
    Out { pointer: Option<Register>, size: u32 },
}

#[derive(Debug)]
pub struct Emulator {
    pub memory: Memory,
    pub regs: RegisterFile,
    pub flags: Flags,
    /// base address of the interrupt handler table
    pub idt: u32,

    /// address of the instruction the next step executes
    pub next_instruction: u32,
    instructions: Vec<Instruction>,

    pub halted: bool,
    /// set by `int 3`; the driver clears it together with `halted`
    pub debug_request: bool,
    /// fault of the last step, if any
    pub error: Option<RuntimeError>,
    faults: Vec<RuntimeError>,

    pub pending_io: Option<PendingIo>,
    // sorted from highest to lowest number, the next one to deliver is last
    pending_interrupts: Vec<u8>,

    /// exchange buffer for port transfers, little-endian
    pub io_buffer: [u8; 4],
    pub ports: Box<dyn PortIo>,
}

impl Emulator {
    /// An emulator with `memory_size` bytes of data memory and the default port device.
    pub fn new(memory_size: u32) -> Result<Self, ConfigError> {
        Self::with_ports(
            memory_size,
            Box::new(DefaultPorts::new(DEFAULT_TIMER_INTERVAL_MS)),
        )
    }

    pub fn with_ports(memory_size: u32, ports: Box<dyn PortIo>) -> Result<Self, ConfigError> {
        validate_memory_size(memory_size)?;
        let mut emulator = Self {
            memory: Memory::new(memory_size),
            regs: RegisterFile::new(),
            flags: Flags::default(),
            idt: 0,
            next_instruction: 0,
            instructions: Vec::new(),
            halted: false,
            debug_request: false,
            error: None,
            faults: Vec::new(),
            pending_io: None,
            pending_interrupts: Vec::new(),
            io_buffer: [0; 4],
            ports,
        };
        emulator.reset_execution();
        emulator.reset_registers();
        Ok(emulator)
    }

    /// First address after data memory, where instruction addresses begin.
    pub fn memory_limit(&self) -> u32 {
        self.memory.limit()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Address of the `index`th instruction.
    pub fn instruction_address(&self, index: usize) -> u32 {
        self.memory_limit().wrapping_add((index as u32) << 2)
    }

    /// Instruction stored at `address`, if it is inside the program.
    pub fn instruction_at(&self, address: u32) -> Option<&Instruction> {
        let index = address.wrapping_sub(self.memory_limit()) >> 2;
        self.instructions.get(index as usize)
    }

    pub fn eip(&self) -> u32 {
        self.regs.get(Register::Eip)
    }

    /// Replaces the program and rewinds execution to its first instruction.
    pub fn load_program(&mut self, instructions: Vec<Instruction>) {
        tracing::debug!("loading {} instructions", instructions.len());
        self.instructions = instructions;
        self.reset_execution();
    }

    pub fn clear_program(&mut self) {
        self.instructions.clear();
        self.reset_execution();
    }
}

// operand access
impl Emulator {
    pub fn reg(&self, register: Register) -> u32 {
        self.regs.get(register)
    }

    /// Returns the value actually stored (truncated to the register width).
    pub fn set_reg(&mut self, register: Register, value: u32) -> u32 {
        self.regs.set(register, value)
    }

    pub fn read_mem(&self, address: u32, size: u32) -> Result<u32, RuntimeError> {
        self.memory.read(address, size)
    }

    pub fn write_mem(&mut self, address: u32, value: u32, size: u32) -> Result<(), RuntimeError> {
        self.memory.write(address, value, size)
    }

    /// Effective address of a memory operand with the registers as they are now.
    pub fn address_of(&self, memory: &MemoryRef) -> u32 {
        memory.effective_address(&self.regs)
    }

    /// Current value of an operand, masked to its width. Labels read as their address.
    pub fn read(&self, operand: &Operand) -> Result<u32, RuntimeError> {
        match operand {
            Operand::Register(register) => Ok(self.regs.get(*register)),
            Operand::Memory(memory) => self.memory.read(self.address_of(memory), memory.size),
            Operand::Immediate { value, size } if *size == 0 => Ok(*value),
            Operand::Immediate { value, size } => Ok(value & mask(*size)),
            Operand::Label { address } => Ok(*address),
        }
    }

    /// Stores `value` through an operand and returns the value as stored.
    /// Constants cannot be written; for them this only masks.
    pub fn write(&mut self, operand: &Operand, value: u32) -> Result<u32, RuntimeError> {
        match operand {
            Operand::Register(register) => Ok(self.regs.set(*register, value)),
            Operand::Memory(memory) => {
                let value = value & mask(memory.size);
                self.memory
                    .write(self.address_of(memory), value, memory.size)?;
                Ok(value)
            }
            Operand::Immediate { size, .. } => Ok(value & mask(*size)),
            Operand::Label { .. } => Ok(value),
        }
    }

    /// Pushes `size` bytes. esp only moves once the write succeeded.
    pub fn push(&mut self, value: u32, size: u32) -> Result<(), RuntimeError> {
        let top = self.reg(Register::Esp).wrapping_sub(size);
        self.write_mem(top, value, size)?;
        self.set_reg(Register::Esp, top);
        Ok(())
    }

    pub fn pop(&mut self, size: u32) -> Result<u32, RuntimeError> {
        let top = self.reg(Register::Esp);
        let value = self.read_mem(top, size)?;
        self.set_reg(Register::Esp, top.wrapping_add(size));
        Ok(value)
    }

    /// Moves a string pointer by one element in the direction flag's direction.
    pub fn advance(&mut self, register: Register, size: u32) {
        let value = self.reg(register);
        let value = if self.flags.direction {
            value.wrapping_sub(size)
        } else {
            value.wrapping_add(size)
        };
        self.set_reg(register, value);
    }
}

// state management
impl Emulator {
    /// Rewinds to the first instruction and drops every transient condition.
    pub fn reset_execution(&mut self) {
        let limit = self.memory_limit();
        self.next_instruction = limit;
        self.regs.set(Register::Eip, limit);
        self.error = None;
        self.faults.clear();
        self.pending_io = None;
        self.pending_interrupts.clear();
        self.halted = false;
        self.debug_request = false;
    }

    pub fn reset_memory(&mut self) {
        self.memory.clear();
    }

    /// Clears the general purpose registers, flags and idt; esp points at the memory limit.
    pub fn reset_registers(&mut self) {
        let eip = self.regs.get(Register::Eip);
        self.regs.clear();
        self.regs.set(Register::Eip, eip);
        self.regs.set(Register::Esp, self.memory_limit());
        self.flags = Flags::default();
        self.idt = 0;
    }

    /// Queues an external interrupt. Only 32..=255 are accepted; a number that is
    /// already queued is not queued twice. Any request wakes a halted processor.
    pub fn queue_interrupt(&mut self, number: u32) -> bool {
        let Ok(number) = u8::try_from(number) else {
            return false;
        };
        if number < 32 {
            return false;
        }
        if !self.pending_interrupts.contains(&number) {
            self.pending_interrupts.push(number);
            // lower numbers have priority and are popped from the end
            self.pending_interrupts.sort_unstable_by(|a, b| b.cmp(a));
        }
        tracing::debug!("interrupt {} queued", number);
        self.halted = false;
        true
    }

    pub fn pending_interrupts(&self) -> &[u8] {
        &self.pending_interrupts
    }

    pub fn error_occurred(&self) -> bool {
        self.error.is_some()
    }

    /// Records a fault for the current step.
    pub fn fault(&mut self, error: RuntimeError) {
        tracing::warn!("runtime error at {:#010X}: {}", self.next_instruction, error);
        self.error = Some(error);
        self.faults.push(error);
    }

    /// Faults recorded since the last call, oldest first.
    pub fn take_faults(&mut self) -> Vec<RuntimeError> {
        std::mem::take(&mut self.faults)
    }
}

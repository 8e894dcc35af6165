use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of 32-bit slots in the register bank.
pub const SLOT_COUNT: usize = 9;

/// Every register name the assembler understands.
///
/// The 32-bit registers each own one 4-byte slot of the bank. The 16 and 8-bit
/// registers are views over part of a slot, so writing `al` changes the low byte
/// of `eax` and nothing else.
///
/// ```norust
///  slot byte:   3    2    1    0
///              +----+----+----+----+
///  eax         |         eax       |
///              |         |   ax    |
///              |         | ah | al |
///              +----+----+----+----+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Register {
    Eax,
    Ebx,
    Ecx,
    Edx,
    Esi,
    Edi,
    Esp,
    Ebp,
    Eip,
    Ax,
    Bx,
    Cx,
    Dx,
    Si,
    Di,
    Sp,
    Bp,
    Al,
    Ah,
    Bl,
    Bh,
    Cl,
    Ch,
    Dl,
    Dh,
}

impl Register {
    pub const ALL: [Register; 25] = [
        Register::Eax,
        Register::Ebx,
        Register::Ecx,
        Register::Edx,
        Register::Esi,
        Register::Edi,
        Register::Esp,
        Register::Ebp,
        Register::Eip,
        Register::Ax,
        Register::Bx,
        Register::Cx,
        Register::Dx,
        Register::Si,
        Register::Di,
        Register::Sp,
        Register::Bp,
        Register::Al,
        Register::Ah,
        Register::Bl,
        Register::Bh,
        Register::Cl,
        Register::Ch,
        Register::Dl,
        Register::Dh,
    ];

    /// Looks a register up by name, ignoring case.
    pub fn from_name(name: &str) -> Option<Register> {
        let lower = name.to_ascii_lowercase();
        Register::ALL.into_iter().find(|r| r.name() == lower)
    }

    pub fn name(self) -> &'static str {
        match self {
            Register::Eax => "eax",
            Register::Ebx => "ebx",
            Register::Ecx => "ecx",
            Register::Edx => "edx",
            Register::Esi => "esi",
            Register::Edi => "edi",
            Register::Esp => "esp",
            Register::Ebp => "ebp",
            Register::Eip => "eip",
            Register::Ax => "ax",
            Register::Bx => "bx",
            Register::Cx => "cx",
            Register::Dx => "dx",
            Register::Si => "si",
            Register::Di => "di",
            Register::Sp => "sp",
            Register::Bp => "bp",
            Register::Al => "al",
            Register::Ah => "ah",
            Register::Bl => "bl",
            Register::Bh => "bh",
            Register::Cl => "cl",
            Register::Ch => "ch",
            Register::Dl => "dl",
            Register::Dh => "dh",
        }
    }

    /// Index of the 32-bit slot this register lives in.
    pub fn slot(self) -> usize {
        match self {
            Register::Eax | Register::Ax | Register::Al | Register::Ah => 0,
            Register::Ebx | Register::Bx | Register::Bl | Register::Bh => 1,
            Register::Ecx | Register::Cx | Register::Cl | Register::Ch => 2,
            Register::Edx | Register::Dx | Register::Dl | Register::Dh => 3,
            Register::Esi | Register::Si => 4,
            Register::Edi | Register::Di => 5,
            Register::Esp | Register::Sp => 6,
            Register::Ebp | Register::Bp => 7,
            Register::Eip => 8,
        }
    }

    /// Byte offset of the register inside the bank.
    pub fn offset(self) -> usize {
        let high_byte = matches!(
            self,
            Register::Ah | Register::Bh | Register::Ch | Register::Dh
        );
        self.slot() * 4 + usize::from(high_byte)
    }

    /// Width in bytes.
    pub fn size(self) -> u32 {
        match self {
            Register::Eax
            | Register::Ebx
            | Register::Ecx
            | Register::Edx
            | Register::Esi
            | Register::Edi
            | Register::Esp
            | Register::Ebp
            | Register::Eip => 4,
            Register::Ax
            | Register::Bx
            | Register::Cx
            | Register::Dx
            | Register::Si
            | Register::Di
            | Register::Sp
            | Register::Bp => 2,
            _ => 1,
        }
    }

    /// The accumulator view of the given width (al, ax or eax).
    pub fn accumulator(size: u32) -> Register {
        match size {
            1 => Register::Al,
            2 => Register::Ax,
            _ => Register::Eax,
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The register bank: one little-endian byte arena that every register view
/// reads and writes through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFile {
    bytes: [u8; SLOT_COUNT * 4],
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self {
            bytes: [0; SLOT_COUNT * 4],
        }
    }
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, register: Register) -> u32 {
        let offset = register.offset();
        match register.size() {
            1 => u32::from(self.bytes[offset]),
            2 => u32::from(u16::from_le_bytes([
                self.bytes[offset],
                self.bytes[offset + 1],
            ])),
            _ => u32::from_le_bytes([
                self.bytes[offset],
                self.bytes[offset + 1],
                self.bytes[offset + 2],
                self.bytes[offset + 3],
            ]),
        }
    }

    /// Stores `value` truncated to the register width and returns what was stored.
    pub fn set(&mut self, register: Register, value: u32) -> u32 {
        let offset = register.offset();
        let size = register.size() as usize;
        let bytes = value.to_le_bytes();
        self.bytes[offset..offset + size].copy_from_slice(&bytes[..size]);
        self.get(register)
    }

    pub fn clear(&mut self) {
        self.bytes = [0; SLOT_COUNT * 4];
    }
}

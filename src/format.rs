//! Hex and decimal rendering used by error messages and the CLI dumps.

use serde::{Deserialize, Serialize};

/// How `numeric` renders a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NumericMode {
    #[default]
    Hex,
    Unsigned,
    Signed,
}

/// Upper-case hex digits without a prefix, zero padded to the width of `size`
/// bytes (8 digits for anything that is not 1, 2 or 3 bytes).
pub fn hex_digits(value: u32, size: u32) -> String {
    match size {
        3 => format!("{:06X}", value & 0x00FF_FFFF),
        2 => format!("{:04X}", value & 0xFFFF),
        1 => format!("{:02X}", value & 0xFF),
        _ => format!("{:08X}", value),
    }
}

pub fn hex(value: u32, size: u32) -> String {
    format!("0x{}", hex_digits(value, size))
}

pub fn numeric(value: u32, mode: NumericMode, size: u32) -> String {
    match mode {
        NumericMode::Hex => hex(value, size),
        NumericMode::Unsigned => format!("{} (u)", truncate(value, size)),
        NumericMode::Signed => format!("{} (s)", sign_extend(value, size)),
    }
}

fn truncate(value: u32, size: u32) -> u32 {
    match size {
        1 => value & 0xFF,
        2 => value & 0xFFFF,
        _ => value,
    }
}

fn sign_extend(value: u32, size: u32) -> i32 {
    match size {
        1 => i32::from(value as u8 as i8),
        2 => i32::from(value as u16 as i16),
        _ => value as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_widths() {
        assert_eq!(hex(0x3FF, 4), "0x000003FF");
        assert_eq!(hex(0xABCDEF, 3), "0xABCDEF");
        assert_eq!(hex(0x1234_5678, 2), "0x5678");
        assert_eq!(hex(0x7F, 1), "0x7F");
        assert_eq!(hex_digits(0xA, 0), "0000000A");
    }

    #[test]
    fn test_numeric_modes() {
        assert_eq!(numeric(0xFF, NumericMode::Unsigned, 1), "255 (u)");
        assert_eq!(numeric(0xFF, NumericMode::Signed, 1), "-1 (s)");
        assert_eq!(numeric(0xFFFF_8000, NumericMode::Signed, 2), "-32768 (s)");
        assert_eq!(numeric(0xFFFF_FFFF, NumericMode::Signed, 4), "-1 (s)");
        assert_eq!(numeric(16, NumericMode::Hex, 1), "0x10");
    }
}

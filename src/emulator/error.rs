use crate::format::hex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Faults raised while executing an instruction. Each one aborts the current
/// step and leaves `eip` on the faulting instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RuntimeError {
    #[error("invalid read address: {}", address(.0))]
    InvalidReadAddress(u32),
    #[error("invalid read size: {0}")]
    InvalidReadSize(u32),
    #[error("invalid write address: {}", address(.0))]
    InvalidWriteAddress(u32),
    #[error("invalid write size: {0}")]
    InvalidWriteSize(u32),
    #[error("invalid instruction address: {}", address(.0))]
    InvalidInstructionAddress(u32),
    #[error("division by 0")]
    DivisionByZero,
    #[error("division overflow")]
    DivisionOverflow,
}

fn address(value: &u32) -> String {
    hex(*value, 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_address() {
        assert_eq!(
            RuntimeError::InvalidReadAddress(1023).to_string(),
            "invalid read address: 0x000003FF"
        );
        assert_eq!(
            RuntimeError::InvalidWriteSize(3).to_string(),
            "invalid write size: 3"
        );
    }
}

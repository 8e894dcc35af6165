//! Operand checks run once per instruction at compile time.
//!
//! A validator may give an operand of unknown width (a bare immediate or an
//! unsized memory reference) the width of its sibling.

use super::OperatorDef;
use crate::emulator::operand::{Operand, OperandKind};
use crate::emulator::registers::Register;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("invalid operand count")]
    InvalidOperandCount,
    #[error("invalid destination operand type")]
    InvalidDestinationType,
    #[error("invalid source operand type")]
    InvalidSourceType,
    #[error("memory to memory operations are not allowed")]
    MemoryToMemory,
    #[error("destination must be AL, AX or EAX")]
    AccumulatorOnly,
    #[error("source must be AL, AX or EAX")]
    AccumulatorOnlySource,
    #[error("count must be CL or an immediate")]
    ClOnly,
    #[error("destination must be DX or an immediate")]
    DxOnly,
    #[error("source must be DX or an immediate")]
    DxOnlySource,
    #[error("immediate must be between 0 and 255")]
    ImmediateOutOfByteRange,
    #[error("invalid interrupt number (only 3 and 32-255 are allowed)")]
    InvalidInterrupt,
    #[error("destination must be 16 or 32 bits")]
    Destination16Or32Only,
    #[error("source must be 16 or 32 bits")]
    Source16Or32Only,
    #[error("destination must be 8, 16 or 32 bits")]
    DestinationAnySizeOnly,
    #[error("source must be 8, 16 or 32 bits")]
    SourceAnySizeOnly,
    #[error("destination must be 8 bits")]
    Destination8Only,
    #[error("operand must be 16 or 32 bits")]
    Operand16Or32Only,
    #[error("eip cannot be accessed directly")]
    NoEip,
    #[error("operand must be a 32-bit register")]
    Register32Only,
    #[error("destination and source sizes do not match")]
    SizeMismatch,
    #[error("destination and source sizes are unknown")]
    SizeUnknown,
    #[error("destination size is unknown")]
    DestinationSizeUnknown,
    #[error("source size is unknown")]
    SourceSizeUnknown,
}

pub type Validator =
    fn(&OperatorDef, &mut Option<Operand>, &mut Option<Operand>) -> Result<(), ValidationError>;

fn any_width(size: u32) -> bool {
    size == 0 || matches!(size, 1 | 2 | 4)
}

fn wide(size: u32) -> bool {
    size == 2 || size == 4
}

/// Arity, kinds, mem/mem, widths and direct `eip` use. Every other validator starts here.
fn check(
    def: &OperatorDef,
    op1: &Option<Operand>,
    op2: &Option<Operand>,
    ignore_op1_size: bool,
    ignore_op2_size: bool,
) -> Result<(), ValidationError> {
    match (def.operand_count, op1, op2) {
        (0, None, None) => {}
        (1, Some(a), None) => {
            if !def.op1.intersects(a.kind()) {
                return Err(ValidationError::InvalidDestinationType);
            }
        }
        (2, Some(a), Some(b)) => {
            if !def.op1.intersects(a.kind()) {
                return Err(ValidationError::InvalidDestinationType);
            }
            if !def.op2.intersects(b.kind()) {
                return Err(ValidationError::InvalidSourceType);
            }
            if a.is_memory() && b.is_memory() {
                return Err(ValidationError::MemoryToMemory);
            }
        }
        _ => return Err(ValidationError::InvalidOperandCount),
    }
    if !ignore_op1_size && op1.is_some_and(|a| !any_width(a.size())) {
        return Err(ValidationError::DestinationAnySizeOnly);
    }
    if !ignore_op2_size && op2.is_some_and(|b| !any_width(b.size())) {
        return Err(ValidationError::SourceAnySizeOnly);
    }
    let uses_eip = |op: &Option<Operand>| op.is_some_and(|o| o.is_register(Register::Eip));
    if uses_eip(op1) || uses_eip(op2) {
        return Err(ValidationError::NoEip);
    }
    Ok(())
}

/// Structural checks only.
pub fn basic(
    def: &OperatorDef,
    op1: &mut Option<Operand>,
    op2: &mut Option<Operand>,
) -> Result<(), ValidationError> {
    check(def, op1, op2, false, false)
}

/// Two operands of the same width; an unknown width is taken from the other side.
pub fn same_size(
    def: &OperatorDef,
    op1: &mut Option<Operand>,
    op2: &mut Option<Operand>,
) -> Result<(), ValidationError> {
    check(def, op1, op2, false, false)?;
    let (Some(a), Some(b)) = (op1.as_mut(), op2.as_mut()) else {
        return Err(ValidationError::InvalidOperandCount);
    };
    match (a.size(), b.size()) {
        (0, 0) => Err(ValidationError::SizeUnknown),
        (0, size) => {
            a.set_size(size);
            Ok(())
        }
        (size, 0) => {
            b.set_size(size);
            Ok(())
        }
        (x, y) if x != y => Err(ValidationError::SizeMismatch),
        _ => Ok(()),
    }
}

/// One operand whose width must be known.
pub fn sized(
    def: &OperatorDef,
    op1: &mut Option<Operand>,
    op2: &mut Option<Operand>,
) -> Result<(), ValidationError> {
    check(def, op1, op2, false, false)?;
    match op1 {
        Some(a) if a.size() == 0 => Err(ValidationError::DestinationSizeUnknown),
        _ => Ok(()),
    }
}

/// Shift and rotate counts come from an immediate or CL.
pub fn shift(
    def: &OperatorDef,
    op1: &mut Option<Operand>,
    op2: &mut Option<Operand>,
) -> Result<(), ValidationError> {
    check(def, op1, op2, false, false)?;
    match op2 {
        Some(Operand::Register(r)) if *r != Register::Cl => Err(ValidationError::ClOnly),
        _ => Ok(()),
    }
}

/// bt/btc/btr/bts: 16/32-bit destination, register bit index of the same width.
/// An immediate bit index takes the destination width.
pub fn bit_test(
    def: &OperatorDef,
    op1: &mut Option<Operand>,
    op2: &mut Option<Operand>,
) -> Result<(), ValidationError> {
    check(def, op1, op2, false, false)?;
    let (Some(a), Some(b)) = (op1.as_mut(), op2.as_mut()) else {
        return Err(ValidationError::InvalidOperandCount);
    };
    if !wide(a.size()) {
        return Err(ValidationError::Destination16Or32Only);
    }
    if let Operand::Register(r) = b {
        if !wide(r.size()) {
            return Err(ValidationError::Source16Or32Only);
        }
    }
    if b.size() == 0 {
        b.set_size(a.size());
    }
    if a.size() != b.size() {
        return Err(ValidationError::SizeMismatch);
    }
    Ok(())
}

/// bsf/bsr
pub fn bit_scan(
    def: &OperatorDef,
    op1: &mut Option<Operand>,
    op2: &mut Option<Operand>,
) -> Result<(), ValidationError> {
    check(def, op1, op2, false, false)?;
    let (Some(a), Some(b)) = (op1.as_mut(), op2.as_mut()) else {
        return Err(ValidationError::InvalidOperandCount);
    };
    if !wide(a.size()) {
        return Err(ValidationError::Destination16Or32Only);
    }
    if b.size() == 0 {
        b.set_size(a.size());
    }
    if a.size() != b.size() {
        return Err(ValidationError::SizeMismatch);
    }
    Ok(())
}

/// movzx/movsx: the source must be known and narrower than the 16/32-bit destination.
pub fn extend(
    def: &OperatorDef,
    op1: &mut Option<Operand>,
    op2: &mut Option<Operand>,
) -> Result<(), ValidationError> {
    check(def, op1, op2, false, false)?;
    let (Some(a), Some(b)) = (op1.as_ref(), op2.as_ref()) else {
        return Err(ValidationError::InvalidOperandCount);
    };
    if !wide(a.size()) {
        return Err(ValidationError::Destination16Or32Only);
    }
    if b.size() >= a.size() {
        return Err(ValidationError::SizeMismatch);
    }
    if b.size() == 0 {
        return Err(ValidationError::SourceSizeUnknown);
    }
    Ok(())
}

/// lea: the memory operand's width does not matter.
pub fn load_address(
    def: &OperatorDef,
    op1: &mut Option<Operand>,
    op2: &mut Option<Operand>,
) -> Result<(), ValidationError> {
    check(def, op1, op2, false, true)?;
    match op1 {
        Some(a) if !wide(a.size()) => Err(ValidationError::Destination16Or32Only),
        _ => Ok(()),
    }
}

/// cmovcc: 16/32-bit register destination.
pub fn conditional_move(
    def: &OperatorDef,
    op1: &mut Option<Operand>,
    op2: &mut Option<Operand>,
) -> Result<(), ValidationError> {
    check(def, op1, op2, false, false)?;
    let (Some(a), Some(b)) = (op1.as_mut(), op2.as_mut()) else {
        return Err(ValidationError::InvalidOperandCount);
    };
    if !wide(a.size()) {
        return Err(ValidationError::Destination16Or32Only);
    }
    if b.size() == 0 {
        b.set_size(a.size());
    }
    if a.size() != b.size() {
        return Err(ValidationError::SizeMismatch);
    }
    Ok(())
}

/// setcc: byte destination.
pub fn conditional_set(
    def: &OperatorDef,
    op1: &mut Option<Operand>,
    op2: &mut Option<Operand>,
) -> Result<(), ValidationError> {
    check(def, op1, op2, false, false)?;
    match op1 {
        Some(a) if a.size() != 1 => Err(ValidationError::Destination8Only),
        _ => Ok(()),
    }
}

/// in: accumulator destination, port from an 8-bit immediate or DX.
pub fn port_in(
    def: &OperatorDef,
    op1: &mut Option<Operand>,
    op2: &mut Option<Operand>,
) -> Result<(), ValidationError> {
    check(def, op1, op2, false, false)?;
    if !op1.is_some_and(|a| is_accumulator(&a)) {
        return Err(ValidationError::AccumulatorOnly);
    }
    match op2 {
        Some(Operand::Immediate { value, .. }) if *value > 255 => {
            Err(ValidationError::ImmediateOutOfByteRange)
        }
        Some(Operand::Register(r)) if *r != Register::Dx => Err(ValidationError::DxOnlySource),
        _ => Ok(()),
    }
}

/// out: port from an 8-bit immediate or DX, accumulator source.
pub fn port_out(
    def: &OperatorDef,
    op1: &mut Option<Operand>,
    op2: &mut Option<Operand>,
) -> Result<(), ValidationError> {
    check(def, op1, op2, false, false)?;
    match op1 {
        Some(Operand::Immediate { value, .. }) if *value > 255 => {
            return Err(ValidationError::ImmediateOutOfByteRange)
        }
        Some(Operand::Register(r)) if *r != Register::Dx => return Err(ValidationError::DxOnly),
        _ => {}
    }
    if !op2.is_some_and(|b| is_accumulator(&b)) {
        return Err(ValidationError::AccumulatorOnlySource);
    }
    Ok(())
}

fn is_accumulator(op: &Operand) -> bool {
    matches!(
        op.register(),
        Some(Register::Al | Register::Ax | Register::Eax)
    )
}

/// lidt/sidt/bswap: a 32-bit register.
pub fn register32(
    def: &OperatorDef,
    op1: &mut Option<Operand>,
    op2: &mut Option<Operand>,
) -> Result<(), ValidationError> {
    check(def, op1, op2, false, false)?;
    match op1 {
        Some(a) if a.size() != 4 => Err(ValidationError::Register32Only),
        _ => Ok(()),
    }
}

/// rdrand: 16/32-bit destination.
pub fn wide_destination(
    def: &OperatorDef,
    op1: &mut Option<Operand>,
    op2: &mut Option<Operand>,
) -> Result<(), ValidationError> {
    check(def, op1, op2, false, false)?;
    match op1 {
        Some(a) if !wide(a.size()) => Err(ValidationError::Destination16Or32Only),
        _ => Ok(()),
    }
}

/// push: immediates are always pushed as dwords.
pub fn push(
    def: &OperatorDef,
    op1: &mut Option<Operand>,
    op2: &mut Option<Operand>,
) -> Result<(), ValidationError> {
    check(def, op1, op2, false, false)?;
    match op1 {
        Some(a) if a.kind() == OperandKind::IMM => {
            a.set_size(4);
            Ok(())
        }
        Some(a) if !wide(a.size()) => Err(ValidationError::Operand16Or32Only),
        _ => Ok(()),
    }
}

/// pop: 16/32-bit destination.
pub fn pop(
    def: &OperatorDef,
    op1: &mut Option<Operand>,
    op2: &mut Option<Operand>,
) -> Result<(), ValidationError> {
    check(def, op1, op2, false, false)?;
    match op1 {
        Some(a) if !wide(a.size()) => Err(ValidationError::Operand16Or32Only),
        _ => Ok(()),
    }
}

/// ret takes an optional byte count to release.
pub fn ret(
    def: &OperatorDef,
    op1: &mut Option<Operand>,
    op2: &mut Option<Operand>,
) -> Result<(), ValidationError> {
    if op1.is_none() && op2.is_none() {
        return Ok(());
    }
    check(def, op1, op2, false, false)?;
    if let Some(a) = op1 {
        if a.size() == 0 {
            a.set_size(4);
        }
    }
    Ok(())
}

/// int: 3 or 32..=255.
pub fn interrupt(
    def: &OperatorDef,
    op1: &mut Option<Operand>,
    op2: &mut Option<Operand>,
) -> Result<(), ValidationError> {
    check(def, op1, op2, false, false)?;
    match op1.and_then(|a| a.constant()) {
        Some(3) | Some(32..=255) => Ok(()),
        _ => Err(ValidationError::InvalidInterrupt),
    }
}

/// xsave/xrstor address a 36 byte block, so operand widths are meaningless.
pub fn state_block(
    def: &OperatorDef,
    op1: &mut Option<Operand>,
    op2: &mut Option<Operand>,
) -> Result<(), ValidationError> {
    check(def, op1, op2, true, true)
}

use super::{validate, Op, OperatorDef, R, RI};
use crate::emulator::error::RuntimeError;
use crate::emulator::operand::Operand;
use crate::emulator::registers::Register;
use crate::emulator::{Emulator, PendingIo};
use serde::{Deserialize, Serialize};

static IN: OperatorDef = OperatorDef::new(2, R, RI, validate::port_in);
static OUT: OperatorDef = OperatorDef::new(2, RI, R, validate::port_out);
static STRING: OperatorDef = OperatorDef::nullary().repeatable();

/// Port transfers. When the port device refuses a transfer the instruction is
/// left half done in `pending_io` and finished by `Emulator::resume_from_io`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IoOp {
    In,
    Out,
    Insb,
    Insw,
    Insd,
    Outsb,
    Outsw,
    Outsd,
}

impl IoOp {
    fn string_size(&self) -> u32 {
        match self {
            IoOp::Insb | IoOp::Outsb => 1,
            IoOp::Insw | IoOp::Outsw => 2,
            _ => 4,
        }
    }
}

impl Op for IoOp {
    fn definition(&self) -> &'static OperatorDef {
        match self {
            IoOp::In => &IN,
            IoOp::Out => &OUT,
            _ => &STRING,
        }
    }

    fn execute(
        &self,
        emulator: &mut Emulator,
        op1: Option<Operand>,
        op2: Option<Operand>,
    ) -> Result<(), RuntimeError> {
        match self {
            IoOp::In => {
                let (Some(Operand::Register(target)), Some(port)) = (op1, op2) else {
                    return Ok(());
                };
                let size = target.size();
                let port = emulator.read(&port)?;
                if emulator.ports.input(port, &mut emulator.io_buffer, size) {
                    emulator.set_reg(target, u32::from_le_bytes(emulator.io_buffer));
                } else {
                    tracing::debug!("in from port {} pending", port);
                    emulator.pending_io = Some(PendingIo::In { target, size });
                }
            }
            IoOp::Out => {
                let (Some(port), Some(src)) = (op1, op2) else {
                    return Ok(());
                };
                let size = src.size();
                let port = emulator.read(&port)?;
                emulator.io_buffer = emulator.read(&src)?.to_le_bytes();
                if !emulator.ports.output(port, &emulator.io_buffer, size) {
                    tracing::debug!("out to port {} pending", port);
                    emulator.pending_io = Some(PendingIo::Out {
                        pointer: None,
                        size,
                    });
                }
            }
            IoOp::Insb | IoOp::Insw | IoOp::Insd => {
                let size = self.string_size();
                let port = emulator.reg(Register::Dx);
                if emulator.ports.input(port, &mut emulator.io_buffer, size) {
                    let value = u32::from_le_bytes(emulator.io_buffer);
                    emulator.write_mem(emulator.reg(Register::Edi), value, size)?;
                    emulator.advance(Register::Edi, size);
                } else {
                    tracing::debug!("ins from port {} pending", port);
                    emulator.pending_io = Some(PendingIo::InString { size });
                }
            }
            IoOp::Outsb | IoOp::Outsw | IoOp::Outsd => {
                let size = self.string_size();
                let value = emulator.read_mem(emulator.reg(Register::Esi), size)?;
                emulator.io_buffer = value.to_le_bytes();
                let port = emulator.reg(Register::Dx);
                if emulator.ports.output(port, &emulator.io_buffer, size) {
                    emulator.advance(Register::Esi, size);
                } else {
                    tracing::debug!("outs to port {} pending", port);
                    emulator.pending_io = Some(PendingIo::Out {
                        pointer: Some(Register::Esi),
                        size,
                    });
                }
            }
        }
        Ok(())
    }
}

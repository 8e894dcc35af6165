use crate::emulator::ops::Op;
use crate::emulator::{Emulator, Instruction, OpCode, PendingIo, Register, RuntimeError};

impl Emulator {
    fn fetch(&self, address: u32) -> Result<Instruction, RuntimeError> {
        self.instruction_at(address)
            .copied()
            .ok_or(RuntimeError::InvalidInstructionAddress(address))
    }

    /// Pushes flags and the return address, then continues at the handler whose
    /// address is stored at `idt + 4 * number`.
    pub fn goto_interrupt_handler(&mut self, number: u32) -> Result<(), RuntimeError> {
        let handler = self.read_mem(self.idt.wrapping_add(number << 2), 4)?;
        let esp = self.reg(Register::Esp);
        self.write_mem(esp.wrapping_sub(4), self.flags.pack(), 4)?;
        self.write_mem(esp.wrapping_sub(8), self.next_instruction, 4)?;
        self.set_reg(Register::Esp, esp.wrapping_sub(8));
        tracing::debug!("interrupt {} -> handler at {:#010X}", number, handler);
        self.next_instruction = handler;
        Ok(())
    }

    /// Executes one instruction (a `rep` pair counts as one).
    ///
    /// When interrupts are enabled and one is pending it is delivered first; with
    /// `stepping` set, delivering it is the whole step. Returns false when nothing
    /// could run because of a fault, which is then recorded in `error`.
    pub fn step(&mut self, stepping: bool) -> bool {
        let span = tracing::debug_span!("step", eip = format!("{:#010X}", self.next_instruction));
        let _guard = span.enter();

        let mut old = self.next_instruction;
        self.regs.set(Register::Eip, old);

        if self.flags.interrupt {
            if let Some(number) = self.pending_interrupts.pop() {
                if let Err(e) = self.goto_interrupt_handler(u32::from(number)) {
                    self.fault(e);
                    return false;
                }
                self.flags.interrupt = false;
                old = self.next_instruction;
                self.regs.set(Register::Eip, old);
                if stepping {
                    return true;
                }
            }
        }

        let instruction = match self.fetch(old) {
            Ok(instruction) => instruction,
            Err(e) => {
                self.fault(e);
                return false;
            }
        };
        self.next_instruction = old.wrapping_add(4);
        tracing::trace!("{:#010X}: {}", old, instruction);

        let result = match instruction.op {
            OpCode::Rep(rep) => {
                if rep.continues(self) {
                    let result = self
                        .fetch(self.next_instruction)
                        .and_then(|body| body.op.execute(self, body.op1, body.op2));
                    // back to the prefix so the pair runs again next step
                    self.next_instruction = old;
                    result
                } else {
                    self.next_instruction = self.next_instruction.wrapping_add(4);
                    Ok(())
                }
            }
            op => op.execute(self, instruction.op1, instruction.op2),
        };

        if let Err(e) = result {
            self.fault(e);
            self.next_instruction = old;
        }
        self.regs.set(Register::Eip, self.next_instruction);
        true
    }

    /// Runs until halted, faulted, waiting for IO or `max_steps` instructions
    /// have executed. Returns the number of steps taken.
    pub fn run(&mut self, max_steps: Option<usize>) -> usize {
        let span = tracing::info_span!("run", max_steps = ?max_steps);
        let _guard = span.enter();

        self.error = None;
        let mut steps = 0;
        while !self.halted && self.error.is_none() && self.pending_io.is_none() {
            if max_steps.is_some_and(|max| steps >= max) {
                tracing::debug!("reached {} steps", steps);
                break;
            }
            self.step(false);
            steps += 1;
        }
        tracing::debug!(
            steps,
            halted = self.halted,
            pending_io = self.pending_io.is_some(),
            error = ?self.error,
            "run finished"
        );
        steps
    }

    /// Finishes the pending port transfer using `io_buffer`, moving string
    /// pointers exactly as a transfer that completed right away would have.
    ///
    /// Returns `Ok(false)` when no transfer was pending. A fault is recorded in
    /// `error` as well as returned.
    pub fn resume_from_io(&mut self) -> Result<bool, RuntimeError> {
        let Some(pending) = self.pending_io.take() else {
            return Ok(false);
        };
        tracing::debug!("resuming {:?}", pending);
        let value = u32::from_le_bytes(self.io_buffer);
        match pending {
            PendingIo::In { target, .. } => {
                self.set_reg(target, value);
            }
            PendingIo::InString { size } => {
                let edi = self.reg(Register::Edi);
                if let Err(e) = self.write_mem(edi, value, size) {
                    self.fault(e);
                    return Err(e);
                }
                self.advance(Register::Edi, size);
            }
            PendingIo::Out { pointer, size } => {
                if let Some(pointer) = pointer {
                    self.advance(pointer, size);
                }
            }
        }
        Ok(true)
    }
}

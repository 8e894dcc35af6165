//! The driver around an [`Emulator`]: compilation, variables, cooperative
//! time-sliced runs, single steps, external interrupts, IO resumption and
//! notifications.
//!
//! Nothing here blocks. A run executes one batch and, when its time slice is
//! used up, asks to be continued: the host calls [`Machine::tick`] once
//! [`Machine::next_wakeup`] has passed.

pub use observer::{LoggingObserver, MachineObserver, ObserverId, ObserverSet, RunStatus};

use crate::config::{ConfigError, EmulatorConfig};
use crate::emulator::parse::{CompilationArtifacts, CompileError};
use crate::emulator::variables::{
    Variable, VariableContents, VariableDecl, VariableError, VariableTable,
};
use crate::emulator::{Emulator, Instruction, RuntimeError};
use crate::ports::{DefaultPorts, PortIo};
use std::time::Duration;
use thiserror::Error;
use web_time::Instant;

mod observer;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MachineError {
    #[error("no program is compiled")]
    NotCompiled,
    #[error("the machine is running or waiting")]
    Busy,
    #[error("the machine is halted")]
    Halted,
    #[error("no IO operation is pending")]
    NotPendingIo,
    #[error("interrupt {0} is out of range (32-255)")]
    InterruptOutOfRange(u32),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Variable(#[from] VariableError),
}

#[derive(Debug)]
pub struct Machine {
    emulator: Emulator,
    config: EmulatorConfig,
    variables: VariableTable,
    artifacts: CompilationArtifacts,
    observers: ObserverSet,

    compiled: bool,
    running: bool,
    /// a step stopped in halt or pending IO and finishes when that ends
    step_pending: bool,
    continue_on_resumption: bool,
    /// when a yielded run continues
    resume_at: Option<Instant>,
}

impl Machine {
    pub fn new(config: EmulatorConfig) -> Result<Self, ConfigError> {
        let ports = DefaultPorts::new(config.timer_interval_ms);
        Self::with_ports(config, Box::new(ports))
    }

    pub fn with_ports(config: EmulatorConfig, ports: Box<dyn PortIo>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            emulator: Emulator::with_ports(config.memory_size, ports)?,
            config,
            variables: VariableTable::new(),
            artifacts: CompilationArtifacts::default(),
            observers: ObserverSet::default(),
            compiled: false,
            running: false,
            step_pending: false,
            continue_on_resumption: false,
            resume_at: None,
        })
    }

    pub fn emulator(&self) -> &Emulator {
        &self.emulator
    }

    /// Direct access for inspection and debugging. Changing state while running
    /// is allowed but bypasses every check.
    pub fn emulator_mut(&mut self) -> &mut Emulator {
        &mut self.emulator
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    pub fn variables(&self) -> &VariableTable {
        &self.variables
    }

    pub fn artifacts(&self) -> &CompilationArtifacts {
        &self.artifacts
    }

    pub fn attach(&mut self, observer: Box<dyn MachineObserver>) -> ObserverId {
        self.observers.attach(observer)
    }

    pub fn detach(&mut self, id: ObserverId) -> bool {
        self.observers.detach(id)
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_halted(&self) -> bool {
        self.emulator.halted
    }

    pub fn is_pending_io(&self) -> bool {
        self.emulator.pending_io.is_some()
    }

    pub fn is_running_or_waiting(&self) -> bool {
        self.running || self.is_halted() || self.is_pending_io()
    }

    /// Whether ending the current halt or pending IO continues the run.
    pub fn will_continue_after_resumption(&self) -> bool {
        self.continue_on_resumption
    }

    pub fn instruction_at_address(&self, address: u32) -> Option<&Instruction> {
        self.emulator.instruction_at(address)
    }

    /// The 4 byte exchange buffer of a pending port transfer.
    pub fn io_buffer_mut(&mut self) -> &mut [u8; 4] {
        &mut self.emulator.io_buffer
    }

    /// Earliest moment [`Machine::tick`] has something to do.
    pub fn next_wakeup(&self) -> Option<Instant> {
        match (self.resume_at, self.emulator.ports.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn status(&self) -> RunStatus {
        RunStatus {
            reset: false,
            stop_called: false,
            halted: self.emulator.halted,
            pending_io: self.is_pending_io(),
            error_occurred: self.emulator.error_occurred(),
        }
    }

    fn report_faults(&mut self) {
        for error in self.emulator.take_faults() {
            self.observers.notify(|o| o.runtime_error(&error));
        }
    }

    /// `int 3` halts only until the driver sees it.
    fn clear_debug_request(&mut self) {
        if self.emulator.debug_request {
            tracing::debug!("debug break at {:#010X}", self.emulator.eip());
            self.emulator.halted = false;
            self.emulator.debug_request = false;
        }
    }
}

// variables and compilation
impl Machine {
    pub fn add_variable(
        &mut self,
        name: &str,
        size: u32,
        initial: Option<VariableContents>,
        force_array: bool,
    ) -> Result<(), MachineError> {
        if self.is_running_or_waiting() {
            return Err(MachineError::Busy);
        }
        self.compiled = false;
        let memory_size = self.emulator.memory.size();
        match self
            .variables
            .add(name, size, initial, force_array, memory_size)
        {
            Ok(variable) => {
                let variable = variable.clone();
                self.observers.notify(|o| o.variable_added(&variable));
                Ok(())
            }
            Err(e) => {
                tracing::warn!("{}", e);
                self.observers.notify(|o| o.variable_error(&e));
                Err(e.into())
            }
        }
    }

    /// Returns whether a variable by that name existed.
    pub fn remove_variable(&mut self, name: &str) -> Result<bool, MachineError> {
        if self.is_running_or_waiting() {
            return Err(MachineError::Busy);
        }
        self.compiled = false;
        match self.variables.remove(name) {
            Some(variable) => {
                self.observers.notify(|o| o.variable_removed(&variable));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Compiles from scratch. On success the machine is reset and ready to run.
    pub fn compile(&mut self, source: &str) -> Result<(), MachineError> {
        if self.is_running_or_waiting() {
            return Err(MachineError::Busy);
        }
        self.compiled = false;
        self.emulator.clear_program();

        let out = match self.emulator.parse_program(source, &mut self.variables) {
            Ok(out) => out,
            Err(e) => {
                self.observers.notify(|o| o.compilation_error(&e));
                self.observers.notify(|o| o.compilation_finished(true));
                return Err(e.into());
            }
        };
        self.emulator.load_program(out.instructions);
        self.artifacts = out.artifacts;
        self.compiled = true;
        self.reset();
        self.observers.notify(|o| o.compilation_finished(false));
        Ok(())
    }

    /// Loads variable declarations, stopping at the first bad one.
    pub fn add_variables(
        &mut self,
        declarations: impl IntoIterator<Item = VariableDecl>,
    ) -> Result<(), MachineError> {
        for decl in declarations {
            self.add_variable(&decl.name, decl.size, decl.initial, decl.force_array)?;
        }
        Ok(())
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }
}

// execution
impl Machine {
    /// Back to the first instruction with fresh memory, variables and registers.
    /// Returns whether the machine was running or waiting.
    pub fn reset(&mut self) -> bool {
        let span = tracing::debug_span!("reset");
        let _guard = span.enter();

        let was_running_or_waiting = self.is_running_or_waiting();
        let was_step = self.step_pending;
        self.running = false;
        self.step_pending = false;
        self.continue_on_resumption = false;
        self.resume_at = None;

        self.emulator.reset_execution();
        self.emulator.reset_memory();
        self.variables.fill(&mut self.emulator.memory);
        self.emulator.reset_registers();

        if was_running_or_waiting {
            let status = RunStatus {
                reset: true,
                ..RunStatus::default()
            };
            if was_step {
                self.observers.notify(|o| o.step_finished(status));
            } else {
                self.observers.notify(|o| o.stopped_running(status));
            }
        }
        self.observers.notify(|o| o.reset());
        self.emulator.ports.reset();
        tracing::debug!("machine reset");
        was_running_or_waiting
    }

    /// Starts a run. It continues through [`Machine::tick`] when it yields.
    pub fn run(&mut self) -> Result<(), MachineError> {
        if !self.compiled {
            return Err(MachineError::NotCompiled);
        }
        if self.is_running_or_waiting() {
            return Err(MachineError::Busy);
        }
        self.run_batch();
        Ok(())
    }

    fn run_batch(&mut self) {
        let span = tracing::info_span!("run");
        let _guard = span.enter();

        let resumed = self.running;
        self.running = true;
        self.step_pending = false;
        self.continue_on_resumption = false;
        self.resume_at = None;
        self.emulator.error = None;
        if !resumed {
            tracing::debug!("started running");
            self.observers.notify(|o| o.started_running());
        }

        let started = Instant::now();
        let time_slice = Duration::from_millis(self.config.time_slice_ms);
        let mut count = 0;
        while self.running
            && !self.emulator.error_occurred()
            && !self.emulator.halted
            && self.emulator.pending_io.is_none()
        {
            count += 1;
            if count > self.config.steps_per_check {
                count = 0;
                if started.elapsed() > time_slice {
                    let delay = Duration::from_millis(self.config.resume_delay_ms);
                    self.resume_at = Some(Instant::now() + delay);
                    tracing::trace!("time slice used up, yielding");
                    return;
                }
            }
            self.emulator.step(false);
            self.report_faults();
            if self.emulator.ports.take_reset_request() {
                self.reset();
                return;
            }
        }

        self.clear_debug_request();
        self.running = false;
        self.step_pending = false;
        self.continue_on_resumption = (self.emulator.halted || self.is_pending_io())
            && !self.emulator.error_occurred();
        let status = self.status();
        tracing::debug!(?status, "stopped running");
        self.observers.notify(|o| o.stopped_running(status));
    }

    /// Executes a single instruction, or delivers a single pending interrupt.
    pub fn step(&mut self) -> Result<(), MachineError> {
        if !self.compiled {
            return Err(MachineError::NotCompiled);
        }
        if self.is_running_or_waiting() {
            return Err(MachineError::Busy);
        }
        self.running = true;
        self.step_pending = false;
        self.continue_on_resumption = false;
        self.emulator.error = None;
        self.emulator.step(true);
        self.report_faults();
        self.running = false;
        if self.emulator.ports.take_reset_request() {
            self.reset();
            return Ok(());
        }
        self.clear_debug_request();
        self.step_pending = self.emulator.halted || self.is_pending_io();
        let status = self.status();
        self.observers.notify(|o| o.step_finished(status));
        Ok(())
    }

    /// Ends a run between two instructions.
    pub fn stop(&mut self) -> Result<(), MachineError> {
        if !self.compiled {
            return Err(MachineError::NotCompiled);
        }
        if self.emulator.halted {
            return Err(MachineError::Halted);
        }
        if self.is_pending_io() {
            return Err(MachineError::Busy);
        }
        if self.running {
            self.running = false;
            self.step_pending = false;
            self.continue_on_resumption = false;
            self.resume_at = None;
            let status = RunStatus {
                stop_called: true,
                ..self.status()
            };
            tracing::debug!("stop requested");
            self.observers.notify(|o| o.stopped_running(status));
        }
        Ok(())
    }

    /// Queues interrupt `number` (32..=255) and wakes the processor. A halted
    /// run continues right away; a halted step finishes.
    pub fn external_interrupt_request(&mut self, number: u32) -> Result<(), MachineError> {
        if !self.emulator.queue_interrupt(number) {
            return Err(MachineError::InterruptOutOfRange(number));
        }
        if !self.is_pending_io() {
            if self.step_pending {
                self.step_pending = false;
                self.continue_on_resumption = false;
                self.observers
                    .notify(|o| o.step_finished(RunStatus::default()));
            } else if self.continue_on_resumption {
                self.continue_on_resumption = false;
                if !self.running {
                    self.run_batch();
                }
            }
        }
        Ok(())
    }

    /// Completes the pending port transfer with the io buffer's contents.
    pub fn resume_from_io(&mut self) -> Result<(), MachineError> {
        if !self.is_pending_io() {
            return Err(MachineError::NotPendingIo);
        }
        let result = self.emulator.resume_from_io();
        self.report_faults();

        if self.step_pending {
            self.step_pending = false;
            self.continue_on_resumption = false;
            let status = self.status();
            self.observers.notify(|o| o.step_finished(status));
        } else if self.emulator.error_occurred() {
            self.continue_on_resumption = false;
            let status = self.status();
            self.observers.notify(|o| o.stopped_running(status));
        } else if self.continue_on_resumption {
            self.run_batch();
        }
        result?;
        Ok(())
    }

    /// Host callback: delivers due timer interrupts, applies a requested reset
    /// and continues a yielded run whose resume time has come.
    pub fn tick(&mut self, now: Instant) {
        for number in self.emulator.ports.poll(now) {
            tracing::debug!("timer interrupt {:#04X}", number);
            if let Err(e) = self.external_interrupt_request(u32::from(number)) {
                tracing::error!("{}", e);
            }
        }
        if self.emulator.ports.take_reset_request() {
            self.reset();
        }
        if self.resume_at.is_some_and(|at| at <= now) {
            self.resume_at = None;
            if self.running && !self.emulator.halted && !self.is_pending_io() {
                self.run_batch();
            }
        }
    }
}

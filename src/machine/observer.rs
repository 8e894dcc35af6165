use crate::emulator::parse::CompileError;
use crate::emulator::variables::{Variable, VariableError};
use crate::emulator::RuntimeError;
use serde::{Deserialize, Serialize};

/// Machine state carried by the stopped and step finished notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunStatus {
    /// the run ended because of a reset
    pub reset: bool,
    pub stop_called: bool,
    pub halted: bool,
    pub pending_io: bool,
    pub error_occurred: bool,
}

/// Receives machine notifications. Every method does nothing by default.
pub trait MachineObserver {
    fn compilation_finished(&mut self, _error_occurred: bool) {}
    fn compilation_error(&mut self, _error: &CompileError) {}
    fn reset(&mut self) {}
    fn runtime_error(&mut self, _error: &RuntimeError) {}
    fn started_running(&mut self) {}
    fn step_finished(&mut self, _status: RunStatus) {}
    fn stopped_running(&mut self, _status: RunStatus) {}
    fn variable_added(&mut self, _variable: &Variable) {}
    fn variable_removed(&mut self, _variable: &Variable) {}
    fn variable_error(&mut self, _error: &VariableError) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObserverId(u64);

/// Observers in attachment order.
#[derive(Default)]
pub struct ObserverSet {
    next_id: u64,
    observers: Vec<(ObserverId, Box<dyn MachineObserver>)>,
}

impl ObserverSet {
    pub fn attach(&mut self, observer: Box<dyn MachineObserver>) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, observer));
        id
    }

    pub fn detach(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(other, _)| *other != id);
        self.observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn notify(&mut self, mut event: impl FnMut(&mut dyn MachineObserver)) {
        for (_, observer) in &mut self.observers {
            event(observer.as_mut());
        }
    }
}

impl std::fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSet")
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Turns every notification into an `info!` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl MachineObserver for LoggingObserver {
    fn compilation_finished(&mut self, error_occurred: bool) {
        tracing::info!(error_occurred, "compilation finished");
    }

    fn compilation_error(&mut self, error: &CompileError) {
        tracing::info!("compilation error: {}", error);
    }

    fn reset(&mut self) {
        tracing::info!("machine reset");
    }

    fn runtime_error(&mut self, error: &RuntimeError) {
        tracing::info!("runtime error: {}", error);
    }

    fn started_running(&mut self) {
        tracing::info!("started running");
    }

    fn step_finished(&mut self, status: RunStatus) {
        tracing::info!(?status, "step finished");
    }

    fn stopped_running(&mut self, status: RunStatus) {
        tracing::info!(?status, "stopped running");
    }

    fn variable_added(&mut self, variable: &Variable) {
        tracing::info!(
            "variable added: {} ({} bytes, {:?})",
            variable.name,
            variable.size,
            variable.kind
        );
    }

    fn variable_removed(&mut self, variable: &Variable) {
        tracing::info!("variable removed: {}", variable.name);
    }

    fn variable_error(&mut self, error: &VariableError) {
        tracing::info!("variable error: {}", error);
    }
}

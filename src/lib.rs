#![warn(clippy::all, rust_2018_idioms)]

pub mod config;
pub mod emulator;
pub mod format;
pub mod machine;
pub mod ports;

pub use config::EmulatorConfig;
pub use emulator::Emulator;
pub use machine::{Machine, MachineError, MachineObserver};

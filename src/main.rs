#![warn(clippy::all, rust_2018_idioms)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use asm86::emulator::variables::{VariableDecl, VariableKind};
use asm86::emulator::Register;
use asm86::format::hex;
use asm86::machine::LoggingObserver;
use asm86::{EmulatorConfig, Machine};
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use web_time::Instant;

#[derive(Parser, Debug)]
#[command(name = "asm86", version, about = "Assemble and run a reduced x86 program")]
struct Cli {
    /// Assembly source file
    source: PathBuf,
    /// RON list of variable declarations
    #[arg(long, value_name = "FILE")]
    variables: Option<PathBuf>,
    /// RON machine configuration
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Data memory size in bytes (power of two)
    #[arg(long)]
    memory_size: Option<u32>,
    /// Single-step instead of running through the scheduler
    #[arg(long)]
    step: bool,
    /// Upper bound on single steps
    #[arg(long, default_value_t = 10_000)]
    max_steps: usize,
    /// Give up on a run after this long
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse variables: {0}")]
    Variables(#[from] ron::error::SpannedError),
    #[error(transparent)]
    Config(#[from] asm86::config::ConfigError),
    #[error(transparent)]
    Machine(#[from] asm86::MachineError),
}

fn read(path: &PathBuf) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.clone(),
        source,
    })
}

fn load_config(cli: &Cli) -> Result<EmulatorConfig, CliError> {
    let mut config = match &cli.config {
        Some(path) => EmulatorConfig::load(path)?,
        None => EmulatorConfig::default(),
    };
    if let Some(size) = cli.memory_size {
        config.memory_size = size;
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: &Cli) -> Result<Machine, CliError> {
    let config = load_config(cli)?;
    let mut machine = Machine::new(config)?;
    machine.attach(Box::new(LoggingObserver));

    if let Some(path) = &cli.variables {
        let declarations: Vec<VariableDecl> = ron::de::from_str(&read(path)?)?;
        machine.add_variables(declarations)?;
    }
    machine.compile(&read(&cli.source)?)?;

    if cli.step {
        for _ in 0..cli.max_steps {
            if let Some(instruction) = machine.instruction_at_address(machine.emulator().eip()) {
                tracing::info!("{:#010X}: {}", machine.emulator().eip(), instruction);
            }
            machine.step()?;
            if machine.is_running_or_waiting() || machine.emulator().error_occurred() {
                break;
            }
        }
        return Ok(machine);
    }

    let deadline = Instant::now() + Duration::from_millis(cli.timeout_ms);
    machine.run()?;
    loop {
        // a halted program may still be woken by an armed timer
        let Some(wakeup) = machine.next_wakeup() else {
            break;
        };
        if !machine.is_running() && !machine.will_continue_after_resumption() {
            break;
        }
        if wakeup > deadline {
            tracing::warn!("timed out after {} ms", cli.timeout_ms);
            if machine.is_running() {
                machine.stop()?;
            }
            break;
        }
        let now = Instant::now();
        if wakeup > now {
            std::thread::sleep(wakeup - now);
        }
        machine.tick(Instant::now());
    }
    Ok(machine)
}

fn print_state(machine: &Machine) {
    let emulator = machine.emulator();
    for register in [
        Register::Eax,
        Register::Ebx,
        Register::Ecx,
        Register::Edx,
        Register::Esi,
        Register::Edi,
        Register::Esp,
        Register::Ebp,
        Register::Eip,
    ] {
        println!("{:>4} {}", register.name(), hex(emulator.reg(register), 4));
    }
    let flags = emulator.flags;
    println!(
        "   C={} Z={} S={} O={} D={} I={}",
        u8::from(flags.carry),
        u8::from(flags.zero),
        u8::from(flags.sign),
        u8::from(flags.overflow),
        u8::from(flags.direction),
        u8::from(flags.interrupt),
    );

    for variable in machine.variables().iter() {
        let Some(bytes) = emulator.memory.slice(variable.address, variable.size) else {
            continue;
        };
        let shown = match variable.kind {
            VariableKind::Number => {
                let mut raw = [0u8; 4];
                let len = bytes.len().min(4);
                raw[..len].copy_from_slice(&bytes[..len]);
                hex(u32::from_le_bytes(raw), len as u32)
            }
            VariableKind::Array => bytes
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join(" "),
            VariableKind::String => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .take_while(|unit| *unit != 0)
                    .collect();
                format!("{:?}", String::from_utf16_lossy(&units))
            }
        };
        println!("{} = {}", variable.name, shown);
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(machine) => {
            print_state(&machine);
            if machine.emulator().error_occurred() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

//! Port devices.
//!
//! The default device maps a handful of ports:
//!
//! | port  | access | meaning                                             |
//! |-------|--------|-----------------------------------------------------|
//! | 0..4  | r      | wall clock in ms, refreshed by reading port 0        |
//! | 4..8  | r/w    | timer interval in ms                                 |
//! | 8..12 | r/w    | timer `i` armed; writing non-zero (re)arms, 0 stops  |
//! | 255   | w      | non-zero requests a machine reset                    |
//!
//! A timer that fires drops its port back to 0 and raises interrupt `0x20 + i`.

use std::fmt::Debug;
use std::time::Duration;
use web_time::{Instant, SystemTime, UNIX_EPOCH};

pub const TIMER_COUNT: usize = 4;
pub const FIRST_TIMER_INTERRUPT: u8 = 0x20;
pub const RESET_PORT: u32 = 255;

const CLOCK_PORT: usize = 0;
const INTERVAL_PORT: usize = 4;
const TIMER_PORT: usize = 8;
const PORT_MEMORY: usize = 16;

/// Host side of `in`/`out`.
///
/// Returning false from [`PortIo::input`] or [`PortIo::output`] means the
/// transfer cannot complete yet: the emulator waits in pending IO until the host
/// fills the io buffer (for input) and resumes it.
pub trait PortIo: Debug {
    /// Reads `size` bytes from `port` into the low bytes of `buffer`.
    fn input(&mut self, port: u32, buffer: &mut [u8; 4], size: u32) -> bool;

    /// Writes the low `size` bytes of `buffer` to `port`.
    fn output(&mut self, port: u32, buffer: &[u8; 4], size: u32) -> bool;

    /// Interrupts that became due by `now`, in firing order.
    fn poll(&mut self, _now: Instant) -> Vec<u8> {
        Vec::new()
    }

    /// Earliest moment `poll` could return something.
    fn next_deadline(&self) -> Option<Instant> {
        None
    }

    /// Whether the program asked for a machine reset since the last call.
    fn take_reset_request(&mut self) -> bool {
        false
    }

    /// Back to power-on state. Armed timers are cancelled.
    fn reset(&mut self) {}
}

fn wall_clock_ms() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u32)
        .unwrap_or(0)
}

/// Clock, four one-shot timers and the reset port.
#[derive(Debug, Clone)]
pub struct DefaultPorts {
    memory: [u8; PORT_MEMORY],
    timers: [Option<Instant>; TIMER_COUNT],
    reset_requested: bool,
    default_interval_ms: u32,
}

impl Default for DefaultPorts {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_TIMER_INTERVAL_MS)
    }
}

impl DefaultPorts {
    pub fn new(default_interval_ms: u32) -> Self {
        let mut ports = Self {
            memory: [0; PORT_MEMORY],
            timers: [None; TIMER_COUNT],
            reset_requested: false,
            default_interval_ms,
        };
        ports.reset();
        ports
    }

    fn word(&self, port: usize) -> u32 {
        u32::from_le_bytes([
            self.memory[port],
            self.memory[port + 1],
            self.memory[port + 2],
            self.memory[port + 3],
        ])
    }

    fn set_word(&mut self, port: usize, value: u32) {
        self.memory[port..port + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn interval_ms(&self) -> u32 {
        self.word(INTERVAL_PORT)
    }

    pub fn is_armed(&self, timer: usize) -> bool {
        self.timers.get(timer).is_some_and(|t| t.is_some())
    }

    fn rearm(&mut self, timer: usize, now: Instant) {
        let port = TIMER_PORT + timer;
        let interval = self.interval_ms();
        let enabled = self.memory[port] != 0 && interval != 0;
        self.memory[port] = u8::from(enabled);
        self.timers[timer] =
            enabled.then(|| now + Duration::from_millis(u64::from(interval)));
        tracing::trace!("timer {} armed: {}", timer, enabled);
    }
}

impl PortIo for DefaultPorts {
    fn input(&mut self, port: u32, buffer: &mut [u8; 4], _size: u32) -> bool {
        let value = match port as usize {
            CLOCK_PORT => {
                let now = wall_clock_ms();
                self.set_word(CLOCK_PORT, now);
                now
            }
            p if p < TIMER_PORT + TIMER_COUNT => self.word(p),
            _ => 0,
        };
        *buffer = value.to_le_bytes();
        true
    }

    fn output(&mut self, port: u32, buffer: &[u8; 4], size: u32) -> bool {
        let start = u64::from(port);
        let end = start + u64::from(size);
        // the clock is read only
        for (offset, byte) in buffer.iter().take(size as usize).enumerate() {
            let target = start + offset as u64;
            if (INTERVAL_PORT as u64..(TIMER_PORT + TIMER_COUNT) as u64).contains(&target) {
                self.memory[target as usize] = *byte;
            }
        }

        let now = Instant::now();
        for timer in 0..TIMER_COUNT {
            let port = (TIMER_PORT + timer) as u64;
            if start <= port && end > port {
                self.rearm(timer, now);
            }
        }

        let reset = u64::from(RESET_PORT);
        if start <= reset && end > reset && buffer[(reset - start) as usize] != 0 {
            tracing::info!("reset requested through port {}", RESET_PORT);
            self.reset_requested = true;
        }
        true
    }

    fn poll(&mut self, now: Instant) -> Vec<u8> {
        let mut fired = Vec::new();
        for timer in 0..TIMER_COUNT {
            if self.timers[timer].is_some_and(|deadline| deadline <= now) {
                self.timers[timer] = None;
                self.memory[TIMER_PORT + timer] = 0;
                fired.push(FIRST_TIMER_INTERRUPT + timer as u8);
            }
        }
        fired
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers.iter().flatten().min().copied()
    }

    fn take_reset_request(&mut self) -> bool {
        std::mem::take(&mut self.reset_requested)
    }

    fn reset(&mut self) {
        self.memory = [0; PORT_MEMORY];
        self.set_word(CLOCK_PORT, wall_clock_ms());
        self.set_word(INTERVAL_PORT, self.default_interval_ms);
        self.timers = [None; TIMER_COUNT];
        self.reset_requested = false;
    }
}

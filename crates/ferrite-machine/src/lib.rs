pub mod error;
pub mod interrupt;
pub mod time;
pub mod trap;

pub use error::*;
pub use interrupt::*;
pub use time::*;
pub use trap::*;

use log::trace;

pub struct MachineConfig {
    /// Ticks between two timer interrupts.
    pub timer_interval: u64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self { timer_interval: 1 }
    }
}

/// The single simulated processor: one interrupt line and one timer.
#[derive(Debug)]
pub struct Machine {
    pub interrupt: Interrupt,
    pub timer: Timer,
    pending: Option<TrapCause>,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Result<Self, MachineError> {
        Ok(Self {
            interrupt: Interrupt::new(),
            timer: Timer::new(config.timer_interval)?,
            pending: None,
        })
    }

    pub fn now(&self) -> SimulatedInstant {
        self.timer.now()
    }

    /// Advances the clock one tick. A due timer interrupt is returned for
    /// delivery when interrupts are enabled and held pending otherwise.
    pub fn tick(&mut self) -> Option<TrapCause> {
        if !self.timer.tick() {
            return None;
        }
        if self.interrupt.enabled() {
            Some(TrapCause::TimerInterrupt)
        } else {
            trace!("timer interrupt at {} pending", self.timer.now());
            self.pending = Some(TrapCause::TimerInterrupt);
            None
        }
    }

    /// Takes the pending interrupt, if any, once interrupts are enabled again.
    pub fn take_pending(&mut self) -> Option<TrapCause> {
        if self.interrupt.enabled() {
            self.pending.take()
        } else {
            None
        }
    }
}

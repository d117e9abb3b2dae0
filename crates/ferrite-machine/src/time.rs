use crate::error::MachineError;
use core::fmt;

/// Simulated time instant (monotonic)
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SimulatedInstant {
    ticks: u64,
}

impl SimulatedInstant {
    pub const ZERO: SimulatedInstant = SimulatedInstant { ticks: 0 };

    pub fn new(ticks: u64) -> Self {
        Self { ticks }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// The instant `delta` ticks after this one.
    pub fn after(&self, delta: u64) -> Self {
        Self {
            ticks: self.ticks.saturating_add(delta),
        }
    }

    pub fn ticks_since(&self, earlier: SimulatedInstant) -> u64 {
        self.ticks.saturating_sub(earlier.ticks)
    }
}

impl fmt::Display for SimulatedInstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.ticks)
    }
}

/// Monotonic tick counter with a periodic interrupt.
#[derive(Debug)]
pub struct Timer {
    now: SimulatedInstant,
    interval: u64,
    next_interrupt: u64,
}

impl Timer {
    pub fn new(interval: u64) -> Result<Self, MachineError> {
        if interval == 0 {
            return Err(MachineError::InvalidTimerInterval(interval));
        }
        Ok(Self {
            now: SimulatedInstant::ZERO,
            interval,
            next_interrupt: interval,
        })
    }

    pub fn now(&self) -> SimulatedInstant {
        self.now
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Advances the clock by one tick. Returns true when the periodic
    /// interrupt is due at the new time.
    pub fn tick(&mut self) -> bool {
        self.now = self.now.after(1);
        if self.now.ticks() >= self.next_interrupt {
            self.next_interrupt += self.interval;
            true
        } else {
            false
        }
    }
}

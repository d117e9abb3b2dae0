//! Timed sleep on top of the periodic timer interrupt.

use crate::thread::tcb::BlockReason;
use crate::types::ThreadHandle;
use crate::Kernel;
use ferrite_machine::{Machine, SimulatedInstant};
use log::debug;

/// Threads sleeping until a deadline, in the order they went to sleep.
#[derive(Debug, Default)]
pub struct Alarm {
    waiting: Vec<(ThreadHandle, SimulatedInstant)>,
}

impl Alarm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    pub fn deadline_of(&self, thread: ThreadHandle) -> Option<SimulatedInstant> {
        self.waiting
            .iter()
            .find(|(t, _)| *t == thread)
            .map(|(_, deadline)| *deadline)
    }

    pub fn add(&mut self, machine: &Machine, thread: ThreadHandle, deadline: SimulatedInstant) {
        assert!(machine.interrupt.disabled());
        self.waiting.push((thread, deadline));
    }

    /// Removes and returns every thread whose deadline has been reached.
    pub fn expire(&mut self, machine: &Machine) -> Vec<ThreadHandle> {
        assert!(machine.interrupt.disabled());
        let now = machine.now();
        let mut expired = Vec::new();
        self.waiting.retain(|(thread, deadline)| {
            if *deadline <= now {
                expired.push(*thread);
                false
            } else {
                true
            }
        });
        if !expired.is_empty() {
            debug!("alarm at {} wakes {:?}", now, expired);
        }
        expired
    }
}

impl Kernel {
    /// Puts the current thread to sleep for at least `ticks` ticks. It is
    /// made ready by the first timer interrupt at or after the deadline.
    pub fn wait_until(&mut self, ticks: u64) {
        if ticks == 0 {
            return;
        }
        let current = self.threads.current();

        let status = self.machine.interrupt.disable();
        let deadline = self.machine.now().after(ticks);
        self.alarm.add(&self.machine, current, deadline);
        self.threads.block_current(BlockReason::Alarm(deadline));
        self.dispatch();
        self.interrupt_restore(status);
    }

    /// Number of threads sleeping on the alarm.
    pub fn sleeping(&self) -> usize {
        self.alarm.len()
    }

    pub fn alarm_deadline(&self, thread: ThreadHandle) -> Option<SimulatedInstant> {
        self.alarm.deadline_of(thread)
    }
}

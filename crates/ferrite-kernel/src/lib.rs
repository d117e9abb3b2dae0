pub mod alarm;
pub mod error;
pub mod sched;
pub mod sync;
pub mod thread;
pub mod types;

use crate::alarm::Alarm;
use crate::error::KernelError;
use crate::sched::PriorityScheduler;
use crate::sync::{Condition, Lock};
use crate::thread::tcb::{BlockReason, ResumeAction, ThreadStatus};
use crate::types::{
    ConditionId, LockId, Priority, QueueId, ThreadHandle, PRIORITY_DEFAULT, PRIORITY_MAXIMUM,
    PRIORITY_MINIMUM,
};
use ferrite_machine::{
    InterruptStatus, Machine, MachineConfig, SimulatedInstant, TrapCause, TrapHandler,
};
use log::{debug, info};
use std::collections::HashMap;
use thread::ThreadManager;

#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    /// Ticks between two timer interrupts.
    pub timer_interval: u64,
    /// Priority of threads whose priority was never set.
    pub default_priority: Priority,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            timer_interval: 1,
            default_priority: PRIORITY_DEFAULT,
        }
    }
}

/// A single-processor kernel: the machine, the thread table, the priority
/// scheduler and the synchronization objects built on top of it.
///
/// The kernel is always entered on behalf of the current thread. Operations
/// that block mark the current thread and hand the processor to the next
/// ready one before returning, so after such a call `current_thread()`
/// names whoever runs now.
pub struct Kernel {
    pub(crate) machine: Machine,
    pub(crate) threads: ThreadManager,
    pub(crate) alarm: Alarm,
    pub(crate) locks: HashMap<LockId, Lock>,
    pub(crate) conditions: HashMap<ConditionId, Condition>,
    next_lock_id: u32,
    next_condition_id: u32,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Result<Self, KernelError> {
        if !(PRIORITY_MINIMUM..=PRIORITY_MAXIMUM).contains(&config.default_priority) {
            return Err(KernelError::InvalidConfig(format!(
                "default priority {} outside {}..={}",
                config.default_priority, PRIORITY_MINIMUM, PRIORITY_MAXIMUM
            )));
        }

        let mut machine = Machine::new(MachineConfig {
            timer_interval: config.timer_interval,
        })?;

        let status = machine.interrupt.disable();
        let threads = ThreadManager::new(&machine, config.default_priority);
        machine.interrupt.restore(status);

        info!(
            "kernel up: timer interval {} ticks, default priority {}",
            config.timer_interval, config.default_priority
        );

        Ok(Self {
            machine,
            threads,
            alarm: Alarm::new(),
            locks: HashMap::new(),
            conditions: HashMap::new(),
            next_lock_id: 1,
            next_condition_id: 1,
        })
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn now(&self) -> SimulatedInstant {
        self.machine.now()
    }

    pub fn scheduler(&self) -> &PriorityScheduler {
        &self.threads.scheduler
    }

    /// The running thread, or `None` while the processor idles.
    pub fn current_thread(&self) -> Option<ThreadHandle> {
        self.threads.current_thread
    }

    pub fn thread_status(&self, thread: ThreadHandle) -> Result<ThreadStatus, KernelError> {
        self.threads.status(thread)
    }

    pub fn thread_name(&self, thread: ThreadHandle) -> Result<&str, KernelError> {
        self.threads.tcb(thread).map(|tcb| tcb.name.as_str())
    }

    pub fn ready_queue(&self) -> QueueId {
        self.threads.ready_queue()
    }

    pub fn interrupt_disable(&mut self) -> InterruptStatus {
        self.machine.interrupt.disable()
    }

    pub fn interrupt_enable(&mut self) {
        self.interrupt_restore(InterruptStatus::Enabled);
    }

    /// Restores the interrupt status and delivers an interrupt that came
    /// due while they were off.
    pub fn interrupt_restore(&mut self, status: InterruptStatus) {
        self.machine.interrupt.restore(status);
        if let Some(cause) = self.machine.take_pending() {
            self.handle_trap(cause);
        }
    }

    /// Creates a thread at `priority` and makes it ready. The caller keeps
    /// running. A priority outside the valid range is fatal.
    pub fn fork(&mut self, name: &str, priority: Priority) -> ThreadHandle {
        assert!(
            (PRIORITY_MINIMUM..=PRIORITY_MAXIMUM).contains(&priority),
            "cannot fork {} at priority {}",
            name,
            priority
        );
        let status = self.machine.interrupt.disable();
        let handle = self.threads.fork(&self.machine, name, priority);
        self.interrupt_restore(status);
        handle
    }

    /// Gives up the processor to the best ready thread, which may be the
    /// caller itself.
    pub fn yield_now(&mut self) {
        let status = self.machine.interrupt.disable();
        self.threads.yield_current(&self.machine);
        self.dispatch();
        self.interrupt_restore(status);
    }

    /// Ends the current thread and wakes everything joining it.
    pub fn finish(&mut self) {
        let status = self.machine.interrupt.disable();
        let finished = self.threads.finish_current(&self.machine);

        let held: Vec<LockId> = self
            .locks
            .values()
            .filter(|lock| lock.holder == Some(finished))
            .map(|lock| lock.id)
            .collect();
        assert!(
            held.is_empty(),
            "{} finished while holding {:?}",
            finished,
            held
        );

        self.dispatch();
        self.threads.scheduler.discard(&self.machine, finished);
        self.interrupt_restore(status);
    }

    /// Blocks the current thread until `thread` has finished. Joiners
    /// donate their priority to the thread they wait for.
    pub fn join(&mut self, thread: ThreadHandle) -> Result<(), KernelError> {
        let tcb = self.threads.tcb(thread)?;
        let current = self.threads.current();
        assert!(thread != current, "{} cannot join itself", current);
        if tcb.is_finished() {
            return Ok(());
        }
        let join_queue = tcb.join_queue;

        let status = self.machine.interrupt.disable();
        self.threads
            .scheduler
            .wait_for_access(&self.machine, join_queue, current);
        self.threads.block_current(BlockReason::Join(thread));
        self.dispatch();
        self.interrupt_restore(status);
        Ok(())
    }

    /// Base priority of `thread`. Interrupts must be disabled.
    pub fn get_priority(&self, thread: ThreadHandle) -> Result<Priority, KernelError> {
        self.live_thread(thread)?;
        Ok(self.threads.scheduler.get_priority(&self.machine, thread))
    }

    /// Priority of `thread` including donations. Interrupts must be disabled.
    pub fn get_effective_priority(&self, thread: ThreadHandle) -> Result<Priority, KernelError> {
        self.live_thread(thread)?;
        Ok(self
            .threads
            .scheduler
            .get_effective_priority(&self.machine, thread))
    }

    /// Sets the base priority of `thread`. Interrupts must be disabled and
    /// `priority` must lie in `PRIORITY_MINIMUM..=PRIORITY_MAXIMUM`.
    pub fn set_priority(
        &mut self,
        thread: ThreadHandle,
        priority: Priority,
    ) -> Result<(), KernelError> {
        self.live_thread(thread)?;
        self.threads
            .scheduler
            .set_priority(&self.machine, thread, priority);
        Ok(())
    }

    /// Raises the current thread's priority by one. Returns false if it is
    /// already at the maximum.
    pub fn increase_priority(&mut self) -> bool {
        self.step_priority(1)
    }

    /// Lowers the current thread's priority by one. Returns false if it is
    /// already at the minimum.
    pub fn decrease_priority(&mut self) -> bool {
        self.step_priority(-1)
    }

    /// Runs the clock forward, delivering every timer interrupt that comes
    /// due on the way.
    pub fn advance(&mut self, ticks: u64) {
        for _ in 0..ticks {
            if let Some(cause) = self.machine.tick() {
                self.handle_trap(cause);
            }
        }
    }

    /// Describes a queue and logs it. Interrupts must be disabled.
    pub fn dump_queue(&self, queue: QueueId) -> String {
        let line = self.threads.scheduler.describe(&self.machine, queue);
        debug!("{}", line);
        line
    }

    /// A finished thread has no scheduling state left to query.
    fn live_thread(&self, thread: ThreadHandle) -> Result<(), KernelError> {
        if self.threads.tcb(thread)?.is_finished() {
            return Err(KernelError::ThreadFinished(thread));
        }
        Ok(())
    }

    fn step_priority(&mut self, delta: Priority) -> bool {
        let status = self.machine.interrupt.disable();
        let current = self.threads.current();
        let priority = self.threads.scheduler.get_priority(&self.machine, current);
        let target = priority + delta;

        let changed = (PRIORITY_MINIMUM..=PRIORITY_MAXIMUM).contains(&target);
        if changed {
            self.threads
                .scheduler
                .set_priority(&self.machine, current, target);
        }
        self.interrupt_restore(status);
        changed
    }

    /// Hands the processor to the best ready thread, or idles it.
    ///
    /// A thread woken from a condition variable takes its lock back here;
    /// if the lock is busy it waits for it instead and the next ready
    /// thread is tried.
    pub(crate) fn dispatch(&mut self) {
        while let Some(next) = self.threads.next_to_run(&self.machine) {
            if let Some(ResumeAction::Reacquire(lock)) = self.threads.take_resume(next) {
                if !self.reacquire(lock, next) {
                    continue;
                }
            }
            self.threads.switch_to(Some(next));
            return;
        }
        self.threads.switch_to(None);
    }

    fn timer_interrupt(&mut self) {
        let status = self.machine.interrupt.disable();
        for thread in self.alarm.expire(&self.machine) {
            self.threads.ready(&self.machine, thread);
        }
        self.threads.yield_current(&self.machine);
        self.dispatch();
        self.machine.interrupt.restore(status);
    }
}

impl TrapHandler for Kernel {
    fn handle_trap(&mut self, cause: TrapCause) {
        match cause {
            TrapCause::TimerInterrupt => {
                // Preemption point: wake sleepers, then yield the current thread
                self.timer_interrupt();
            }
        }
    }
}

//! Priority scheduler.
//!
//! The next thread handed out by a queue always has an effective priority no
//! lower than any other waiter's; among equals the one that waited longest
//! wins. Queues created with `transfers_priority` donate their waiters'
//! priority to the owning thread, transitively.
//!
//! Every operation that touches a queue or a thread's state must be called
//! with interrupts disabled.

mod donate;
pub mod queue;
pub mod state;

use crate::types::{
    Priority, QueueId, ThreadHandle, PRIORITY_DEFAULT, PRIORITY_MAXIMUM, PRIORITY_MINIMUM,
};
use ferrite_machine::Machine;
use log::debug;
use queue::{WaitQueue, Waiter};
use std::collections::HashMap;
use std::fmt::Write;

pub use state::ThreadState;

pub struct PriorityScheduler {
    queues: HashMap<QueueId, WaitQueue>,
    states: HashMap<ThreadHandle, ThreadState>,
    default_priority: Priority,
    next_queue_id: u32,
    next_seq: u64,
}

impl Default for PriorityScheduler {
    fn default() -> Self {
        Self::new(PRIORITY_DEFAULT)
    }
}

fn assert_disabled(machine: &Machine) {
    assert!(
        machine.interrupt.disabled(),
        "scheduler entered with interrupts enabled"
    );
}

fn assert_in_range(priority: Priority) {
    assert!(
        (PRIORITY_MINIMUM..=PRIORITY_MAXIMUM).contains(&priority),
        "priority {} outside {}..={}",
        priority,
        PRIORITY_MINIMUM,
        PRIORITY_MAXIMUM
    );
}

impl PriorityScheduler {
    pub fn new(default_priority: Priority) -> Self {
        assert_in_range(default_priority);
        Self {
            queues: HashMap::new(),
            states: HashMap::new(),
            default_priority,
            next_queue_id: 1,
            next_seq: 0,
        }
    }

    /// Allocate a new wait queue.
    ///
    /// `transfers_priority` selects whether waiting threads donate their
    /// priority to the queue's owner.
    pub fn new_thread_queue(&mut self, transfers_priority: bool) -> QueueId {
        let id = QueueId::new(self.next_queue_id);
        self.next_queue_id += 1;
        self.queues.insert(id, WaitQueue::new(transfers_priority));
        debug!("created {} (transfers priority: {})", id, transfers_priority);
        id
    }

    pub fn queue(&self, id: QueueId) -> Option<&WaitQueue> {
        self.queues.get(&id)
    }

    /// Scheduling state of `thread`, if it has been created yet.
    pub fn thread_state(&self, thread: ThreadHandle) -> Option<&ThreadState> {
        self.states.get(&thread)
    }

    /// Records `thread` as waiting for access to `queue`. The caller blocks
    /// the thread afterwards.
    pub fn wait_for_access(&mut self, machine: &Machine, queue: QueueId, thread: ThreadHandle) {
        assert_disabled(machine);
        self.assert_acyclic(queue, thread);

        let now = machine.now();
        let seq = self.next_seq;
        self.next_seq += 1;

        self.state_mut(thread).start_waiting(queue);
        self.queue_mut(queue).push(Waiter {
            thread,
            enqueued_at: now,
            seq,
        });

        if let Some(owner) = self.donate_to_owner(queue) {
            self.propagate_from(owner);
        }
    }

    /// Makes `thread` the owner of `queue` without waiting.
    pub fn acquire(&mut self, machine: &Machine, queue: QueueId, thread: ThreadHandle) {
        assert_disabled(machine);
        self.give_to(queue, Some(thread));
    }

    /// Hands `queue` to its best waiter and returns it. An empty queue ends
    /// up without an owner.
    pub fn next_thread(&mut self, machine: &Machine, queue: QueueId) -> Option<ThreadHandle> {
        assert_disabled(machine);

        let Some(index) = self.queue_ref(queue).best(|t| self.effective_of(t)) else {
            self.give_to(queue, None);
            return None;
        };
        let waiter = self.queue_mut(queue).remove(index);
        self.state_mut(waiter.thread).stop_waiting();
        self.give_to(queue, Some(waiter.thread));
        Some(waiter.thread)
    }

    /// The thread `next_thread` would return, without changing anything.
    pub fn pick_next_thread(&self, queue: QueueId) -> Option<ThreadHandle> {
        let wait_queue = self.queue_ref(queue);
        wait_queue
            .best(|t| self.effective_of(t))
            .and_then(|index| wait_queue.waiters().nth(index))
            .map(|w| w.thread)
    }

    /// Base priority of `thread`. A thread without state reports the
    /// default; reading never creates state.
    pub fn get_priority(&self, machine: &Machine, thread: ThreadHandle) -> Priority {
        assert_disabled(machine);
        self.states
            .get(&thread)
            .map(ThreadState::priority)
            .unwrap_or(self.default_priority)
    }

    pub fn get_effective_priority(&self, machine: &Machine, thread: ThreadHandle) -> Priority {
        assert_disabled(machine);
        self.effective_of(thread)
    }

    /// Sets the base priority of `thread`. A priority outside
    /// `PRIORITY_MINIMUM..=PRIORITY_MAXIMUM` is a fatal caller error.
    ///
    /// A thread that is waiting re-donates its new effective priority along
    /// the chain of owners it is blocked behind.
    pub fn set_priority(&mut self, machine: &Machine, thread: ThreadHandle, priority: Priority) {
        assert_disabled(machine);
        assert_in_range(priority);

        let state = self.state_mut(thread);
        if state.priority() == priority {
            return;
        }
        state.set_priority(priority);
        self.propagate_from(thread);
    }

    /// Drops the scheduling state of a thread that has finished. Queues it
    /// still owns are left without an owner.
    pub fn discard(&mut self, machine: &Machine, thread: ThreadHandle) {
        assert_disabled(machine);
        let Some(state) = self.states.remove(&thread) else {
            return;
        };
        assert!(
            state.waiting_on().is_none(),
            "{} discarded while waiting",
            thread
        );
        for queue in state.owned_resources() {
            if let Some(wait_queue) = self.queues.get_mut(queue) {
                if wait_queue.owner() == Some(thread) {
                    wait_queue.set_owner(None);
                }
            }
        }
    }

    /// One-line description of a queue: owner, then waiters in the order
    /// they would be served. Interrupts must be disabled.
    pub fn describe(&self, machine: &Machine, queue: QueueId) -> String {
        assert_disabled(machine);
        let wait_queue = self.queue_ref(queue);
        let mut out = format!("{queue} owner=");
        match wait_queue.owner() {
            Some(owner) => {
                let _ = write!(out, "{owner}");
            }
            None => out.push('-'),
        }
        out.push_str(" waiters=[");
        let ranked = wait_queue.ranked(|t| self.effective_of(t));
        for (i, (waiter, priority)) in ranked.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            let _ = write!(
                out,
                "{}(p{},{})",
                waiter.thread, priority, waiter.enqueued_at
            );
        }
        out.push(']');
        out
    }

    /// Transfers ownership of `queue`. The previous owner stops receiving
    /// its donation; the new owner folds in the remaining waiters.
    fn give_to(&mut self, queue: QueueId, owner: Option<ThreadHandle>) {
        let previous = self.queue_mut(queue).set_owner(owner);

        if let Some(previous) = previous.filter(|p| Some(*p) != owner) {
            if let Some(state) = self.states.get_mut(&previous) {
                state.release(queue);
                self.propagate_from(previous);
            }
        }

        if let Some(owner) = owner {
            debug_assert!(!self.queue_ref(queue).contains(owner));
            self.state_mut(owner).acquire(queue);
            if let Some(owner) = self.donate_to_owner(queue) {
                self.propagate_from(owner);
            }
        }
    }

    fn effective_of(&self, thread: ThreadHandle) -> Priority {
        self.states
            .get(&thread)
            .map(ThreadState::effective_priority)
            .unwrap_or(self.default_priority)
    }

    /// State of `thread`, created on first access.
    fn state_mut(&mut self, thread: ThreadHandle) -> &mut ThreadState {
        let default_priority = self.default_priority;
        self.states
            .entry(thread)
            .or_insert_with(|| ThreadState::new(default_priority))
    }

    fn queue_ref(&self, queue: QueueId) -> &WaitQueue {
        match self.queues.get(&queue) {
            Some(wait_queue) => wait_queue,
            None => panic!("unknown wait queue {queue}"),
        }
    }

    fn queue_mut(&mut self, queue: QueueId) -> &mut WaitQueue {
        match self.queues.get_mut(&queue) {
            Some(wait_queue) => wait_queue,
            None => panic!("unknown wait queue {queue}"),
        }
    }
}

//! Priority donation along the wait-for chain.
//!
//! A thread's effective priority is its base priority raised by the highest
//! effective priority waiting on any priority-transferring queue it owns.
//! Each owner caches one donation value per owned queue; whenever an input
//! changes, the owner is recomputed and the change is pushed to whoever owns
//! the queue that owner is waiting on, until nothing changes.

use super::{PriorityScheduler, ThreadState};
use crate::types::{QueueId, ThreadHandle, PRIORITY_MINIMUM};
use log::trace;

impl PriorityScheduler {
    /// Refreshes the donation `queue` makes to its owner and returns the
    /// owner, or `None` when nothing crosses the queue.
    pub(super) fn donate_to_owner(&mut self, queue: QueueId) -> Option<ThreadHandle> {
        let wait_queue = self.queues.get(&queue)?;
        if !wait_queue.transfers_priority() {
            return None;
        }
        let owner = wait_queue.owner()?;
        let donation = wait_queue
            .waiters()
            .map(|w| self.effective_of(w.thread))
            .max()
            .unwrap_or(PRIORITY_MINIMUM);
        self.state_mut(owner).donate(queue, donation);
        Some(owner)
    }

    /// Recomputes `start`'s effective priority and walks the owner chain for
    /// as long as effective priorities keep changing.
    ///
    /// Every step moves to the owner of the queue the previous thread waits
    /// on, so an acyclic ownership graph visits each thread at most once.
    pub(super) fn propagate_from(&mut self, start: ThreadHandle) {
        let bound = self.states.len();
        let mut thread = start;

        for _ in 0..=bound {
            let state = self.state_mut(thread);
            let effective = state.recompute();
            if effective == state.effective_priority() {
                return;
            }
            trace!(
                "{} effective priority {} -> {}",
                thread,
                state.effective_priority(),
                effective
            );
            state.set_effective(effective);

            let Some(queue) = state.waiting_on() else {
                return;
            };
            match self.donate_to_owner(queue) {
                Some(owner) => thread = owner,
                None => return,
            }
        }

        panic!("priority donation from {start} does not terminate");
    }

    /// Panics if `thread` waiting on `queue` would close a cycle of
    /// priority-transferring ownership.
    pub(super) fn assert_acyclic(&self, queue: QueueId, thread: ThreadHandle) {
        let mut next = Some(queue);
        for _ in 0..=self.states.len() {
            let Some(wait_queue) = next.and_then(|q| self.queues.get(&q)) else {
                return;
            };
            if !wait_queue.transfers_priority() {
                return;
            }
            let Some(owner) = wait_queue.owner() else {
                return;
            };
            assert!(
                owner != thread,
                "{thread} waiting on {queue} closes an ownership cycle"
            );
            next = self.states.get(&owner).and_then(ThreadState::waiting_on);
        }
        panic!("wait-for chain from {queue} does not terminate");
    }
}

#[cfg(test)]
mod tests {
    use crate::sched::PriorityScheduler;
    use crate::types::ThreadHandle;
    use ferrite_machine::{Machine, MachineConfig};

    fn thread(id: u32) -> ThreadHandle {
        ThreadHandle::new(id).unwrap()
    }

    fn machine() -> Machine {
        let mut machine = Machine::new(MachineConfig::default()).unwrap();
        machine.interrupt.disable();
        machine
    }

    #[test]
    fn donation_reaches_the_end_of_a_long_chain() {
        let machine = machine();
        let mut sched = PriorityScheduler::new(1);

        // T1 owns Q1, T2 waits on Q1 and owns Q2, ... T6 waits on Q5.
        let queues: Vec<_> = (0..5).map(|_| sched.new_thread_queue(true)).collect();
        for (i, queue) in queues.iter().enumerate() {
            sched.acquire(&machine, *queue, thread(i as u32 + 1));
        }
        for (i, queue) in queues.iter().enumerate() {
            sched.wait_for_access(&machine, *queue, thread(i as u32 + 2));
        }
        sched.set_priority(&machine, thread(6), 5);

        for id in 1..=6 {
            assert_eq!(sched.get_effective_priority(&machine, thread(id)), 5);
        }

        sched.set_priority(&machine, thread(6), 2);
        for id in 1..=6 {
            assert_eq!(sched.get_effective_priority(&machine, thread(id)), 2);
        }
    }

    #[test]
    fn non_transferring_queue_stops_the_walk() {
        let machine = machine();
        let mut sched = PriorityScheduler::new(1);
        let lock = sched.new_thread_queue(true);
        let plain = sched.new_thread_queue(false);

        sched.acquire(&machine, lock, thread(1));
        sched.acquire(&machine, plain, thread(2));
        sched.wait_for_access(&machine, lock, thread(2));
        sched.wait_for_access(&machine, plain, thread(3));
        sched.set_priority(&machine, thread(3), 7);

        assert_eq!(sched.get_effective_priority(&machine, thread(2)), 1);
        assert_eq!(sched.get_effective_priority(&machine, thread(1)), 1);
    }

    #[test]
    #[should_panic(expected = "ownership cycle")]
    fn ownership_cycle_is_fatal() {
        let machine = machine();
        let mut sched = PriorityScheduler::new(1);
        let a = sched.new_thread_queue(true);
        let b = sched.new_thread_queue(true);

        sched.acquire(&machine, a, thread(1));
        sched.acquire(&machine, b, thread(2));
        sched.wait_for_access(&machine, b, thread(1));
        sched.wait_for_access(&machine, a, thread(2));
    }
}

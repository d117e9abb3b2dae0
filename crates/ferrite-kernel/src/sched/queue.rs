use crate::types::{Priority, ThreadHandle};
use core::cmp::Reverse;
use ferrite_machine::SimulatedInstant;

/// A thread parked in a [`WaitQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiter {
    pub thread: ThreadHandle,
    pub enqueued_at: SimulatedInstant,
    /// Scheduler-wide arrival counter, breaks ties between equal instants.
    pub(crate) seq: u64,
}

impl Waiter {
    /// Ranking key: higher priority first, then earlier arrival.
    fn rank(&self, priority: Priority) -> (Priority, Reverse<SimulatedInstant>, Reverse<u64>) {
        (priority, Reverse(self.enqueued_at), Reverse(self.seq))
    }
}

/// Threads waiting for one resource, plus the thread that currently owns it.
///
/// Waiters are kept in arrival order. Their effective priorities can change
/// while they wait, so the ranking is evaluated when a waiter is selected
/// instead of being frozen into the container at insertion time.
#[derive(Debug)]
pub struct WaitQueue {
    transfers_priority: bool,
    owner: Option<ThreadHandle>,
    waiters: Vec<Waiter>,
}

impl WaitQueue {
    pub fn new(transfers_priority: bool) -> Self {
        Self {
            transfers_priority,
            owner: None,
            waiters: Vec::new(),
        }
    }

    /// Whether waiters donate their priority to the owner.
    pub fn transfers_priority(&self) -> bool {
        self.transfers_priority
    }

    pub fn owner(&self) -> Option<ThreadHandle> {
        self.owner
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Waiters in arrival order.
    pub fn waiters(&self) -> impl Iterator<Item = &Waiter> + '_ {
        self.waiters.iter()
    }

    pub fn contains(&self, thread: ThreadHandle) -> bool {
        self.waiters.iter().any(|w| w.thread == thread)
    }

    pub(crate) fn push(&mut self, waiter: Waiter) {
        assert!(
            !self.contains(waiter.thread),
            "{} is already waiting on this queue",
            waiter.thread
        );
        self.waiters.push(waiter);
    }

    /// Replaces the owner, returning the previous one.
    pub(crate) fn set_owner(&mut self, owner: Option<ThreadHandle>) -> Option<ThreadHandle> {
        core::mem::replace(&mut self.owner, owner)
    }

    /// Index of the waiter that should be served next.
    pub(crate) fn best<F>(&self, effective: F) -> Option<usize>
    where
        F: Fn(ThreadHandle) -> Priority,
    {
        self.waiters
            .iter()
            .enumerate()
            .max_by_key(|(_, w)| w.rank(effective(w.thread)))
            .map(|(index, _)| index)
    }

    pub(crate) fn remove(&mut self, index: usize) -> Waiter {
        self.waiters.remove(index)
    }

    /// Waiters ordered the way `next_thread` would hand them out, assuming
    /// no priority changes in between.
    pub(crate) fn ranked<F>(&self, effective: F) -> Vec<(Waiter, Priority)>
    where
        F: Fn(ThreadHandle) -> Priority,
    {
        let mut ranked: Vec<_> = self
            .waiters
            .iter()
            .map(|w| (*w, effective(w.thread)))
            .collect();
        ranked.sort_by_key(|(w, p)| Reverse(w.rank(*p)));
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waiter(id: u32, at: u64, seq: u64) -> Waiter {
        Waiter {
            thread: ThreadHandle::new(id).unwrap(),
            enqueued_at: SimulatedInstant::new(at),
            seq,
        }
    }

    #[test]
    fn best_prefers_priority_then_arrival() {
        let mut queue = WaitQueue::new(false);
        queue.push(waiter(1, 0, 0));
        queue.push(waiter(2, 0, 1));
        queue.push(waiter(3, 5, 2));

        let priority = |t: ThreadHandle| if t.val() == 1 { 1 } else { 4 };
        let index = queue.best(priority).unwrap();
        assert_eq!(queue.remove(index).thread.val(), 2);
        let index = queue.best(priority).unwrap();
        assert_eq!(queue.remove(index).thread.val(), 3);
        let index = queue.best(priority).unwrap();
        assert_eq!(queue.remove(index).thread.val(), 1);
        assert_eq!(queue.best(priority), None);
    }

    #[test]
    fn ranked_matches_selection_order() {
        let mut queue = WaitQueue::new(true);
        for (seq, id) in [4, 1, 3, 2].into_iter().enumerate() {
            queue.push(waiter(id, seq as u64, seq as u64));
        }
        let priority = |t: ThreadHandle| (t.val() % 2) as Priority;
        let order: Vec<u32> = queue
            .ranked(priority)
            .iter()
            .map(|(w, _)| w.thread.val())
            .collect();
        assert_eq!(order, vec![1, 3, 4, 2]);
    }

    #[test]
    #[should_panic(expected = "already waiting")]
    fn a_thread_waits_at_most_once() {
        let mut queue = WaitQueue::new(false);
        queue.push(waiter(1, 0, 0));
        queue.push(waiter(1, 1, 1));
    }
}

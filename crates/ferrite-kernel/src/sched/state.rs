use crate::types::{Priority, QueueId};
use std::collections::HashMap;

/// Per-thread scheduling state: base priority, the queues the thread owns,
/// the donation each owned queue currently contributes, and the queue it is
/// waiting on, if any.
#[derive(Debug)]
pub struct ThreadState {
    priority: Priority,
    effective: Priority,
    owned: Vec<QueueId>,
    donations: HashMap<QueueId, Priority>,
    waiting_on: Option<QueueId>,
}

impl ThreadState {
    pub fn new(priority: Priority) -> Self {
        Self {
            priority,
            effective: priority,
            owned: Vec::new(),
            donations: HashMap::new(),
            waiting_on: None,
        }
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Cached effective priority. Kept current by the donation walk.
    pub fn effective_priority(&self) -> Priority {
        self.effective
    }

    /// Owned queues in acquisition order.
    pub fn owned_resources(&self) -> &[QueueId] {
        &self.owned
    }

    pub fn donation(&self, queue: QueueId) -> Option<Priority> {
        self.donations.get(&queue).copied()
    }

    pub fn waiting_on(&self) -> Option<QueueId> {
        self.waiting_on
    }

    pub(crate) fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    pub(crate) fn set_effective(&mut self, effective: Priority) {
        self.effective = effective;
    }

    pub(crate) fn start_waiting(&mut self, queue: QueueId) {
        assert!(
            self.waiting_on.is_none(),
            "thread already waits on {:?}",
            self.waiting_on
        );
        self.waiting_on = Some(queue);
    }

    pub(crate) fn stop_waiting(&mut self) {
        self.waiting_on = None;
    }

    pub(crate) fn acquire(&mut self, queue: QueueId) {
        if !self.owned.contains(&queue) {
            self.owned.push(queue);
        }
    }

    /// Forgets `queue` and whatever it donated.
    pub(crate) fn release(&mut self, queue: QueueId) {
        self.owned.retain(|q| *q != queue);
        self.donations.remove(&queue);
    }

    pub(crate) fn donate(&mut self, queue: QueueId, priority: Priority) {
        debug_assert!(self.owned.contains(&queue));
        self.donations.insert(queue, priority);
    }

    /// Base priority raised by every cached donation.
    pub(crate) fn recompute(&self) -> Priority {
        self.donations
            .values()
            .copied()
            .fold(self.priority, Priority::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recompute_takes_highest_donation() {
        let mut state = ThreadState::new(2);
        assert_eq!(state.recompute(), 2);

        state.acquire(QueueId::new(1));
        state.acquire(QueueId::new(2));
        state.donate(QueueId::new(1), 1);
        assert_eq!(state.recompute(), 2);
        state.donate(QueueId::new(2), 6);
        assert_eq!(state.recompute(), 6);

        state.release(QueueId::new(2));
        assert_eq!(state.recompute(), 2);
        assert_eq!(state.owned_resources(), &[QueueId::new(1)]);
    }

    #[test]
    fn acquire_keeps_insertion_order_without_duplicates() {
        let mut state = ThreadState::new(1);
        state.acquire(QueueId::new(3));
        state.acquire(QueueId::new(1));
        state.acquire(QueueId::new(3));
        assert_eq!(state.owned_resources(), &[QueueId::new(3), QueueId::new(1)]);
    }
}

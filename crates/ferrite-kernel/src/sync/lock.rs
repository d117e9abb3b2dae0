use crate::error::KernelError;
use crate::thread::tcb::BlockReason;
use crate::types::{LockId, QueueId, ThreadHandle};
use crate::Kernel;
use log::debug;

/// Mutual exclusion lock. Waiters queue on a priority-transferring wait
/// queue, so a holder runs at least at the priority of whoever waits for it.
#[derive(Debug)]
pub struct Lock {
    pub id: LockId,
    pub holder: Option<ThreadHandle>,
    pub queue: QueueId,
}

impl Lock {
    pub fn new(id: LockId, queue: QueueId) -> Self {
        Self {
            id,
            holder: None,
            queue,
        }
    }
}

impl Kernel {
    pub fn create_lock(&mut self) -> LockId {
        let id = LockId::new(self.next_lock_id);
        self.next_lock_id += 1;
        let queue = self.threads.scheduler.new_thread_queue(true);
        self.locks.insert(id, Lock::new(id, queue));
        id
    }

    /// Takes the lock, blocking the current thread while someone else
    /// holds it.
    pub fn lock_acquire(&mut self, id: LockId) -> Result<(), KernelError> {
        let lock = self.locks.get_mut(&id).ok_or(KernelError::NoSuchLock(id))?;
        let current = self.threads.current();
        assert!(
            lock.holder != Some(current),
            "{} acquiring {} it already holds",
            current,
            id
        );

        let status = self.machine.interrupt.disable();
        let (holder, queue) = (lock.holder, lock.queue);
        match holder {
            None => {
                self.threads
                    .scheduler
                    .acquire(&self.machine, queue, current);
                lock.holder = Some(current);
                debug!("{} acquired {}", current, id);
            }
            Some(holder) => {
                debug!("{} waits for {} held by {}", current, id, holder);
                self.threads
                    .scheduler
                    .wait_for_access(&self.machine, queue, current);
                self.threads.block_current(BlockReason::Lock(id));
                self.dispatch();
            }
        }
        self.interrupt_restore(status);
        Ok(())
    }

    /// Releases the lock and hands it to the best waiter, if any. The
    /// caller keeps running.
    pub fn lock_release(&mut self, id: LockId) -> Result<(), KernelError> {
        let lock = self.locks.get(&id).ok_or(KernelError::NoSuchLock(id))?;
        let current = self.threads.current();
        assert!(
            lock.holder == Some(current),
            "{} releasing {} held by {:?}",
            current,
            id,
            lock.holder
        );

        let status = self.machine.interrupt.disable();
        self.hand_off(id);
        self.interrupt_restore(status);
        Ok(())
    }

    pub fn lock_is_held_by_current_thread(&self, id: LockId) -> Result<bool, KernelError> {
        let lock = self.locks.get(&id).ok_or(KernelError::NoSuchLock(id))?;
        Ok(lock.holder.is_some() && lock.holder == self.threads.current_thread)
    }

    pub fn lock_holder(&self, id: LockId) -> Result<Option<ThreadHandle>, KernelError> {
        self.locks
            .get(&id)
            .map(|lock| lock.holder)
            .ok_or(KernelError::NoSuchLock(id))
    }

    /// Threads waiting for the lock, in the order they would get it.
    pub fn lock_waiters(&self, id: LockId) -> Result<Vec<ThreadHandle>, KernelError> {
        let lock = self.locks.get(&id).ok_or(KernelError::NoSuchLock(id))?;
        Ok(self.queue_order(lock.queue))
    }

    pub fn lock_queue(&self, id: LockId) -> Result<QueueId, KernelError> {
        self.locks
            .get(&id)
            .map(|lock| lock.queue)
            .ok_or(KernelError::NoSuchLock(id))
    }

    /// Passes the lock to its next waiter and readies it. Interrupts must
    /// be disabled.
    pub(crate) fn hand_off(&mut self, id: LockId) {
        let lock = match self.locks.get_mut(&id) {
            Some(lock) => lock,
            None => panic!("unknown lock {id}"),
        };
        let next = self.threads.scheduler.next_thread(&self.machine, lock.queue);
        lock.holder = next;
        match next {
            Some(next) => {
                debug!("{} handed to {}", id, next);
                self.threads.ready(&self.machine, next);
            }
            None => debug!("{} released", id),
        }
    }

    /// Takes the lock for a thread that is being dispatched. If it is busy
    /// the thread waits for it instead and `false` is returned.
    pub(crate) fn reacquire(&mut self, id: LockId, thread: ThreadHandle) -> bool {
        let lock = match self.locks.get_mut(&id) {
            Some(lock) => lock,
            None => panic!("unknown lock {id}"),
        };
        let (holder, queue) = (lock.holder, lock.queue);
        match holder {
            None => {
                self.threads
                    .scheduler
                    .acquire(&self.machine, queue, thread);
                lock.holder = Some(thread);
                debug!("{} reacquired {}", thread, id);
                true
            }
            Some(holder) => {
                assert!(holder != thread, "{} already holds {}", thread, id);
                self.threads
                    .scheduler
                    .wait_for_access(&self.machine, queue, thread);
                self.threads.park(thread, BlockReason::Lock(id));
                false
            }
        }
    }

    pub(crate) fn queue_order(&self, queue: QueueId) -> Vec<ThreadHandle> {
        let scheduler = &self.threads.scheduler;
        match scheduler.queue(queue) {
            Some(wait_queue) => wait_queue
                .ranked(|t| {
                    scheduler
                        .thread_state(t)
                        .map(|s| s.effective_priority())
                        .unwrap_or_default()
                })
                .into_iter()
                .map(|(waiter, _)| waiter.thread)
                .collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::thread::tcb::{BlockReason, ThreadStatus};
    use crate::types::LockId;
    use crate::{Kernel, KernelConfig};

    fn kernel() -> Kernel {
        let _ = env_logger::builder().is_test(true).try_init();
        Kernel::new(KernelConfig::default()).unwrap()
    }

    #[test]
    fn uncontended_acquire_and_release() {
        let mut k = kernel();
        let main = k.current_thread().unwrap();
        let lock = k.create_lock();

        k.lock_acquire(lock).unwrap();
        assert!(k.lock_is_held_by_current_thread(lock).unwrap());
        assert_eq!(k.lock_holder(lock).unwrap(), Some(main));

        k.lock_release(lock).unwrap();
        assert_eq!(k.lock_holder(lock).unwrap(), None);
        assert!(!k.lock_is_held_by_current_thread(lock).unwrap());
    }

    #[test]
    fn contended_acquire_blocks_and_donates() {
        let mut k = kernel();
        let main = k.current_thread().unwrap();
        let lock = k.create_lock();
        k.lock_acquire(lock).unwrap();

        let high = k.fork("high", 6);
        k.yield_now();
        assert_eq!(k.current_thread(), Some(high));

        k.lock_acquire(lock).unwrap();
        assert_eq!(
            k.thread_status(high).unwrap(),
            ThreadStatus::Blocked(BlockReason::Lock(lock))
        );
        assert_eq!(k.current_thread(), Some(main));

        let status = k.interrupt_disable();
        assert_eq!(k.get_priority(main).unwrap(), 1);
        assert_eq!(k.get_effective_priority(main).unwrap(), 6);
        k.interrupt_restore(status);

        k.lock_release(lock).unwrap();
        assert_eq!(k.lock_holder(lock).unwrap(), Some(high));
        let status = k.interrupt_disable();
        assert_eq!(k.get_effective_priority(main).unwrap(), 1);
        k.interrupt_restore(status);

        k.yield_now();
        assert_eq!(k.current_thread(), Some(high));
        assert!(k.lock_is_held_by_current_thread(lock).unwrap());
    }

    #[test]
    fn waiters_get_the_lock_by_priority_then_arrival() {
        let mut k = kernel();
        let main = k.current_thread().unwrap();
        let lock = k.create_lock();
        k.lock_acquire(lock).unwrap();

        // Each worker runs as soon as it is forked and blocks on the lock.
        let mut workers = Vec::new();
        for (name, priority) in [("a", 3), ("b", 3), ("c", 5)] {
            let worker = k.fork(name, priority);
            k.yield_now();
            assert_eq!(k.current_thread(), Some(worker));
            k.lock_acquire(lock).unwrap();
            assert_eq!(k.current_thread(), Some(main));
            workers.push(worker);
        }
        let (a, b, c) = (workers[0], workers[1], workers[2]);
        assert_eq!(k.lock_waiters(lock).unwrap(), vec![c, a, b]);

        let status = k.interrupt_disable();
        assert_eq!(k.get_effective_priority(main).unwrap(), 5);
        k.interrupt_restore(status);

        k.lock_release(lock).unwrap();
        assert_eq!(k.lock_holder(lock).unwrap(), Some(c));
        assert_eq!(k.lock_waiters(lock).unwrap(), vec![a, b]);
    }

    #[test]
    fn unknown_lock_is_an_error() {
        let mut k = kernel();
        let ghost = LockId::new(42);
        assert!(k.lock_acquire(ghost).is_err());
        assert!(k.lock_release(ghost).is_err());
        assert!(k.lock_holder(ghost).is_err());
        assert!(k.machine().interrupt.enabled());
    }

    #[test]
    #[should_panic(expected = "releasing")]
    fn releasing_an_unheld_lock_is_fatal() {
        let mut k = kernel();
        let lock = k.create_lock();
        let _ = k.lock_release(lock);
    }

    #[test]
    #[should_panic(expected = "already holds")]
    fn recursive_acquire_is_fatal() {
        let mut k = kernel();
        let lock = k.create_lock();
        k.lock_acquire(lock).unwrap();
        let _ = k.lock_acquire(lock);
    }
}

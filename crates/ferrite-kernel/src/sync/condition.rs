use crate::error::KernelError;
use crate::thread::tcb::{BlockReason, ResumeAction};
use crate::types::{ConditionId, LockId, QueueId, ThreadHandle};
use crate::Kernel;
use log::debug;

/// Condition variable bound to one lock.
///
/// Sleepers wait on a queue that does not transfer priority, so the order
/// they are woken in still follows their effective priority. A woken thread
/// takes the lock back before it runs again.
#[derive(Debug, Clone, Copy)]
pub struct Condition {
    pub id: ConditionId,
    pub lock: LockId,
    pub queue: QueueId,
}

impl Kernel {
    pub fn create_condition(&mut self, lock: LockId) -> Result<ConditionId, KernelError> {
        if !self.locks.contains_key(&lock) {
            return Err(KernelError::NoSuchLock(lock));
        }
        let id = ConditionId::new(self.next_condition_id);
        self.next_condition_id += 1;
        let queue = self.threads.scheduler.new_thread_queue(false);
        self.conditions.insert(id, Condition { id, lock, queue });
        debug!("created {} on {}", id, lock);
        Ok(id)
    }

    /// Releases the lock and blocks until woken. Giving up the lock and
    /// going to sleep happen with interrupts off, so a wake issued right
    /// after the lock is released cannot be missed.
    pub fn condition_sleep(&mut self, id: ConditionId) -> Result<(), KernelError> {
        let condition = self.condition(id)?;
        let current = self.assert_holds(&condition);

        let status = self.machine.interrupt.disable();
        self.threads
            .scheduler
            .wait_for_access(&self.machine, condition.queue, current);
        self.hand_off(condition.lock);
        self.threads
            .set_resume(current, ResumeAction::Reacquire(condition.lock));
        self.threads.block_current(BlockReason::Condition(id));
        self.dispatch();
        self.interrupt_restore(status);
        Ok(())
    }

    /// Wakes the sleeper with the highest effective priority, if any. The
    /// caller must hold the lock and keeps running.
    pub fn condition_wake(&mut self, id: ConditionId) -> Result<Option<ThreadHandle>, KernelError> {
        let condition = self.condition(id)?;
        self.assert_holds(&condition);

        let status = self.machine.interrupt.disable();
        let woken = self.wake_one(&condition);
        self.interrupt_restore(status);
        Ok(woken)
    }

    /// Wakes every sleeper. Returns them in the order they were woken.
    pub fn condition_wake_all(&mut self, id: ConditionId) -> Result<Vec<ThreadHandle>, KernelError> {
        let condition = self.condition(id)?;
        self.assert_holds(&condition);

        let status = self.machine.interrupt.disable();
        let mut woken = Vec::new();
        while let Some(thread) = self.wake_one(&condition) {
            woken.push(thread);
        }
        self.interrupt_restore(status);
        Ok(woken)
    }

    /// Threads sleeping on the condition, in the order they would be woken.
    pub fn condition_waiters(&self, id: ConditionId) -> Result<Vec<ThreadHandle>, KernelError> {
        let condition = self.condition(id)?;
        Ok(self.queue_order(condition.queue))
    }

    pub fn condition_lock(&self, id: ConditionId) -> Result<LockId, KernelError> {
        self.condition(id).map(|condition| condition.lock)
    }

    fn condition(&self, id: ConditionId) -> Result<Condition, KernelError> {
        self.conditions
            .get(&id)
            .copied()
            .ok_or(KernelError::NoSuchCondition(id))
    }

    fn assert_holds(&self, condition: &Condition) -> ThreadHandle {
        let current = self.threads.current();
        let holder = self.locks.get(&condition.lock).and_then(|lock| lock.holder);
        assert!(
            holder == Some(current),
            "{} uses {} without holding {}",
            current,
            condition.id,
            condition.lock
        );
        current
    }

    fn wake_one(&mut self, condition: &Condition) -> Option<ThreadHandle> {
        let thread = self
            .threads
            .scheduler
            .next_thread(&self.machine, condition.queue)?;
        debug!("{} wakes {}", condition.id, thread);
        self.threads.ready(&self.machine, thread);
        Some(thread)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::KernelError;
    use crate::thread::tcb::{BlockReason, ThreadStatus};
    use crate::types::{ConditionId, LockId};
    use crate::{Kernel, KernelConfig};

    fn kernel() -> Kernel {
        let _ = env_logger::builder().is_test(true).try_init();
        Kernel::new(KernelConfig::default()).unwrap()
    }

    #[test]
    fn condition_needs_an_existing_lock() {
        let mut k = kernel();
        assert!(matches!(
            k.create_condition(LockId::new(7)),
            Err(KernelError::NoSuchLock(_))
        ));
        assert!(matches!(
            k.condition_wake(ConditionId::new(3)),
            Err(KernelError::NoSuchCondition(_))
        ));
    }

    #[test]
    fn sleep_releases_the_lock_and_wake_reacquires_it() {
        let mut k = kernel();
        let main = k.current_thread().unwrap();
        let lock = k.create_lock();
        let cond = k.create_condition(lock).unwrap();
        let other = k.fork("other", 1);

        k.lock_acquire(lock).unwrap();
        k.condition_sleep(cond).unwrap();
        assert_eq!(k.current_thread(), Some(other));
        assert_eq!(k.lock_holder(lock).unwrap(), None);
        assert_eq!(
            k.thread_status(main).unwrap(),
            ThreadStatus::Blocked(BlockReason::Condition(cond))
        );
        assert_eq!(k.condition_waiters(cond).unwrap(), vec![main]);

        k.lock_acquire(lock).unwrap();
        assert_eq!(k.condition_wake(cond).unwrap(), Some(main));
        assert_eq!(k.thread_status(main).unwrap(), ThreadStatus::Ready);
        k.lock_release(lock).unwrap();

        k.yield_now();
        assert_eq!(k.current_thread(), Some(main));
        assert!(k.lock_is_held_by_current_thread(lock).unwrap());
    }

    #[test]
    fn woken_thread_waits_for_a_busy_lock() {
        let mut k = kernel();
        let main = k.current_thread().unwrap();
        let lock = k.create_lock();
        let cond = k.create_condition(lock).unwrap();
        let other = k.fork("other", 1);

        k.lock_acquire(lock).unwrap();
        k.condition_sleep(cond).unwrap();
        assert_eq!(k.current_thread(), Some(other));

        // `other` wakes main but keeps the lock across a yield, so main
        // parks on the lock when it is dispatched.
        k.lock_acquire(lock).unwrap();
        k.condition_wake(cond).unwrap();
        k.yield_now();
        assert_eq!(k.current_thread(), Some(other));
        assert_eq!(
            k.thread_status(main).unwrap(),
            ThreadStatus::Blocked(BlockReason::Lock(lock))
        );
        assert_eq!(k.lock_waiters(lock).unwrap(), vec![main]);

        k.lock_release(lock).unwrap();
        assert_eq!(k.lock_holder(lock).unwrap(), Some(main));
        k.yield_now();
        assert_eq!(k.current_thread(), Some(main));
    }

    #[test]
    fn wake_all_wakes_by_priority() {
        let mut k = kernel();
        let main = k.current_thread().unwrap();
        let lock = k.create_lock();
        let cond = k.create_condition(lock).unwrap();

        let mut sleepers = Vec::new();
        for (name, priority) in [("low", 2), ("high", 6), ("mid", 4)] {
            let sleeper = k.fork(name, priority);
            k.yield_now();
            assert_eq!(k.current_thread(), Some(sleeper));
            k.lock_acquire(lock).unwrap();
            k.condition_sleep(cond).unwrap();
            assert_eq!(k.current_thread(), Some(main));
            sleepers.push(sleeper);
        }
        let (low, high, mid) = (sleepers[0], sleepers[1], sleepers[2]);
        assert_eq!(k.condition_waiters(cond).unwrap(), vec![high, mid, low]);

        k.lock_acquire(lock).unwrap();
        assert_eq!(k.condition_wake_all(cond).unwrap(), vec![high, mid, low]);
        assert!(k.condition_waiters(cond).unwrap().is_empty());
        k.lock_release(lock).unwrap();

        // Each woken thread takes the lock when it is dispatched.
        k.yield_now();
        for expected in [high, mid, low] {
            assert_eq!(k.current_thread(), Some(expected));
            assert!(k.lock_is_held_by_current_thread(lock).unwrap());
            k.lock_release(lock).unwrap();
            k.finish();
        }
        assert_eq!(k.current_thread(), Some(main));
    }

    #[test]
    fn wake_without_sleepers_is_a_no_op() {
        let mut k = kernel();
        let lock = k.create_lock();
        let cond = k.create_condition(lock).unwrap();
        k.lock_acquire(lock).unwrap();
        assert_eq!(k.condition_wake(cond).unwrap(), None);
        assert!(k.condition_wake_all(cond).unwrap().is_empty());
    }

    #[test]
    #[should_panic(expected = "without holding")]
    fn sleeping_without_the_lock_is_fatal() {
        let mut k = kernel();
        let lock = k.create_lock();
        let cond = k.create_condition(lock).unwrap();
        let _ = k.condition_sleep(cond);
    }
}

use crate::types::{ConditionId, LockId, QueueId, ThreadHandle};
use ferrite_machine::SimulatedInstant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    Ready,
    Running,
    Blocked(BlockReason),
    Finished,
}

/// Why a thread gave up the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    Lock(LockId),
    Condition(ConditionId),
    Join(ThreadHandle),
    Alarm(SimulatedInstant),
}

/// Work a blocked thread must finish before it is back in its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeAction {
    /// Woken from a condition variable; take the lock back first.
    Reacquire(LockId),
}

#[derive(Debug)]
pub struct ThreadControlBlock {
    pub handle: ThreadHandle,
    pub name: String,
    pub status: ThreadStatus,
    /// Joiners wait here and donate their priority to this thread.
    pub join_queue: QueueId,
    pub resume: Option<ResumeAction>,
}

impl ThreadControlBlock {
    pub fn new(handle: ThreadHandle, name: &str, join_queue: QueueId) -> Self {
        Self {
            handle,
            name: name.to_string(),
            status: ThreadStatus::Ready,
            join_queue,
            resume: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == ThreadStatus::Finished
    }
}

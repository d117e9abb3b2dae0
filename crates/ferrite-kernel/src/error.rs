use crate::types::{ConditionId, LockId, ThreadHandle};
use ferrite_machine::MachineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("initialization error: {0}")]
    Init(#[from] MachineError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no such thread: {0}")]
    NoSuchThread(ThreadHandle),

    #[error("thread has finished: {0}")]
    ThreadFinished(ThreadHandle),

    #[error("no such lock: {0}")]
    NoSuchLock(LockId),

    #[error("no such condition variable: {0}")]
    NoSuchCondition(ConditionId),
}

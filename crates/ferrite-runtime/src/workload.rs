use core::fmt;
use ferrite_kernel::types::{Priority, PRIORITY_MAXIMUM, PRIORITY_MINIMUM};

/// One step of a simulated thread. Lock, condition and thread operands are
/// indices into the owning [`Workload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Acquire(usize),
    Release(usize),
    Sleep(usize),
    Wake(usize),
    WakeAll(usize),
    WaitUntil(u64),
    SetPriority(Priority),
    Yield,
    Join(usize),
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Acquire(lock) => write!(f, "acquire lock{lock}"),
            Op::Release(lock) => write!(f, "release lock{lock}"),
            Op::Sleep(cond) => write!(f, "sleep cond{cond}"),
            Op::Wake(cond) => write!(f, "wake cond{cond}"),
            Op::WakeAll(cond) => write!(f, "wake-all cond{cond}"),
            Op::WaitUntil(ticks) => write!(f, "wait {ticks} ticks"),
            Op::SetPriority(priority) => write!(f, "set priority {priority}"),
            Op::Yield => write!(f, "yield"),
            Op::Join(thread) => write!(f, "join thread{thread}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThreadProgram {
    pub name: String,
    pub priority: Priority,
    pub ops: Vec<Op>,
}

impl ThreadProgram {
    pub fn new(name: &str, priority: Priority) -> Self {
        Self {
            name: name.to_string(),
            priority,
            ops: Vec::new(),
        }
    }

    pub fn op(mut self, op: Op) -> Self {
        self.ops.push(op);
        self
    }

    pub fn repeat(mut self, op: Op, times: usize) -> Self {
        self.ops.extend(std::iter::repeat(op).take(times));
        self
    }
}

/// Locks, conditions and the threads that use them. The bootstrap thread
/// forks every program and then joins them in order.
#[derive(Debug, Clone, Default)]
pub struct Workload {
    pub locks: usize,
    /// Lock index each condition is bound to.
    pub conditions: Vec<usize>,
    pub threads: Vec<ThreadProgram>,
}

impl Workload {
    pub fn new(locks: usize) -> Self {
        Self {
            locks,
            ..Self::default()
        }
    }

    pub fn condition(mut self, lock: usize) -> Self {
        self.conditions.push(lock);
        self
    }

    pub fn thread(mut self, program: ThreadProgram) -> Self {
        self.threads.push(program);
        self
    }

    /// Checks every operand against the objects the workload declares and
    /// every priority against the valid range.
    pub fn validate(&self) -> Result<(), String> {
        for (cond, lock) in self.conditions.iter().enumerate() {
            if *lock >= self.locks {
                return Err(format!("cond{cond} bound to missing lock{lock}"));
            }
        }
        let in_range = |priority: Priority| (PRIORITY_MINIMUM..=PRIORITY_MAXIMUM).contains(&priority);
        for program in &self.threads {
            if !in_range(program.priority) {
                return Err(format!(
                    "{}: priority {} outside {}..={}",
                    program.name, program.priority, PRIORITY_MINIMUM, PRIORITY_MAXIMUM
                ));
            }
            for op in &program.ops {
                let ok = match *op {
                    Op::Acquire(lock) | Op::Release(lock) => lock < self.locks,
                    Op::Sleep(cond) | Op::Wake(cond) | Op::WakeAll(cond) => {
                        cond < self.conditions.len()
                    }
                    Op::Join(thread) => thread < self.threads.len(),
                    Op::SetPriority(priority) => in_range(priority),
                    Op::WaitUntil(_) | Op::Yield => true,
                };
                if !ok {
                    return Err(format!("{}: `{}` is out of range", program.name, op));
                }
            }
        }
        Ok(())
    }

    pub fn op_count(&self) -> usize {
        self.threads.iter().map(|program| program.ops.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_dangling_operands() {
        let workload = Workload::new(1)
            .condition(0)
            .thread(ThreadProgram::new("a", 1).op(Op::Acquire(0)).op(Op::Wake(0)));
        assert!(workload.validate().is_ok());

        let bad_lock = Workload::new(1).thread(ThreadProgram::new("a", 1).op(Op::Release(2)));
        assert!(bad_lock.validate().unwrap_err().contains("release lock2"));

        let bad_condition = Workload::new(0).condition(0);
        assert!(bad_condition.validate().is_err());

        let bad_join = Workload::new(0).thread(ThreadProgram::new("a", 1).op(Op::Join(5)));
        assert!(bad_join.validate().is_err());
    }

    #[test]
    fn validate_rejects_priorities_out_of_range() {
        let bad_start = Workload::new(0).thread(ThreadProgram::new("a", 8));
        assert!(bad_start.validate().unwrap_err().contains("priority 8 outside 0..=7"));

        let bad_set = Workload::new(0).thread(ThreadProgram::new("a", 1).op(Op::SetPriority(-1)));
        assert!(bad_set.validate().unwrap_err().contains("set priority -1"));

        let edges = Workload::new(0).thread(
            ThreadProgram::new("a", PRIORITY_MINIMUM)
                .op(Op::SetPriority(PRIORITY_MAXIMUM))
                .op(Op::SetPriority(PRIORITY_MINIMUM)),
        );
        assert!(edges.validate().is_ok());
    }

    #[test]
    fn repeat_appends_copies() {
        let program = ThreadProgram::new("spin", 3)
            .op(Op::WaitUntil(2))
            .repeat(Op::Yield, 3);
        assert_eq!(
            program.ops,
            vec![Op::WaitUntil(2), Op::Yield, Op::Yield, Op::Yield]
        );
    }
}

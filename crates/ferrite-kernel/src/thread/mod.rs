pub mod tcb;

use crate::error::KernelError;
use crate::sched::PriorityScheduler;
use crate::types::{Priority, QueueId, ThreadHandle};
use ferrite_machine::Machine;
use log::{debug, info};
use std::collections::HashMap;
use tcb::{BlockReason, ResumeAction, ThreadControlBlock, ThreadStatus};

/// Thread table plus the ready list.
///
/// The ready list is a non-transferring queue of the priority scheduler, so
/// dispatch order is effective priority first and arrival order second.
/// Nothing here switches stacks: blocking marks the current thread and the
/// kernel then dispatches whoever is next.
pub struct ThreadManager {
    pub threads: HashMap<ThreadHandle, ThreadControlBlock>,
    pub scheduler: PriorityScheduler,
    pub current_thread: Option<ThreadHandle>,
    ready_queue: QueueId,
    next_handle: u32,
}

impl ThreadManager {
    /// Creates the thread table with the bootstrap thread already running.
    pub fn new(machine: &Machine, default_priority: Priority) -> Self {
        let mut scheduler = PriorityScheduler::new(default_priority);
        let ready_queue = scheduler.new_thread_queue(false);

        let mut manager = Self {
            threads: HashMap::new(),
            scheduler,
            current_thread: None,
            ready_queue,
            next_handle: 1,
        };

        let main = manager.create(machine, "main");
        manager.scheduler.acquire(machine, ready_queue, main);
        if let Some(tcb) = manager.threads.get_mut(&main) {
            tcb.status = ThreadStatus::Running;
        }
        manager.current_thread = Some(main);
        manager
    }

    pub fn ready_queue(&self) -> QueueId {
        self.ready_queue
    }

    /// The running thread. Running nothing while a thread is required is a
    /// caller bug.
    pub fn current(&self) -> ThreadHandle {
        match self.current_thread {
            Some(handle) => handle,
            None => panic!("no current thread: the processor is idle"),
        }
    }

    pub fn tcb(&self, thread: ThreadHandle) -> Result<&ThreadControlBlock, KernelError> {
        self.threads
            .get(&thread)
            .ok_or(KernelError::NoSuchThread(thread))
    }

    pub fn status(&self, thread: ThreadHandle) -> Result<ThreadStatus, KernelError> {
        self.tcb(thread).map(|tcb| tcb.status)
    }

    /// Creates a thread and makes it ready to run.
    pub fn fork(&mut self, machine: &Machine, name: &str, priority: Priority) -> ThreadHandle {
        let handle = self.create(machine, name);
        self.scheduler.set_priority(machine, handle, priority);
        self.scheduler
            .wait_for_access(machine, self.ready_queue, handle);
        info!("forked {} ({}) at priority {}", handle, name, priority);
        handle
    }

    /// Moves `thread` to the ready list.
    pub fn ready(&mut self, machine: &Machine, thread: ThreadHandle) {
        let tcb = self.tcb_mut(thread);
        assert!(
            !matches!(tcb.status, ThreadStatus::Ready | ThreadStatus::Finished),
            "{} cannot become ready from {:?}",
            thread,
            tcb.status
        );
        tcb.status = ThreadStatus::Ready;
        self.scheduler
            .wait_for_access(machine, self.ready_queue, thread);
    }

    /// Marks the current thread blocked. The caller dispatches next.
    pub fn block_current(&mut self, reason: BlockReason) -> ThreadHandle {
        let current = self.current();
        let tcb = self.tcb_mut(current);
        assert_eq!(
            tcb.status,
            ThreadStatus::Running,
            "{} blocking while not running",
            current
        );
        debug!("{} blocked on {:?}", current, reason);
        tcb.status = ThreadStatus::Blocked(reason);
        current
    }

    /// Puts the running thread back on the ready list.
    pub fn yield_current(&mut self, machine: &Machine) {
        if let Some(current) = self.current_thread {
            if self.tcb_mut(current).status == ThreadStatus::Running {
                self.ready(machine, current);
            }
        }
    }

    /// Marks the current thread finished and readies everyone joining it.
    pub fn finish_current(&mut self, machine: &Machine) -> ThreadHandle {
        let current = self.current();
        let tcb = self.tcb_mut(current);
        tcb.status = ThreadStatus::Finished;
        let join_queue = tcb.join_queue;
        info!("{} ({}) finished", current, tcb.name);

        while let Some(joiner) = self.scheduler.next_thread(machine, join_queue) {
            self.ready(machine, joiner);
        }
        current
    }

    /// Removes the best ready thread from the ready list.
    pub fn next_to_run(&mut self, machine: &Machine) -> Option<ThreadHandle> {
        self.scheduler.next_thread(machine, self.ready_queue)
    }

    /// Gives the processor to `next`, or idles it.
    pub fn switch_to(&mut self, next: Option<ThreadHandle>) {
        let previous = self.current_thread;
        if let Some(next) = next {
            self.tcb_mut(next).status = ThreadStatus::Running;
        }
        self.current_thread = next;
        match next {
            Some(next) if previous != Some(next) => debug!("switch {:?} -> {}", previous, next),
            None if previous.is_some() => debug!("processor idle"),
            _ => {}
        }
    }

    pub fn set_resume(&mut self, thread: ThreadHandle, action: ResumeAction) {
        self.tcb_mut(thread).resume = Some(action);
    }

    pub fn take_resume(&mut self, thread: ThreadHandle) -> Option<ResumeAction> {
        self.tcb_mut(thread).resume.take()
    }

    /// Marks a dispatched thread blocked again before it ever ran.
    pub fn park(&mut self, thread: ThreadHandle, reason: BlockReason) {
        debug!("{} parked on {:?}", thread, reason);
        self.tcb_mut(thread).status = ThreadStatus::Blocked(reason);
    }

    fn create(&mut self, machine: &Machine, name: &str) -> ThreadHandle {
        let handle = match ThreadHandle::new(self.next_handle) {
            Some(handle) => handle,
            None => panic!("thread handle space exhausted"),
        };
        self.next_handle += 1;

        let join_queue = self.scheduler.new_thread_queue(true);
        self.scheduler.acquire(machine, join_queue, handle);
        self.threads
            .insert(handle, ThreadControlBlock::new(handle, name, join_queue));
        handle
    }

    fn tcb_mut(&mut self, thread: ThreadHandle) -> &mut ThreadControlBlock {
        match self.threads.get_mut(&thread) {
            Some(tcb) => tcb,
            None => panic!("unknown thread {thread}"),
        }
    }
}

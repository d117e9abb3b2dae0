pub mod scenario;
pub mod workload;

use ferrite_kernel::error::KernelError;
use ferrite_kernel::thread::tcb::ThreadStatus;
use ferrite_kernel::types::{ConditionId, LockId, Priority, ThreadHandle};
use ferrite_kernel::{Kernel, KernelConfig};
use ferrite_machine::SimulatedInstant;
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

pub use scenario::Scenario;
pub use workload::{Op, ThreadProgram, Workload};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("invalid workload: {0}")]
    InvalidWorkload(String),

    #[error("expectation failed: {0}")]
    Expectation(String),
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub kernel: KernelConfig,
    /// Seed for generated workloads.
    pub seed: u64,
    pub workers: usize,
    pub rounds: usize,
    /// Steps (including idle ticks) before a run is declared stuck.
    pub max_steps: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            kernel: KernelConfig::default(),
            seed: 0x5eed,
            workers: 4,
            rounds: 8,
            max_steps: 100_000,
        }
    }
}

/// What a run did.
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub scenario: String,
    pub ticks: u64,
    pub steps: u64,
    pub idle_ticks: u64,
    pub switches: u64,
    pub finish_order: Vec<String>,
    /// Highest effective priority seen per thread.
    pub peak: BTreeMap<String, Priority>,
    /// Condition wakes that found a sleeper.
    pub wakes: usize,
    /// Timed sleeps that ran to completion.
    pub alarms: usize,
    pub trace: Vec<String>,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "scenario:     {}", self.scenario)?;
        writeln!(
            f,
            "ticks:        {} ({} steps, {} idle)",
            self.ticks, self.steps, self.idle_ticks
        )?;
        writeln!(f, "switches:     {}", self.switches)?;
        writeln!(f, "finish order: {}", self.finish_order.join(" "))?;
        write!(f, "peak priority:")?;
        for (name, priority) in &self.peak {
            write!(f, " {name}={priority}")?;
        }
        writeln!(f)?;
        write!(f, "wakes:        {}  alarms: {}", self.wakes, self.alarms)
    }
}

/// Drives a kernel through a workload, one operation per tick.
pub struct Runtime {
    config: RuntimeConfig,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Runs a canned scenario and checks its outcome.
    pub fn run(&self, scenario: Scenario) -> Result<Report, RuntimeError> {
        info!("running {}: {}", scenario.name(), scenario.description());
        let workload = scenario.workload(&self.config);
        let mut report = self.execute(&workload)?;
        report.scenario = scenario.name().to_string();
        scenario.check(&self.config, &report)?;
        Ok(report)
    }

    /// Runs a workload on a fresh kernel until every thread has finished.
    pub fn execute(&self, workload: &Workload) -> Result<Report, RuntimeError> {
        workload.validate().map_err(RuntimeError::InvalidWorkload)?;
        let mut execution = Execution::new(self.config.kernel, workload)?;
        execution.run(self.config.max_steps)?;
        Ok(execution.report)
    }
}

struct Cursor {
    program: usize,
    pc: usize,
    wake_after: Option<SimulatedInstant>,
}

struct Execution {
    kernel: Kernel,
    programs: Vec<ThreadProgram>,
    locks: Vec<LockId>,
    conditions: Vec<ConditionId>,
    /// Worker handles, in workload order.
    handles: Vec<ThreadHandle>,
    cursors: HashMap<ThreadHandle, Cursor>,
    report: Report,
}

impl Execution {
    fn new(config: KernelConfig, workload: &Workload) -> Result<Self, RuntimeError> {
        let mut kernel = Kernel::new(config)?;
        let main = kernel
            .current_thread()
            .ok_or_else(|| RuntimeError::Expectation("kernel booted idle".to_string()))?;

        let locks: Vec<LockId> = (0..workload.locks).map(|_| kernel.create_lock()).collect();
        let conditions = workload
            .conditions
            .iter()
            .map(|lock| kernel.create_condition(locks[*lock]))
            .collect::<Result<Vec<_>, _>>()?;

        let mut programs = workload.threads.clone();
        let mut cursors = HashMap::new();
        let mut handles = Vec::new();
        for (index, program) in programs.iter().enumerate() {
            let handle = kernel.fork(&program.name, program.priority);
            cursors.insert(handle, Cursor::new(index));
            handles.push(handle);
        }

        let bootstrap = ThreadProgram {
            name: "main".to_string(),
            priority: config.default_priority,
            ops: (0..handles.len()).map(Op::Join).collect(),
        };
        cursors.insert(main, Cursor::new(programs.len()));
        programs.push(bootstrap);

        Ok(Self {
            kernel,
            programs,
            locks,
            conditions,
            handles,
            cursors,
            report: Report::default(),
        })
    }

    fn run(&mut self, max_steps: u64) -> Result<(), RuntimeError> {
        let mut last = None;
        loop {
            if self.report.steps + self.report.idle_ticks >= max_steps {
                return Err(RuntimeError::Expectation(format!(
                    "still running after {max_steps} steps"
                )));
            }

            let Some(current) = self.kernel.current_thread() else {
                if self.kernel.sleeping() == 0 {
                    break;
                }
                self.report.idle_ticks += 1;
                self.kernel.advance(1);
                continue;
            };
            if last != Some(current) {
                self.report.switches += 1;
                last = Some(current);
            }

            self.step(current)?;
            self.report.steps += 1;
            self.sample()?;
            self.kernel.advance(1);
        }

        self.report.ticks = self.kernel.now().ticks();
        for (handle, cursor) in &self.cursors {
            let status = self.kernel.thread_status(*handle)?;
            if status != ThreadStatus::Finished {
                return Err(RuntimeError::Expectation(format!(
                    "{} stuck at {:?}",
                    self.programs[cursor.program].name, status
                )));
            }
        }
        Ok(())
    }

    /// Runs the next operation of `current`, or finishes it.
    fn step(&mut self, current: ThreadHandle) -> Result<(), RuntimeError> {
        let now = self.kernel.now();
        let cursor = match self.cursors.get_mut(&current) {
            Some(cursor) => cursor,
            None => {
                return Err(RuntimeError::Expectation(format!(
                    "{current} runs without a program"
                )))
            }
        };
        let program = &self.programs[cursor.program];
        let name = program.name.clone();
        let next = program.ops.get(cursor.pc).copied();

        if let Some(deadline) = cursor.wake_after.take() {
            if now < deadline {
                return Err(RuntimeError::Expectation(format!(
                    "{name} woke at {now} before its deadline {deadline}"
                )));
            }
            self.report.alarms += 1;
        }

        let Some(op) = next else {
            for (index, lock) in self.locks.iter().enumerate() {
                if self.kernel.lock_holder(*lock)? == Some(current) {
                    return Err(RuntimeError::Expectation(format!(
                        "{name} ends holding lock{index}"
                    )));
                }
            }
            self.record(now, &name, "finish");
            self.report.finish_order.push(name);
            self.kernel.finish();
            return Ok(());
        };
        cursor.pc += 1;
        if let Op::WaitUntil(ticks) = op {
            if ticks > 0 {
                cursor.wake_after = Some(now.after(ticks));
            }
        }
        self.record(now, &name, &op.to_string());
        self.apply(current, op)
    }

    fn apply(&mut self, current: ThreadHandle, op: Op) -> Result<(), RuntimeError> {
        match op {
            Op::Acquire(lock) => self.kernel.lock_acquire(self.locks[lock])?,
            Op::Release(lock) => self.kernel.lock_release(self.locks[lock])?,
            Op::Sleep(cond) => self.kernel.condition_sleep(self.conditions[cond])?,
            Op::Wake(cond) => {
                if self.kernel.condition_wake(self.conditions[cond])?.is_some() {
                    self.report.wakes += 1;
                }
            }
            Op::WakeAll(cond) => {
                self.report.wakes += self.kernel.condition_wake_all(self.conditions[cond])?.len();
            }
            Op::WaitUntil(ticks) => self.kernel.wait_until(ticks),
            Op::SetPriority(priority) => {
                let status = self.kernel.interrupt_disable();
                let result = self.kernel.set_priority(current, priority);
                self.kernel.interrupt_restore(status);
                result?;
            }
            Op::Yield => self.kernel.yield_now(),
            Op::Join(thread) => self.kernel.join(self.handles[thread])?,
        }
        Ok(())
    }

    /// Records peak priorities and checks that every lock holder runs at
    /// least at the priority of each of its waiters.
    fn sample(&mut self) -> Result<(), RuntimeError> {
        let status = self.kernel.interrupt_disable();
        let result = self.sample_disabled();
        self.kernel.interrupt_restore(status);
        result
    }

    fn sample_disabled(&mut self) -> Result<(), RuntimeError> {
        for (handle, cursor) in &self.cursors {
            if self.kernel.thread_status(*handle)? == ThreadStatus::Finished {
                continue;
            }
            let priority = self.kernel.get_effective_priority(*handle)?;
            let peak = self
                .report
                .peak
                .entry(self.programs[cursor.program].name.clone())
                .or_insert(priority);
            *peak = (*peak).max(priority);
        }

        for lock in &self.locks {
            let Some(holder) = self.kernel.lock_holder(*lock)? else {
                continue;
            };
            let held = self.kernel.get_effective_priority(holder)?;
            for waiter in self.kernel.lock_waiters(*lock)? {
                let waiting = self.kernel.get_effective_priority(waiter)?;
                if waiting > held {
                    return Err(RuntimeError::Expectation(format!(
                        "{holder} holds {lock} at p{held} below waiter {waiter} at p{waiting}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn record(&mut self, now: SimulatedInstant, name: &str, what: &str) {
        let line = format!("{now:>6} {name:<10} {what}");
        debug!("{}", line);
        self.report.trace.push(line);
    }
}

impl Cursor {
    fn new(program: usize) -> Self {
        Self {
            program,
            pc: 0,
            wake_after: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime(config: RuntimeConfig) -> Runtime {
        let _ = env_logger::builder().is_test(true).try_init();
        Runtime::new(config)
    }

    #[test]
    fn every_scenario_passes_with_defaults() {
        let rt = runtime(RuntimeConfig::default());
        for scenario in Scenario::ALL {
            let report = rt.run(scenario).unwrap();
            assert_eq!(report.scenario, scenario.name());
            assert_eq!(report.finish_order.last().map(String::as_str), Some("main"));
        }
    }

    #[test]
    fn donation_chain_lifts_the_tail_of_the_chain() {
        let report = runtime(RuntimeConfig::default())
            .run(Scenario::DonationChain)
            .unwrap();
        assert_eq!(report.peak["c3"], 6);
        assert_eq!(report.peak["c1"], 6);
        assert_eq!(report.peak["medium"], 4);
        assert_eq!(report.finish_order[0], "c2");
    }

    #[test]
    fn alarm_holds_with_a_coarse_timer() {
        let config = RuntimeConfig {
            kernel: KernelConfig {
                timer_interval: 4,
                ..KernelConfig::default()
            },
            ..RuntimeConfig::default()
        };
        let report = runtime(config).run(Scenario::Alarm).unwrap();
        assert_eq!(report.alarms, 8);
    }

    #[test]
    fn stress_runs_for_several_seeds() {
        for seed in 1..6 {
            let config = RuntimeConfig {
                seed,
                workers: 6,
                rounds: 12,
                ..RuntimeConfig::default()
            };
            let report = runtime(config).run(Scenario::LockStress).unwrap();
            assert_eq!(report.finish_order.len(), 7);
        }
    }

    #[test]
    fn invalid_workload_is_rejected() {
        let workload = Workload::new(0).thread(ThreadProgram::new("a", 1).op(Op::Acquire(0)));
        assert!(matches!(
            runtime(RuntimeConfig::default()).execute(&workload),
            Err(RuntimeError::InvalidWorkload(_))
        ));
    }

    #[test]
    fn out_of_range_priority_is_rejected_before_running() {
        let workload = Workload::new(0).thread(ThreadProgram::new("a", 1).op(Op::SetPriority(9)));
        assert!(matches!(
            runtime(RuntimeConfig::default()).execute(&workload),
            Err(RuntimeError::InvalidWorkload(msg)) if msg.contains("set priority 9")
        ));
    }

    #[test]
    fn ending_with_a_lock_held_is_reported() {
        let workload = Workload::new(1).thread(ThreadProgram::new("greedy", 1).op(Op::Acquire(0)));
        let result = runtime(RuntimeConfig::default()).execute(&workload);
        assert!(matches!(
            result,
            Err(RuntimeError::Expectation(msg)) if msg == "greedy ends holding lock0"
        ));
    }

    #[test]
    fn a_stuck_run_is_reported() {
        // The only sleeper is never woken.
        let workload = Workload::new(1).condition(0).thread(
            ThreadProgram::new("lonely", 1)
                .op(Op::Acquire(0))
                .op(Op::Sleep(0)),
        );
        let result = runtime(RuntimeConfig::default()).execute(&workload);
        assert!(matches!(result, Err(RuntimeError::Expectation(msg)) if msg.contains("stuck")));
    }

    #[test]
    fn tiny_step_budget_is_exceeded() {
        let config = RuntimeConfig {
            max_steps: 3,
            ..RuntimeConfig::default()
        };
        let result = runtime(config).run(Scenario::DonationChain);
        assert!(matches!(result, Err(RuntimeError::Expectation(msg)) if msg.contains("still running")));
    }
}

use crate::workload::{Op, ThreadProgram, Workload};
use crate::{Report, RuntimeConfig, RuntimeError};
use ferrite_kernel::types::{PRIORITY_MAXIMUM, PRIORITY_MINIMUM};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::str::FromStr;

/// Canned workloads, each with the outcome it must produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    DonationChain,
    JoinDonation,
    ConditionPingPong,
    Alarm,
    LockStress,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::DonationChain,
        Scenario::JoinDonation,
        Scenario::ConditionPingPong,
        Scenario::Alarm,
        Scenario::LockStress,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::DonationChain => "donation-chain",
            Scenario::JoinDonation => "join-donation",
            Scenario::ConditionPingPong => "ping-pong",
            Scenario::Alarm => "alarm",
            Scenario::LockStress => "lock-stress",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Scenario::DonationChain => {
                "a high priority thread donates through two locks past a busy medium thread"
            }
            Scenario::JoinDonation => "a joiner donates to its child and on to a lock holder",
            Scenario::ConditionPingPong => "two threads hand a lock back and forth on a condition",
            Scenario::Alarm => "sleepers wake on timer interrupts, never before their deadline",
            Scenario::LockStress => "seeded random lock traffic, checking donation on every step",
        }
    }

    pub fn workload(&self, config: &RuntimeConfig) -> Workload {
        match self {
            Scenario::DonationChain => donation_chain(),
            Scenario::JoinDonation => join_donation(),
            Scenario::ConditionPingPong => ping_pong(config.rounds),
            Scenario::Alarm => alarm(config.workers),
            Scenario::LockStress => lock_stress(config),
        }
    }

    /// Checks the scenario-specific outcome. Invariants common to every
    /// run are enforced while it executes.
    pub fn check(&self, config: &RuntimeConfig, report: &Report) -> Result<(), RuntimeError> {
        match self {
            Scenario::DonationChain => {
                expect_peak(report, "c3", 6)?;
                expect_before(report, "c2", "medium")
            }
            Scenario::JoinDonation => {
                expect_peak(report, "holder", 6)?;
                expect_before(report, "parent", "medium")
            }
            Scenario::ConditionPingPong => {
                let expected = 2 * config.rounds;
                if report.wakes != expected {
                    return Err(RuntimeError::Expectation(format!(
                        "{} wakes delivered, expected {}",
                        report.wakes, expected
                    )));
                }
                Ok(())
            }
            Scenario::Alarm => {
                let expected = 2 * config.workers;
                if report.alarms != expected {
                    return Err(RuntimeError::Expectation(format!(
                        "{} sleeps completed, expected {}",
                        report.alarms, expected
                    )));
                }
                Ok(())
            }
            Scenario::LockStress => Ok(()),
        }
    }
}

impl FromStr for Scenario {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.name() == s)
            .ok_or_else(|| RuntimeError::UnknownScenario(s.to_string()))
    }
}

fn expect_peak(report: &Report, thread: &str, priority: i32) -> Result<(), RuntimeError> {
    match report.peak.get(thread) {
        Some(peak) if *peak == priority => Ok(()),
        peak => Err(RuntimeError::Expectation(format!(
            "{thread} peaked at {peak:?}, expected {priority}"
        ))),
    }
}

fn expect_before(report: &Report, first: &str, second: &str) -> Result<(), RuntimeError> {
    let position = |name: &str| report.finish_order.iter().position(|n| n == name);
    match (position(first), position(second)) {
        (Some(a), Some(b)) if a < b => Ok(()),
        _ => Err(RuntimeError::Expectation(format!(
            "{first} should finish before {second}: {:?}",
            report.finish_order
        ))),
    }
}

/// c3 holds lock1, c1 holds lock0 and waits for lock1, then c2 waits for
/// lock0. Without donation `medium` would keep c3 off the processor.
fn donation_chain() -> Workload {
    Workload::new(2)
        .thread(
            ThreadProgram::new("c2", 6)
                .op(Op::WaitUntil(10))
                .op(Op::Acquire(0))
                .op(Op::Release(0)),
        )
        .thread(
            ThreadProgram::new("medium", 4)
                .op(Op::WaitUntil(12))
                .repeat(Op::Yield, 20),
        )
        .thread(
            ThreadProgram::new("c1", 2)
                .op(Op::WaitUntil(5))
                .op(Op::Acquire(0))
                .op(Op::Acquire(1))
                .op(Op::Release(1))
                .op(Op::Release(0)),
        )
        .thread(
            ThreadProgram::new("c3", 1)
                .op(Op::Acquire(1))
                .repeat(Op::Yield, 30)
                .op(Op::Release(1)),
        )
}

/// `parent` joins `child`, which waits for the lock `holder` keeps.
fn join_donation() -> Workload {
    Workload::new(1)
        .thread(
            ThreadProgram::new("parent", 6)
                .op(Op::WaitUntil(6))
                .op(Op::Join(2)),
        )
        .thread(
            ThreadProgram::new("medium", 4)
                .op(Op::WaitUntil(8))
                .repeat(Op::Yield, 20),
        )
        .thread(
            ThreadProgram::new("child", 2)
                .op(Op::WaitUntil(3))
                .op(Op::Acquire(0))
                .op(Op::Release(0)),
        )
        .thread(
            ThreadProgram::new("holder", 1)
                .op(Op::Acquire(0))
                .repeat(Op::Yield, 20)
                .op(Op::Release(0)),
        )
}

/// Each side wakes the other and sleeps, `rounds` times, under one lock.
fn ping_pong(rounds: usize) -> Workload {
    let side = |name: &str| {
        let mut program = ThreadProgram::new(name, 1).op(Op::Acquire(0));
        for _ in 0..rounds {
            program = program.op(Op::Wake(0)).op(Op::Sleep(0));
        }
        program.op(Op::Wake(0)).op(Op::Release(0))
    };
    Workload::new(1)
        .condition(0)
        .thread(side("ping"))
        .thread(side("pong"))
}

fn alarm(workers: usize) -> Workload {
    (0..workers).fold(Workload::new(0), |workload, i| {
        let ticks = 3 * (i as u64 + 1);
        workload.thread(
            ThreadProgram::new(&format!("sleeper{i}"), 1)
                .op(Op::WaitUntil(ticks))
                .op(Op::Yield)
                .op(Op::WaitUntil(ticks / 3 + 1)),
        )
    })
}

const STRESS_LOCKS: usize = 3;

/// Random lock pairs taken in index order so no cycle can form.
fn lock_stress(config: &RuntimeConfig) -> Workload {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut workload = Workload::new(STRESS_LOCKS);

    for i in 0..config.workers {
        let priority = rng.gen_range(PRIORITY_MINIMUM..=PRIORITY_MAXIMUM);
        let mut program = ThreadProgram::new(&format!("worker{i}"), priority);

        for _ in 0..config.rounds {
            if rng.gen_bool(0.2) {
                program = program.op(Op::SetPriority(
                    rng.gen_range(PRIORITY_MINIMUM..=PRIORITY_MAXIMUM),
                ));
            }

            let a = rng.gen_range(0..STRESS_LOCKS);
            let b = rng.gen_range(0..STRESS_LOCKS);
            let (first, second) = (a.min(b), a.max(b));
            program = program.op(Op::Acquire(first));
            if second != first {
                program = program.op(Op::Acquire(second));
            }

            program = program.repeat(Op::Yield, rng.gen_range(0..3));
            if rng.gen_bool(0.25) {
                program = program.op(Op::WaitUntil(rng.gen_range(1..4)));
            }

            if second != first {
                program = program.op(Op::Release(second));
            }
            program = program.op(Op::Release(first));
        }
        workload = workload.thread(program);
    }
    workload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for scenario in Scenario::ALL {
            assert_eq!(scenario.name().parse::<Scenario>().unwrap(), scenario);
        }
        assert!(matches!(
            "nope".parse::<Scenario>(),
            Err(RuntimeError::UnknownScenario(name)) if name == "nope"
        ));
    }

    #[test]
    fn every_workload_is_valid() {
        let config = RuntimeConfig::default();
        for scenario in Scenario::ALL {
            scenario.workload(&config).validate().unwrap();
        }
    }

    #[test]
    fn stress_workload_depends_only_on_the_seed() {
        let config = RuntimeConfig::default();
        let a = lock_stress(&config);
        let b = lock_stress(&config);
        assert_eq!(a.op_count(), b.op_count());
        for (x, y) in a.threads.iter().zip(&b.threads) {
            assert_eq!(x.priority, y.priority);
            assert_eq!(x.ops, y.ops);
        }
    }

    #[test]
    fn stress_takes_locks_in_index_order() {
        let config = RuntimeConfig {
            workers: 6,
            rounds: 20,
            ..RuntimeConfig::default()
        };
        for program in lock_stress(&config).threads {
            let mut held: Vec<usize> = Vec::new();
            for op in program.ops {
                match op {
                    Op::Acquire(lock) => {
                        assert!(held.iter().all(|h| *h < lock));
                        held.push(lock);
                    }
                    Op::Release(lock) => assert_eq!(held.pop(), Some(lock)),
                    _ => {}
                }
            }
            assert!(held.is_empty());
        }
    }
}

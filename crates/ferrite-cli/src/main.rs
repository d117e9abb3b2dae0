use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ferrite_kernel::types::{PRIORITY_DEFAULT, PRIORITY_MAXIMUM, PRIORITY_MINIMUM};
use ferrite_kernel::KernelConfig;
use ferrite_runtime::{Runtime, RuntimeConfig, Scenario};
use log::error;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scenario
    Run {
        /// Scenario name (see `list`)
        scenario: String,

        #[command(flatten)]
        options: RunOptions,

        /// Print every operation as it executes
        #[arg(long)]
        trace: bool,
    },
    /// Run every scenario
    All {
        #[command(flatten)]
        options: RunOptions,
    },
    /// List the available scenarios
    List,
}

#[derive(Args)]
struct RunOptions {
    /// Ticks between timer interrupts
    #[arg(long, default_value_t = 1)]
    timer_interval: u64,

    /// Priority of threads that never set one
    #[arg(
        long,
        default_value_t = PRIORITY_DEFAULT,
        value_parser = clap::value_parser!(i32)
            .range(i64::from(PRIORITY_MINIMUM)..=i64::from(PRIORITY_MAXIMUM))
    )]
    default_priority: i32,

    /// Seed for generated workloads
    #[arg(long, default_value_t = 0x5eed)]
    seed: u64,

    /// Worker threads in generated workloads
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Rounds per worker in generated workloads
    #[arg(long, default_value_t = 8)]
    rounds: usize,
}

impl RunOptions {
    fn config(&self) -> RuntimeConfig {
        RuntimeConfig {
            kernel: KernelConfig {
                timer_interval: self.timer_interval,
                default_priority: self.default_priority,
            },
            seed: self.seed,
            workers: self.workers,
            rounds: self.rounds,
            ..RuntimeConfig::default()
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            scenario,
            options,
            trace,
        } => {
            let scenario: Scenario = scenario.parse()?;
            let runtime = Runtime::new(options.config());
            let report = runtime
                .run(scenario)
                .with_context(|| format!("scenario {} failed", scenario.name()))?;
            if trace {
                for line in &report.trace {
                    println!("{line}");
                }
                println!();
            }
            println!("{report}");
        }
        Commands::All { options } => {
            let runtime = Runtime::new(options.config());
            let mut failed = 0;
            for scenario in Scenario::ALL {
                match runtime.run(scenario) {
                    Ok(report) => println!("ok    {:<16} {} ticks", scenario.name(), report.ticks),
                    Err(e) => {
                        error!("{}: {}", scenario.name(), e);
                        println!("FAIL  {:<16} {}", scenario.name(), e);
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                bail!("{failed} scenario(s) failed");
            }
        }
        Commands::List => {
            for scenario in Scenario::ALL {
                println!("{:<16} {}", scenario.name(), scenario.description());
            }
        }
    }

    Ok(())
}

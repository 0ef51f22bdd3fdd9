use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use kernport_policy::ExecutionPolicy;
use serde::Serialize;
use tracing::{debug, info};

use crate::adaptive::{CallSite, RegionStats};
use crate::config::{KernelConfig, WarmupStrategy};
use crate::dispatch::LoopBody;
use crate::registry::KernelRegistry;
use crate::segment::{Index, IterationSpace};
use crate::statement;
use crate::utils::logger;
use crate::utils::profiler::{PhaseTiming, Profiler};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "kernport", version = VERSION, about = "Adaptive multi-policy loop kernels")]
pub struct KernportCli {
    #[arg(long, global = true)]
    /// Display phase timing information.
    time: bool,

    #[arg(long, global = true)]
    /// Async completion slots per region.
    pool_capacity: Option<usize>,

    #[arg(long, global = true)]
    /// Policy choice before the model has samples (default-index, round-robin).
    warmup: Option<WarmupStrategy>,

    #[command(subcommand)]
    command: Command,
}

impl KernportCli {
    pub const fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Runs a synthetic kernel through an adaptive region and reports what it learned.
    Bench {
        /// Extent of each dimension, outermost first.
        #[arg(long, value_delimiter = ',', default_value = "1000,64")]
        shape: Vec<usize>,
        /// Candidate policies in preference order.
        #[arg(long, value_delimiter = ',', default_value = "seq,threaded,device-async:256")]
        policies: Vec<ExecutionPolicy>,
        #[arg(short = 'n', long, default_value_t = 50)]
        iterations: u64,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
        /// Print the statement tree built for each candidate.
        #[arg(long)]
        explain: bool,
    },
    /// Prints the effective configuration.
    Config {
        #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

pub fn run() -> Result<()> {
    logger::init_logging();
    let cli = KernportCli::parse();
    match &cli.command {
        Command::Bench {
            shape,
            policies,
            iterations,
            format,
            explain,
        } => handle_bench(&cli, shape, policies, *iterations, *format, *explain),
        Command::Config { format } => handle_config(&cli, *format),
    }
}

fn effective_config(cli: &KernportCli) -> Result<KernelConfig> {
    let mut config = KernelConfig::load().context("failed to load configuration")?;
    if let Some(capacity) = cli.pool_capacity {
        config.pool_capacity = capacity;
    }
    if let Some(warmup) = cli.warmup {
        config.warmup = warmup;
    }
    config.validate()?;
    Ok(config)
}

fn handle_config(cli: &KernportCli, format: OutputFormat) -> Result<()> {
    let config = effective_config(cli)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
        OutputFormat::Yaml | OutputFormat::Table => print!("{}", serde_yaml::to_string(&config)?),
    }
    Ok(())
}

#[derive(Serialize)]
struct BenchReport {
    shape: Vec<usize>,
    iterations: u64,
    picks: Vec<u64>,
    stats: RegionStats,
}

fn handle_bench(
    cli: &KernportCli,
    shape: &[usize],
    policies: &[ExecutionPolicy],
    iterations: u64,
    format: OutputFormat,
    explain: bool,
) -> Result<()> {
    let mut profiler = Profiler::new();
    let config = profiler.record_phase("Config", || effective_config(cli))?;
    let registry = profiler
        .record_phase("Backends", || KernelRegistry::new(config))
        .context("failed to start backends")?;
    let space = IterationSpace::from_extents(shape).context("invalid --shape")?;
    info!(?shape, candidates = policies.len(), iterations, "starting bench");

    if explain {
        for (index, policy) in policies.iter().enumerate() {
            let tree = statement::build(&space, policy)?;
            println!("{} {index}: {policy}", "candidate".bold());
            print!("{tree}");
        }
    }

    let body: LoopBody = Arc::new(|idx: &[Index]| {
        let mut acc = 0_i64;
        for &i in idx {
            acc = acc.wrapping_mul(31).wrapping_add(i);
        }
        std::hint::black_box(acc);
    });
    let site = CallSite::named("bench");

    let pb = if format == OutputFormat::Table {
        ProgressBar::new(iterations)
    } else {
        ProgressBar::hidden()
    };
    if let Ok(style) = ProgressStyle::with_template("bench [{elapsed_precise}] {wide_bar} {pos}/{len}") {
        pb.set_style(style.progress_chars("=> "));
    }

    let picks = profiler.record_phase("Run", || {
        run_iterations(&registry, site, policies, &space, &body, iterations, || pb.inc(1))
    })?;
    pb.finish_and_clear();

    let stats = registry
        .region_stats(site)
        .context("bench region was never created")?;
    let report = BenchReport {
        shape: shape.to_vec(),
        iterations,
        picks,
        stats,
    };
    match format {
        OutputFormat::Table => print_table(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&report)?),
    }

    if cli.time {
        print_timings(profiler.phases());
    }
    Ok(())
}

/// Invoke the region `iterations` times and count how often each candidate
/// was picked. A full async pool is waited out and the call retried.
fn run_iterations(
    registry: &KernelRegistry,
    site: CallSite,
    policies: &[ExecutionPolicy],
    space: &IterationSpace,
    body: &LoopBody,
    iterations: u64,
    mut on_step: impl FnMut(),
) -> Result<Vec<u64>> {
    let mut picks = vec![0_u64; policies.len()];
    for _ in 0..iterations {
        let dispatch = match registry.invoke_shared(site, policies, space, body) {
            Err(err) if err.is_pool_exhausted() => {
                debug!(error = %err, "waiting for in-flight launches");
                registry.synchronize();
                registry.invoke_shared(site, policies, space, body)?
            }
            other => other?,
        };
        picks[dispatch.policy_index] += 1;
        on_step();
    }
    registry.synchronize();
    let collected = registry.drain()?;
    debug!(collected, "drained async launches");
    Ok(picks)
}

fn print_table(report: &BenchReport) {
    let fastest = report.stats.fastest();
    println!(
        "{} {} x{}",
        "region".bold(),
        report.stats.call_site,
        report.iterations
    );
    println!(
        "{:>3}  {:<20} {:>7} {:>7} {:>12} {:>8}",
        "#", "policy", "picks", "samples", "mean", "failures"
    );
    for (index, stats) in report.stats.policies.iter().enumerate() {
        let line = format!(
            "{:>3}  {:<20} {:>7} {:>7} {:>9.3} ms {:>8}",
            index,
            stats.policy.to_string(),
            report.picks[index],
            stats.samples,
            stats.mean().as_secs_f64() * 1000.0,
            stats.failures
        );
        if Some(index) == fastest {
            println!("{}", line.green().bold());
        } else {
            println!("{line}");
        }
    }
}

fn print_timings(phases: &[PhaseTiming]) {
    println!("{}", "[Timing]".bold());
    let mut total = Duration::ZERO;
    for PhaseTiming { name, duration } in phases {
        println!("{:>16}: {:>6.2} ms", name, duration.as_secs_f64() * 1000.0);
        total += *duration;
    }
    println!("{:>16}: {:>6.2} ms", "Total", total.as_secs_f64() * 1000.0);
}

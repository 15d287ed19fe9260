#![forbid(unsafe_code)]

use std::env;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use daybook_core::config::{RollbackStrategy, resolve_config};
use daybook_sim::campaign::{self, CampaignConfig};
use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(
    name = "daybook-sim",
    version,
    about = "Deterministic convergence simulation for daybook collections"
)]
struct Cli {
    /// Project root holding `.daybook/config.toml`.
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputMode::Text)]
    format: OutputMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputMode {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RollbackArg {
    Rebase,
    Snapshot,
}

impl From<RollbackArg> for RollbackStrategy {
    fn from(arg: RollbackArg) -> Self {
        match arg {
            RollbackArg::Rebase => Self::Rebase,
            RollbackArg::Snapshot => Self::Snapshot,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(
        about = "Run a simulation campaign across multiple seeds",
        after_help = "EXAMPLES:\n    # Run the configured number of seeds\n    daybook-sim run\n\n\
                      # More devices, longer runs\n    daybook-sim run --seeds 500 --clients 5 --rounds 64\n\n\
                      # Machine-readable output\n    daybook-sim run --format json"
    )]
    Run(RunArgs),

    #[command(
        about = "Replay a single seed with detailed trace output",
        after_help = "EXAMPLES:\n    # Replay seed 42\n    daybook-sim replay --seed 42\n\n\
                      # Dump every trace event\n    daybook-sim replay --seed 42 --trace"
    )]
    Replay(ReplayArgs),
}

/// Parameters shared by both subcommands; unset values come from `[sim]`.
#[derive(Args, Debug)]
struct Shape {
    /// Simulated devices.
    #[arg(long)]
    clients: Option<usize>,

    /// Rounds per seed.
    #[arg(long)]
    rounds: Option<u64>,

    /// Maximum delivery delay in rounds.
    #[arg(long)]
    max_delay: Option<u8>,

    /// Percentage of writes the server rejects.
    #[arg(long)]
    write_failures: Option<u8>,

    /// Rollback strategy for failed writes.
    #[arg(long, value_enum)]
    rollback: Option<RollbackArg>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Number of seeds to run.
    #[arg(long)]
    seeds: Option<u64>,

    /// First seed.
    #[arg(long, default_value = "0")]
    seed_start: u64,

    #[command(flatten)]
    shape: Shape,
}

#[derive(Args, Debug)]
struct ReplayArgs {
    #[arg(long)]
    seed: u64,

    /// Print every trace event.
    #[arg(long)]
    trace: bool,

    #[command(flatten)]
    shape: Shape,
}

#[derive(Debug, Serialize)]
struct RunOutput<'a> {
    seeds_run: usize,
    seeds_passed: usize,
    seeds_failed: usize,
    first_failure: Option<u64>,
    interesting_states_reached: usize,
    all_passed: bool,
    failures: &'a [campaign::SeedFailure],
}

#[derive(Debug, Serialize)]
struct ReplayOutput<'a> {
    seed: u64,
    oracle_passed: bool,
    violations: Vec<String>,
    interesting_state_reached: bool,
    trace_events: usize,
    trace_fingerprint: &'a str,
    server_rows: usize,
    stats: daybook_sim::simulator::SimulationStats,
    clients: &'a [daybook_sim::simulator::ClientSummary],
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let settings = resolve_config(&cli.project)
        .with_context(|| format!("loading config under {}", cli.project.display()))?;
    let base = CampaignConfig::from_section(&settings.sim, &settings.sync);

    let passed = match &cli.command {
        Command::Run(args) => run(args, base, cli.format)?,
        Command::Replay(args) => replay(args, base, cli.format)?,
    };

    // Exit code 1 on any failure for CI integration
    if !passed {
        process::exit(1);
    }
    Ok(())
}

fn shaped(mut config: CampaignConfig, shape: &Shape) -> CampaignConfig {
    if let Some(clients) = shape.clients {
        config.clients = clients;
    }
    if let Some(rounds) = shape.rounds {
        config.rounds = rounds;
    }
    if let Some(max_delay) = shape.max_delay {
        config.fault.max_delay_rounds = max_delay;
    }
    if let Some(rate) = shape.write_failures {
        config.fault.write_failure_percent = rate.min(100);
    }
    if let Some(rollback) = shape.rollback {
        config.sync.rollback = rollback.into();
    }
    config
}

fn run(args: &RunArgs, base: CampaignConfig, format: OutputMode) -> Result<bool> {
    let mut config = shaped(base, &args.shape);
    let seeds = args.seeds.unwrap_or(config.seed_range.end - config.seed_range.start);
    config.seed_range = args.seed_start..args.seed_start.saturating_add(seeds);

    let report = campaign::run_campaign(&config)?;
    let out = RunOutput {
        seeds_run: report.seeds_run,
        seeds_passed: report.seeds_passed,
        seeds_failed: report.failures.len(),
        first_failure: report.first_failure,
        interesting_states_reached: report.interesting_states_reached,
        all_passed: report.all_passed(),
        failures: &report.failures,
    };

    match format {
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(&out)?),
        OutputMode::Text => {
            println!(
                "campaign seeds_run={} clients={} rounds={} rollback={:?}",
                out.seeds_run, config.clients, config.rounds, config.sync.rollback
            );
            println!(
                "results passed={} failed={} interesting_states={} all_passed={}",
                out.seeds_passed, out.seeds_failed, out.interesting_states_reached, out.all_passed
            );
            for failure in out.failures.iter().take(5) {
                println!("failure seed={} violations={}", failure.seed, failure.violations.len());
                for violation in &failure.violations {
                    println!("  - {violation}");
                }
            }
            if out.failures.len() > 5 {
                println!("failures_truncated count={}", out.failures.len() - 5);
            }
            if let Some(seed) = out.first_failure {
                println!(
                    "hint replay: daybook-sim replay --seed {seed} --clients {} --rounds {}",
                    config.clients, config.rounds
                );
            }
        }
    }
    Ok(report.all_passed())
}

fn replay(args: &ReplayArgs, base: CampaignConfig, format: OutputMode) -> Result<bool> {
    let mut config = shaped(base, &args.shape);
    config.seed_range = args.seed..args.seed.saturating_add(1);

    let trace = campaign::replay_seed(args.seed, &config)?;
    let result = &trace.result;
    let out = ReplayOutput {
        seed: trace.seed,
        oracle_passed: result.oracle.passed,
        violations: result.oracle.violations.iter().map(ToString::to_string).collect(),
        interesting_state_reached: result.interesting_state_reached,
        trace_events: result.trace.len(),
        trace_fingerprint: &trace.fingerprint,
        server_rows: result.server_rows,
        stats: result.stats,
        clients: &result.clients,
    };

    match format {
        OutputMode::Json => {
            let mut value = serde_json::to_value(&out)?;
            if args.trace {
                value["trace"] = serde_json::to_value(&result.trace)?;
            }
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputMode::Text => {
            if args.trace {
                for event in &result.trace {
                    println!("round={} {}", event.round, serde_json::to_string(&event.kind)?);
                }
            }
            println!(
                "replay seed={} clients={} rounds={} rollback={:?}",
                out.seed, config.clients, config.rounds, config.sync.rollback
            );
            println!(
                "result oracle_passed={} interesting_state_reached={} trace_events={} server_rows={} fingerprint={}",
                out.oracle_passed,
                out.interesting_state_reached,
                out.trace_events,
                out.server_rows,
                out.trace_fingerprint
            );
            println!(
                "stats mutations={} refused={} write_failures={} claims={} merges={} remounts={} discarded={}",
                out.stats.mutations,
                out.stats.refused,
                out.stats.write_failures,
                out.stats.claimed_placeholders,
                out.stats.merged_in_flight,
                out.stats.remounts,
                out.stats.discarded
            );
            for client in out.clients {
                println!(
                    "client id={} scope={} generation={} visible={} observed={}",
                    client.id, client.scope, client.generation, client.visible, client.observed
                );
            }
            for violation in &out.violations {
                println!("violation={violation}");
            }
        }
    }
    Ok(out.oracle_passed)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("DAYBOOK_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "daybook=debug,info"
        } else {
            "daybook=info,warn"
        })
    });

    let format = env::var("DAYBOOK_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry.with(fmt::layer().compact().with_writer(std::io::stderr)).init();
        }
    }
}

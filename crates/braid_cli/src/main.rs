//! BRAID CLI
//!
//! Runs the broadcast, replay and replicate scenarios against the
//! in-process simulator and reports how long they took.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;

use braid_cluster::VoidCompletion;
use braid_sim::{FailureModel, ReplicateMode, ScenarioReport, SimHarness, SimSeed};
use clap::{Parser, Subcommand};
use color_eyre::Result;
use config::FileConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "braid")]
#[command(about = "BRAID - fan-out broadcast and replay/replicate over simulated sites", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
    /// JSON config file with `broadcast` and `sim` sections
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Simulation seed
    #[arg(long, global = true)]
    seed: Option<u64>,
    /// Base delivery latency in milliseconds
    #[arg(long, global = true)]
    latency_ms: Option<u64>,
    /// Random extra latency in milliseconds
    #[arg(long, global = true)]
    jitter_ms: Option<u64>,
    /// Probability of a transient failure per execution
    #[arg(long, global = true)]
    failure_rate: Option<f64>,
    /// Print the report as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Broadcast a probe to every site
    Broadcast {
        /// Number of sites
        #[arg(long, default_value_t = 64)]
        sites: usize,
        /// Direct invocations per dispatch step
        #[arg(long)]
        fanout: Option<usize>,
        /// Pass global indices to the probe
        #[arg(long)]
        with_index: bool,
        /// Succeed once every branch settled, whatever the outcomes
        #[arg(long)]
        structural: bool,
    },
    /// Retry each task sequentially across a rotating site pool
    Replay {
        /// Number of sites
        #[arg(long, default_value_t = 8)]
        sites: usize,
        /// Number of faulty sites
        #[arg(long, default_value_t = 2)]
        faulty: usize,
        /// Number of tasks
        #[arg(long, default_value_t = 100)]
        tasks: usize,
        /// Busy-work per call in microseconds
        #[arg(long, default_value_t = 0)]
        grain: u64,
        /// Validate every result
        #[arg(long)]
        validate: bool,
    },
    /// Run each task on every site at once
    Replicate {
        /// Number of sites
        #[arg(long, default_value_t = 8)]
        sites: usize,
        /// Number of faulty sites
        #[arg(long, default_value_t = 2)]
        faulty: usize,
        /// Number of tasks
        #[arg(long, default_value_t = 100)]
        tasks: usize,
        /// Busy-work per call in microseconds
        #[arg(long, default_value_t = 0)]
        grain: u64,
        /// race, validate, vote or vote-validate
        #[arg(long, default_value = "race")]
        mode: ReplicateMode,
    },
}

impl Cli {
    /// Config file values with command-line overrides applied
    fn settings(&self) -> Result<FileConfig> {
        let mut settings = match &self.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        if let Some(seed) = self.seed {
            settings.sim.seed = SimSeed::from_literal(seed);
        }
        if let Some(ms) = self.latency_ms {
            settings.sim.base_latency_ms = ms;
        }
        if let Some(ms) = self.jitter_ms {
            settings.sim.jitter_ms = ms;
        }
        if let Some(rate) = self.failure_rate {
            settings.sim.failure = FailureModel::new(rate);
        }
        if let Commands::Broadcast {
            fanout, structural, ..
        } = &self.command
        {
            if let Some(fanout) = fanout {
                settings.broadcast.local_fanout = *fanout;
            }
            if *structural {
                settings.broadcast.void_completion = VoidCompletion::Structural;
            }
        }
        Ok(settings)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "braid=debug" } else { "braid=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_report(report: &ScenarioReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{}", report.scenario);
        println!("  succeeded: {}/{}", report.succeeded, report.tasks);
        println!("  calls:     {}", report.calls);
        if report.transient_failures > 0 {
            println!("  transient: {}", report.transient_failures);
        }
        println!("  elapsed:   {} ms", report.elapsed_ms);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = cli.settings()?;
    let report = match cli.command {
        Commands::Broadcast {
            sites, with_index, ..
        } => {
            let harness = SimHarness::new(sites, settings.sim, settings.broadcast)?;
            harness.broadcast(with_index).await?
        }
        Commands::Replay {
            sites,
            faulty,
            tasks,
            grain,
            validate,
        } => {
            let harness = SimHarness::new(sites, settings.sim, settings.broadcast)?;
            harness.replay(faulty, tasks, grain, validate).await?
        }
        Commands::Replicate {
            sites,
            faulty,
            tasks,
            grain,
            mode,
        } => {
            let harness = SimHarness::new(sites, settings.sim, settings.broadcast)?;
            harness.replicate(faulty, tasks, grain, mode).await?
        }
    };

    tracing::info!(
        scenario = %report.scenario,
        succeeded = report.succeeded,
        tasks = report.tasks,
        elapsed_ms = report.elapsed_ms,
        "scenario complete"
    );
    print_report(&report, cli.json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_replicate() {
        let cli = Cli::try_parse_from([
            "braid", "replicate", "--sites", "5", "--faulty", "2", "--mode", "vote-validate",
        ])
        .unwrap();
        match cli.command {
            Commands::Replicate {
                sites, faulty, mode, ..
            } => {
                assert_eq!((sites, faulty), (5, 2));
                assert_eq!(mode, ReplicateMode::VoteValidate);
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let parsed = Cli::try_parse_from(["braid", "replicate", "--mode", "quorum"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "braid",
            "broadcast",
            "--fanout",
            "3",
            "--structural",
            "--seed",
            "7",
            "--jitter-ms",
            "2",
        ])
        .unwrap();
        let settings = cli.settings().unwrap();
        assert_eq!(settings.broadcast.local_fanout, 3);
        assert_eq!(settings.broadcast.void_completion, VoidCompletion::Structural);
        assert_eq!(settings.sim.seed, SimSeed::from_literal(7));
        assert_eq!(settings.sim.jitter_ms, 2);
    }
}

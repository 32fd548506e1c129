use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::types::Environment;

/// Upper bound for `--timeout` (one day)
pub const MAX_TIMEOUT_SECS: u64 = 86_400;

/// rollout - run a deployment story against a remote host
#[derive(Parser)]
#[command(name = "rollout")]
#[command(about = "Deploy a release to a remote host by running a story of shell tasks over SSH")]
#[command(version)]
pub struct Cli {
    /// Dry-run mode: print every rendered command without contacting the host.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Verbose logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Definition file
    #[arg(short, long, global = true, default_value = "deploy.json")]
    pub file: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the story against an environment
    Deploy {
        /// Target environment (staging or production)
        #[arg(short, long, default_value_t = Environment::Staging)]
        env: Environment,
        /// Commit to check out (defaults to the branch tip)
        #[arg(short, long)]
        commit: Option<String>,
        /// Per-command timeout in seconds (overrides the definition)
        #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..=MAX_TIMEOUT_SECS))]
        timeout: Option<u64>,
        /// Leave out an optional task (repeatable)
        #[arg(long = "skip", value_name = "TASK")]
        skip: Vec<String>,
    },
    /// Print the rendered commands for an environment without running them
    Plan {
        /// Target environment (staging or production)
        #[arg(short, long, default_value_t = Environment::Staging)]
        env: Environment,
        /// Commit to check out (defaults to the branch tip)
        #[arg(short, long)]
        commit: Option<String>,
        /// Leave out an optional task (repeatable)
        #[arg(long = "skip", value_name = "TASK")]
        skip: Vec<String>,
    },
    /// Validate a definition file
    Validate,
    /// Print the definition as loaded (normalized JSON)
    Show,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}

//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;

use crate::services::SamplingMode;

#[derive(Parser)]
#[command(name = "rollout")]
#[command(about = "Rollout - multi-turn coding-agent session tooling", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .rollout/config.yaml and .rollout/local.yaml)
    #[arg(short, long, global = true, env = "ROLLOUT_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Expand a declared parameter space into concrete runs
    Plan {
        /// YAML file with a `dimensions` list
        space: PathBuf,

        /// Exploration mode
        #[arg(short, long, value_enum, default_value_t = ModeArg::Grid)]
        mode: ModeArg,

        /// Grid: runs spread over grid points (0 = one per point).
        /// Random: distinct draws. Manual: replicas.
        #[arg(short = 'n', long, default_value = "0")]
        runs: usize,

        /// Seed for random mode
        #[arg(short, long)]
        seed: Option<u64>,

        /// Manual assignment KEY=VALUE (VALUE parsed as JSON when possible)
        #[arg(long = "set", value_parser = parse_assignment)]
        assignments: Vec<(String, Value)>,
    },

    /// Enrich an evaluation payload and render the agent feedback section
    Feedback {
        /// Payload JSON file, or `-` for stdin
        payload: PathBuf,

        /// Suite-family priority (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        priority: Vec<String>,

        /// Maximum failed tests shown
        #[arg(short, long)]
        limit: Option<usize>,

        /// Maximum characters per test block
        #[arg(long)]
        max_block_chars: Option<usize>,

        /// Directory of test sources laid out as `<suite>/<test_id>.<ext>`
        #[arg(long)]
        sources: Option<PathBuf>,
    },

    /// Stored trace commands
    #[command(subcommand)]
    Trace(TraceCommands),
}

#[derive(Subcommand)]
pub enum TraceCommands {
    /// Load a trajectory snapshot and tabulate its evaluations
    Show {
        /// Trajectory ID
        trajectory_id: String,

        /// Store location (overrides `store.url`)
        #[arg(long)]
        store: Option<String>,
    },
}

/// Sampling mode as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Grid,
    Random,
    Manual,
}

impl From<ModeArg> for SamplingMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Grid => Self::Grid,
            ModeArg::Random => Self::Random,
            ModeArg::Manual => Self::Manual,
        }
    }
}

/// Parse `KEY=VALUE`; VALUE is JSON when it parses, otherwise a string.
pub fn parse_assignment(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serde_json::json;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(parse_assignment("level=3").unwrap(), ("level".to_string(), json!(3)));
        assert_eq!(
            parse_assignment("lang=rust").unwrap(),
            ("lang".to_string(), json!("rust"))
        );
        assert_eq!(
            parse_assignment("flag=true").unwrap(),
            ("flag".to_string(), json!(true))
        );
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=1").is_err());
    }

    #[test]
    fn test_parse_plan_args() {
        let cli = Cli::try_parse_from([
            "rollout", "plan", "space.yaml", "--mode", "random", "-n", "4", "--seed", "7",
        ])
        .unwrap();
        match cli.command {
            Commands::Plan { mode, runs, seed, .. } => {
                assert_eq!(mode, ModeArg::Random);
                assert_eq!(runs, 4);
                assert_eq!(seed, Some(7));
            }
            _ => panic!("expected plan"),
        }
    }
}

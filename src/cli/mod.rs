//! CLI module for Infrastack
//!
//! Argument parsing and the overrides the command line layers on top of the
//! loaded configuration.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand, ValueEnum};
use infrastack::config::Config;
use std::path::PathBuf;

/// Infrastack - declare and apply a single-instance application stack
///
/// Builds a network, an access policy restricted to the caller and one
/// compute instance, in dependency order.
#[derive(Parser, Debug, Clone)]
#[command(name = "infrastack")]
#[command(author = "Infrastack Contributors")]
#[command(version)]
#[command(about = "Declare and apply a single-instance application stack", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(long, global = true, default_value = "human")]
    pub output: OutputFormat,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, env = "INFRASTACK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Stack name, prefix of every logical name
    #[arg(long, global = true)]
    pub stack_name: Option<String>,

    /// Cloud region
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Path of the JSON state file
    #[arg(long, global = true)]
    pub state_file: Option<PathBuf>,

    /// Application repository cloned at boot
    #[arg(long, global = true)]
    pub repo_url: Option<String>,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with colors
    #[default]
    Human,
    /// JSON output for scripting
    Json,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Build the stack and print its resources in wave order
    Plan(commands::plan::PlanArgs),

    /// Build the stack and apply it through the provisioning engine
    Apply(commands::apply::ApplyArgs),

    /// Print the outputs recorded by the last successful apply
    Outputs(commands::outputs::OutputsArgs),

    /// Print the rendered boot payload of the compute instance
    #[command(name = "boot-script")]
    BootScript(commands::boot_script::BootScriptArgs),

    /// Print the resource dependency graph in DOT format
    Graph(commands::graph::GraphArgs),
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }

    /// Check if JSON output is requested
    pub fn is_json(&self) -> bool {
        matches!(self.output, OutputFormat::Json)
    }

    /// Layer the flags given on the command line over `config`.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(name) = &self.stack_name {
            config.stack.name = Some(name.clone());
        }
        if let Some(region) = &self.region {
            config.stack.region = Some(region.clone());
        }
        if let Some(path) = &self.state_file {
            config.engine.state_file = Some(path.clone());
        }
        if let Some(url) = &self.repo_url {
            config.stack.repo_url = Some(url.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["infrastack", "plan"]).unwrap();
        assert!(matches!(cli.command, Commands::Plan(_)));
        assert!(!cli.is_json());
    }

    #[test]
    fn test_verbosity() {
        let cli = Cli::try_parse_from(["infrastack", "-vvvvv", "graph"]).unwrap();
        assert_eq!(cli.verbosity(), 3);
    }

    #[test]
    fn test_apply_simulate_flag() {
        let cli = Cli::try_parse_from(["infrastack", "apply", "--simulate"]).unwrap();
        match cli.command {
            Commands::Apply(args) => assert!(args.simulate),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["infrastack", "boot-script", "--output", "json"]).unwrap();
        assert!(cli.is_json());
        assert!(matches!(cli.command, Commands::BootScript(_)));
    }

    #[test]
    fn test_overrides_win_over_config() {
        let cli = Cli::try_parse_from([
            "infrastack",
            "--region",
            "eu-west-1",
            "--state-file",
            "/tmp/stack.json",
            "outputs",
        ])
        .unwrap();

        let mut config = Config::default();
        config.stack.region = Some("us-east-1".to_string());
        cli.apply_overrides(&mut config);

        assert_eq!(config.stack.region(), "eu-west-1");
        assert_eq!(config.engine.state_file(), PathBuf::from("/tmp/stack.json"));
        assert_eq!(config.stack.name(), "btc-tracker");
    }
}

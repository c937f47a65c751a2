//! Subcommands module for Infrastack CLI
//!
//! This module contains all the subcommand implementations.

pub mod apply;
pub mod boot_script;
pub mod graph;
pub mod outputs;
pub mod plan;

use crate::cli::output::OutputFormatter;
use anyhow::Result;
use infrastack::config::Config;
use infrastack::stack::{StackBuilder, StackInputs, StackPlan};
use tracing::debug;

/// Common context shared between commands
pub struct CommandContext {
    /// Configuration, with CLI overrides applied
    pub config: Config,
    /// Output formatter
    pub output: OutputFormatter,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &crate::cli::Cli, config: Config) -> Self {
        let output = OutputFormatter::new(!cli.no_color, cli.is_json(), cli.verbosity());

        Self { config, output }
    }

    /// Resolve the stack inputs and declare every resource.
    pub fn build_plan(&self) -> Result<StackPlan> {
        let inputs = StackInputs::from_config(&self.config.stack, &self.config.tags)?;
        debug!(?inputs, "Resolved stack inputs");

        let plan = StackBuilder::build(inputs)?;
        self.output.info(&format!(
            "Declared {} resources for stack {}",
            plan.graph().node_count(),
            plan.name()
        ));
        Ok(plan)
    }
}

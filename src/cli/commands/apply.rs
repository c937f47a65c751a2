//! Apply command
//!
//! Builds the stack and realizes it through the configured provider. The
//! state file is written after each resource, so an interrupted apply
//! picks up where it stopped.

use super::CommandContext;
use anyhow::{Context, Result};
use clap::Parser;
use infrastack::config::ProviderKind;
use infrastack::engine::{Engine, Provider, SimulatedProvider};
use infrastack::state::JsonStateStore;
use std::sync::Arc;
use tracing::info;

/// Arguments for the apply command
#[derive(Parser, Debug, Clone)]
pub struct ApplyArgs {
    /// Use the in-process simulated provider instead of the configured one
    #[arg(long)]
    pub simulate: bool,
}

impl ApplyArgs {
    /// Execute the apply command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let plan = ctx.build_plan()?;

        let kind = if self.simulate {
            ProviderKind::Simulated
        } else {
            ctx.config.engine.provider()
        };
        let provider = connect(kind, plan.region()).await?;

        let state_file = ctx.config.engine.state_file();
        let state = JsonStateStore::open(&state_file)
            .with_context(|| format!("Failed to open state file {}", state_file.display()))?;

        ctx.output.banner(&format!("APPLY [{}]", plan.name()));
        ctx.output.info(&format!(
            "Provider {} in {}, state in {}",
            provider.name(),
            plan.region(),
            state_file.display()
        ));
        if plan
            .boot_payload()
            .and_then(|payload| payload.repository())
            .is_some_and(|repo| repo.is_placeholder())
        {
            ctx.output
                .warning("repo_url is not set; the instance will clone a placeholder repository");
        }

        let engine = Engine::new(provider, Arc::new(state)).with_retry(ctx.config.engine.retry());
        let report = engine.apply(&plan).await?;
        info!(
            created = report.created.len(),
            reused = report.reused.len(),
            "Apply finished"
        );

        if ctx.output.is_json() {
            ctx.output.json(&serde_json::to_value(&report)?);
            return Ok(0);
        }

        ctx.output.list("Created", &report.created);
        ctx.output.list("Unchanged", &report.reused);
        ctx.output.list("Looked up", &report.resolved);
        ctx.output.section("Outputs");
        ctx.output.key_values(&report.outputs.entries());

        let summary = if report.changed() {
            format!("{} resources created", report.created.len())
        } else {
            "no changes".to_string()
        };
        ctx.output.success(&summary);

        Ok(0)
    }
}

/// Construct the provider the engine drives.
async fn connect(kind: ProviderKind, region: &str) -> Result<Arc<dyn Provider>> {
    match kind {
        ProviderKind::Simulated => Ok(Arc::new(SimulatedProvider::new(region))),
        #[cfg(feature = "aws")]
        ProviderKind::Aws => Ok(Arc::new(
            infrastack::engine::aws::AwsProvider::connect(region).await,
        )),
        #[cfg(not(feature = "aws"))]
        ProviderKind::Aws => anyhow::bail!(
            "The AWS provider is not compiled in; rebuild with `--features aws` or pass `--simulate`"
        ),
    }
}

//! Boot-script command
//!
//! Prints the boot payload exactly as the instance receives it.

use super::CommandContext;
use anyhow::{Context, Result};
use clap::Parser;

/// Arguments for the boot-script command
#[derive(Parser, Debug, Clone)]
pub struct BootScriptArgs {}

impl BootScriptArgs {
    /// Execute the boot-script command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let plan = ctx.build_plan()?;
        let payload = plan
            .boot_payload()
            .context("stack declares no compute instance")?;
        let script = plan.redact(&payload.render());

        if ctx.output.is_json() {
            let steps = serde_json::to_value(payload.steps())?;
            ctx.output.json(&serde_json::json!({
                "instance": plan.instance_name(),
                "steps": steps,
                "script": script,
            }));
        } else {
            ctx.output.plain(&script);
        }

        Ok(0)
    }
}

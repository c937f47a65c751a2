//! Plan command
//!
//! Declares the stack without touching any provider and prints the
//! resources in the order the engine would create them.

use super::CommandContext;
use anyhow::Result;
use clap::Parser;

/// Arguments for the plan command
#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    /// Also print the boot payload of the compute instance
    #[arg(long)]
    pub show_boot_script: bool,
}

impl PlanArgs {
    /// Execute the plan command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let plan = ctx.build_plan()?;

        if ctx.output.is_json() {
            ctx.output.plain(&plan.to_json()?);
            return Ok(0);
        }

        ctx.output.banner(&format!("PLAN [{}]", plan.name()));
        ctx.output.plain(&plan.render()?);

        if self.show_boot_script {
            if let Some(payload) = plan.boot_payload() {
                ctx.output.section("Boot payload");
                ctx.output.plain(&plan.redact(&payload.render()));
            }
        }

        Ok(0)
    }
}

//! Graph command

use super::CommandContext;
use anyhow::Result;
use clap::Parser;

/// Arguments for the graph command
#[derive(Parser, Debug, Clone)]
pub struct GraphArgs {}

impl GraphArgs {
    /// Print the dependency graph, DOT in human mode and an adjacency
    /// list in JSON mode.
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let plan = ctx.build_plan()?;
        let graph = plan.graph();

        if ctx.output.is_json() {
            let nodes: Vec<serde_json::Value> = graph
                .resources()
                .map(|resource| {
                    serde_json::json!({
                        "name": resource.name,
                        "kind": resource.kind().as_str(),
                        "depends_on": graph.direct_dependencies(&resource.name),
                    })
                })
                .collect();
            ctx.output.json(&serde_json::json!({
                "nodes": nodes,
                "edges": graph.edge_count(),
            }));
        } else {
            ctx.output.plain(&plan.redact(&graph.to_dot()));
        }

        Ok(0)
    }
}

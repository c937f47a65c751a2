//! Outputs command
//!
//! Reads the outputs the last successful apply wrote to the state file.
//! No provider is contacted.

use super::CommandContext;
use anyhow::Result;
use clap::Parser;
use infrastack::state::{JsonStateStore, StateStore};

/// Arguments for the outputs command
#[derive(Parser, Debug, Clone)]
pub struct OutputsArgs {
    /// Print a single output value, e.g. `public_ip`
    pub name: Option<String>,
}

impl OutputsArgs {
    /// Execute the outputs command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let path = ctx.config.engine.state_file();
        if !path.exists() {
            ctx.output.error(&format!("No state file at {}", path.display()));
            ctx.output.hint("run `infrastack apply` first");
            return Ok(1);
        }

        let store = JsonStateStore::open(&path)?;
        let Some(outputs) = store.get_outputs()? else {
            ctx.output.error(&format!("No outputs recorded in {}", path.display()));
            ctx.output
                .hint("the last apply did not complete; run `infrastack apply` again");
            return Ok(1);
        };

        let entries = outputs.entries();
        if let Some(name) = &self.name {
            let Some((_, value)) = entries.iter().find(|(key, _)| *key == name.as_str()) else {
                let known: Vec<&str> = entries.iter().map(|(key, _)| *key).collect();
                anyhow::bail!("Unknown output '{}', expected one of {}", name, known.join(", "));
            };
            if ctx.output.is_json() {
                let mut single = serde_json::Map::new();
                single.insert(name.clone(), serde_json::Value::from(*value));
                ctx.output.json(&serde_json::Value::Object(single));
            } else {
                ctx.output.plain(value);
            }
            return Ok(0);
        }

        if ctx.output.is_json() {
            ctx.output.json(&serde_json::to_value(&outputs)?);
        } else {
            ctx.output.key_values(&entries);
        }

        Ok(0)
    }
}

//! The single-instance application stack.
//!
//! [`StackInputs`] are resolved from configuration, [`StackBuilder`]
//! declares the resources phase by phase, and the result is a
//! [`StackPlan`]: the resource graph plus what the engine needs to realize
//! it and read the outputs back.
//!
//! ```rust
//! use infrastack::secrets::SensitiveString;
//! use infrastack::stack::{StackBuilder, StackInputs};
//!
//! let inputs = StackInputs::new(
//!     "10.0.0.0/16",
//!     "10.0.1.0/24",
//!     SensitiveString::new("203.0.113.5/32"),
//!     "ssh-ed25519 AAAAC3Nz example",
//! );
//! let plan = StackBuilder::build(inputs).unwrap();
//! assert_eq!(plan.graph().node_count(), 9);
//! assert!(!plan.render().unwrap().contains("203.0.113.5"));
//! ```

mod builder;
mod inputs;

pub use builder::{Phase, StackBuilder, APP_PORT, SSH_PORT};
pub use inputs::{StackInputs, DEFAULT_INSTANCE_TYPE};

use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::provision::BootPayload;
use crate::resources::{Resource, ResourceSpec, SourceRange};
use crate::secrets::NoLogRegistry;
use crate::state::ResourceGraph;

/// A fully declared stack, ready to apply.
pub struct StackPlan {
    name: String,
    region: String,
    graph: ResourceGraph,
    instance: String,
    redactor: Arc<NoLogRegistry>,
}

#[derive(Serialize)]
struct PlanDocument<'a> {
    name: &'a str,
    region: &'a str,
    waves: Vec<Vec<&'a Resource>>,
}

impl StackPlan {
    pub(crate) fn new(
        name: String,
        region: String,
        graph: ResourceGraph,
        instance: String,
        redactor: Arc<NoLogRegistry>,
    ) -> Self {
        Self {
            name,
            region,
            graph,
            instance,
            redactor,
        }
    }

    /// Stack name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target region.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// The declared resources.
    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    /// Logical name of the compute instance the outputs come from.
    pub fn instance_name(&self) -> &str {
        &self.instance
    }

    /// Resources grouped into waves that can be created concurrently.
    pub fn waves(&self) -> Result<Vec<Vec<&Resource>>> {
        self.graph.waves()
    }

    /// Boot payload carried by the compute instance.
    pub fn boot_payload(&self) -> Option<&BootPayload> {
        match self.graph.get(&self.instance).map(|r| &r.spec) {
            Some(ResourceSpec::ComputeInstance(instance)) => Some(&instance.boot),
            _ => None,
        }
    }

    /// Mask every registered sensitive value in `text`.
    pub fn redact(&self, text: &str) -> String {
        self.redactor.redact(text)
    }

    /// Human-readable plan, one line per resource, in wave order.
    pub fn render(&self) -> Result<String> {
        let waves = self.waves()?;
        let mut out = String::new();

        let _ = writeln!(
            out,
            "Stack {} ({}): {} resources in {} waves",
            self.name,
            self.region,
            self.graph.node_count(),
            waves.len()
        );
        for (index, wave) in waves.iter().enumerate() {
            let _ = writeln!(out, "\nWave {}", index + 1);
            for resource in wave {
                let _ = writeln!(
                    out,
                    "  + {:<18} {:<24} {}",
                    resource.kind().as_str(),
                    resource.name,
                    summarize(resource)
                );
            }
        }

        Ok(self.redact(&out))
    }

    /// Machine-readable plan.
    pub fn to_json(&self) -> Result<String> {
        let document = PlanDocument {
            name: &self.name,
            region: &self.region,
            waves: self.waves()?,
        };
        let json = serde_json::to_string_pretty(&document)?;
        Ok(self.redact(&json))
    }
}

/// One-line summary of a declaration.
fn summarize(resource: &Resource) -> String {
    match &resource.spec {
        ResourceSpec::NetworkBlock(vpc) => format!(
            "cidr={} dns_support={} dns_hostnames={}",
            vpc.cidr_block, vpc.enable_dns_support, vpc.enable_dns_hostnames
        ),
        ResourceSpec::Gateway(gw) => format!("attached to {}", gw.network),
        ResourceSpec::Subnet(subnet) => format!(
            "cidr={} zone={} public_ip_on_launch={}",
            subnet.cidr_block,
            subnet.availability_zone.as_deref().unwrap_or("(first available)"),
            subnet.map_public_ip_on_launch
        ),
        ResourceSpec::RouteTable(rt) => rt
            .routes
            .iter()
            .map(|r| format!("{} -> {}", r.destination, r.gateway))
            .collect::<Vec<_>>()
            .join(", "),
        ResourceSpec::RouteAssociation(assoc) => {
            format!("{} <-> {}", assoc.subnet, assoc.route_table)
        }
        ResourceSpec::AccessPolicy(policy) => {
            let ingress: Vec<String> = policy
                .ingress
                .iter()
                .map(|rule| {
                    let sources: Vec<String> = rule.sources.iter().map(source_label).collect();
                    format!(
                        "{}/{} from {}",
                        rule.protocol,
                        port_label(rule.from_port, rule.to_port),
                        sources.join(" ")
                    )
                })
                .collect();
            format!("ingress {}; egress {} rule(s)", ingress.join(", "), policy.egress.len())
        }
        ResourceSpec::ImageReference(image) => format!(
            "{} owners={}{}",
            image.filter.name_pattern,
            image.filter.owners.join(","),
            if image.filter.most_recent { " most_recent" } else { "" }
        ),
        ResourceSpec::KeyCredential(key) => format!("key_name={}", key.key_name),
        ResourceSpec::ComputeInstance(instance) => format!(
            "{} root={}GiB {} boot_steps={}",
            instance.instance_type,
            instance.root_volume.size_gib,
            instance.root_volume.volume_type,
            instance.boot.len()
        ),
    }
}

fn source_label(source: &SourceRange) -> String {
    match source {
        SourceRange::Caller(ip) => ip.to_string(),
        SourceRange::Cidr(cidr) => cidr.clone(),
    }
}

fn port_label(from: u16, to: u16) -> String {
    if from == to {
        from.to_string()
    } else {
        format!("{}-{}", from, to)
    }
}

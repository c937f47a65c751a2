//! Stack builder.
//!
//! Declares the resources of the stack phase by phase:
//!
//! ```text
//! Network -> Access -> ComputeInputs -> Compute -> Outputs
//! ```
//!
//! Every declaration goes through [`StackBuilder::declare`], which enforces
//! the local invariants before the resource joins the graph. Any failure
//! aborts the pass; nothing is created by the builder itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use super::inputs::StackInputs;
use super::StackPlan;
use crate::error::{Error, Result};
use crate::provision::rails_postgres_recipe;
use crate::resources::{
    name_tags, AccessPolicy, ComputeInstance, EgressRule, Gateway, ImageFilter, ImageReference,
    IngressRule, KeyCredential, NetworkBlock, Resource, ResourceSpec, RouteAssociation,
    RouteEntry, RouteTable, SourceRange, Subnet,
};
use crate::secrets::NoLogRegistry;
use crate::state::ResourceGraph;

/// Port of the SSH daemon.
pub const SSH_PORT: u16 = 22;

/// Port the Rails application listens on.
pub const APP_PORT: u16 = 3000;

/// Phases of a pass, in the only order they may be entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Network,
    Access,
    ComputeInputs,
    Compute,
    Outputs,
}

impl Phase {
    /// Every phase, in order.
    pub const ALL: [Phase; 5] = [
        Phase::Network,
        Phase::Access,
        Phase::ComputeInputs,
        Phase::Compute,
        Phase::Outputs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Network => "network",
            Phase::Access => "access",
            Phase::ComputeInputs => "compute-inputs",
            Phase::Compute => "compute",
            Phase::Outputs => "outputs",
        }
    }

    /// The phase that follows this one.
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Network => Some(Phase::Access),
            Phase::Access => Some(Phase::ComputeInputs),
            Phase::ComputeInputs => Some(Phase::Compute),
            Phase::Compute => Some(Phase::Outputs),
            Phase::Outputs => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical names declared by the network phase.
#[derive(Debug, Clone)]
struct NetworkNames {
    vpc: String,
    subnet: String,
}

/// Declares a stack into a [`ResourceGraph`].
pub struct StackBuilder {
    inputs: StackInputs,
    graph: ResourceGraph,
    phase: Option<Phase>,
    /// Subnet to the route table it is bound to
    associations: HashMap<String, String>,
    redactor: Arc<NoLogRegistry>,
}

impl StackBuilder {
    pub fn new(inputs: StackInputs) -> Self {
        let redactor = NoLogRegistry::shared();
        redactor.register(&inputs.my_ip);

        Self {
            inputs,
            graph: ResourceGraph::new(),
            phase: None,
            associations: HashMap::new(),
            redactor,
        }
    }

    /// Build the whole stack.
    pub fn build(inputs: StackInputs) -> Result<StackPlan> {
        let mut builder = Self::new(inputs);

        builder.enter(Phase::Network)?;
        let network = builder.declare_network()?;

        builder.enter(Phase::Access)?;
        let policy = builder.declare_access(&network.vpc)?;

        builder.enter(Phase::ComputeInputs)?;
        let (image, key) = builder.declare_compute_inputs()?;

        builder.enter(Phase::Compute)?;
        let instance = builder.declare_compute(&network.subnet, &policy, &image, &key)?;

        builder.enter(Phase::Outputs)?;
        builder.finish(instance)
    }

    /// The phase the builder is in.
    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    /// Move to the next phase. Phases cannot be skipped or revisited.
    pub fn enter(&mut self, next: Phase) -> Result<()> {
        let expected = match self.phase {
            None => Some(Phase::Network),
            Some(current) => current.next(),
        };
        if expected != Some(next) {
            return Err(Error::PhaseOrder {
                current: self.phase.map_or("start", |p| p.as_str()),
                next: next.as_str(),
            });
        }

        debug!("Entering phase {}", next);
        self.phase = Some(next);
        Ok(())
    }

    /// Declare one resource after checking the local invariants.
    pub fn declare(&mut self, resource: Resource) -> Result<()> {
        match &resource.spec {
            ResourceSpec::AccessPolicy(policy) => policy.check_restricted(&resource.name)?,
            ResourceSpec::RouteAssociation(assoc) => {
                if let Some(bound) = self.associations.get(&assoc.subnet) {
                    return Err(Error::DuplicateAssociation {
                        subnet: assoc.subnet.clone(),
                        route_table: bound.clone(),
                    });
                }
            }
            ResourceSpec::RouteTable(rt) => {
                for route in &rt.routes {
                    self.check_same_network(&route.gateway, &rt.network)?;
                }
            }
            ResourceSpec::ComputeInstance(instance) => {
                let network = self
                    .graph
                    .get(&instance.subnet)
                    .and_then(|subnet| subnet.spec.network())
                    .map(str::to_string);
                if let Some(network) = network {
                    for policy in &instance.access_policies {
                        self.check_same_network(policy, &network)?;
                    }
                }
            }
            _ => {}
        }

        let association = match &resource.spec {
            ResourceSpec::RouteAssociation(assoc) => {
                Some((assoc.subnet.clone(), assoc.route_table.clone()))
            }
            _ => None,
        };

        debug!("Declaring {} {}", resource.kind(), resource.name);
        self.graph.declare(resource)?;

        if let Some((subnet, route_table)) = association {
            self.associations.insert(subnet, route_table);
        }
        Ok(())
    }

    /// Fail when `name` is declared in a network other than `network`.
    fn check_same_network(&self, name: &str, network: &str) -> Result<()> {
        if let Some(found) = self.graph.get(name).and_then(|r| r.spec.network()) {
            if found != network {
                return Err(Error::NetworkMismatch {
                    resource: name.to_string(),
                    expected: network.to_string(),
                    found: found.to_string(),
                });
            }
        }
        Ok(())
    }

    fn declare_network(&mut self) -> Result<NetworkNames> {
        let vpc = self.inputs.logical_name("vpc");
        let igw = self.inputs.logical_name("igw");
        let subnet = self.inputs.logical_name("subnet");
        let rt = self.inputs.logical_name("rt");
        let tags = &self.inputs.tags;

        let declarations = vec![
            Resource::new(
                &vpc,
                ResourceSpec::NetworkBlock(NetworkBlock::with_dns(
                    &self.inputs.vpc_cidr,
                    name_tags(&vpc, tags),
                )),
            ),
            Resource::new(
                &igw,
                ResourceSpec::Gateway(Gateway {
                    network: vpc.clone(),
                    tags: name_tags(&igw, tags),
                }),
            ),
            Resource::new(
                &subnet,
                ResourceSpec::Subnet(Subnet {
                    network: vpc.clone(),
                    cidr_block: self.inputs.subnet_cidr.clone(),
                    availability_zone: self.inputs.availability_zone.clone(),
                    map_public_ip_on_launch: true,
                    tags: name_tags(&subnet, tags),
                }),
            ),
            Resource::new(
                &rt,
                ResourceSpec::RouteTable(RouteTable {
                    network: vpc.clone(),
                    routes: vec![RouteEntry::default_via(&igw)],
                    tags: name_tags(&rt, tags),
                }),
            ),
            Resource::new(
                self.inputs.logical_name("rt-assoc"),
                ResourceSpec::RouteAssociation(RouteAssociation {
                    subnet: subnet.clone(),
                    route_table: rt.clone(),
                }),
            ),
        ];

        for resource in declarations {
            self.declare(resource)?;
        }

        Ok(NetworkNames { vpc, subnet })
    }

    fn declare_access(&mut self, vpc: &str) -> Result<String> {
        let sg = self.inputs.logical_name("sg");
        let caller = || vec![SourceRange::Caller(self.inputs.my_ip.clone())];

        let policy = AccessPolicy {
            network: vpc.to_string(),
            description: "Security group for BTC tracker instance".to_string(),
            ingress: vec![
                IngressRule::tcp(SSH_PORT, caller()).with_description("SSH"),
                IngressRule::tcp(APP_PORT, caller()).with_description("Rails application"),
            ],
            egress: vec![EgressRule::allow_all()],
            tags: name_tags(&sg, &self.inputs.tags),
        };

        self.declare(Resource::new(&sg, ResourceSpec::AccessPolicy(policy)))?;
        Ok(sg)
    }

    fn declare_compute_inputs(&mut self) -> Result<(String, String)> {
        let ami = self.inputs.logical_name("ami");
        let key = self.inputs.logical_name("key");

        self.declare(Resource::new(
            &ami,
            ResourceSpec::ImageReference(ImageReference {
                filter: ImageFilter::default(),
            }),
        ))?;
        self.declare(Resource::new(
            &key,
            ResourceSpec::KeyCredential(KeyCredential {
                key_name: key.clone(),
                public_key: self.inputs.public_key.clone(),
                tags: name_tags(&key, &self.inputs.tags),
            }),
        ))?;

        Ok((ami, key))
    }

    fn declare_compute(
        &mut self,
        subnet: &str,
        policy: &str,
        image: &str,
        key: &str,
    ) -> Result<String> {
        let name = self.inputs.logical_name("instance");

        let instance = ComputeInstance {
            instance_type: self.inputs.instance_type.clone(),
            image: image.to_string(),
            subnet: subnet.to_string(),
            access_policies: vec![policy.to_string()],
            key: key.to_string(),
            root_volume: self.inputs.root_volume.clone(),
            boot: rails_postgres_recipe(&self.inputs.repo_url),
            // The instance is tagged with the bare stack name.
            tags: name_tags(&self.inputs.name, &self.inputs.tags),
        };

        self.declare(Resource::new(&name, ResourceSpec::ComputeInstance(instance)))?;
        Ok(name)
    }

    /// Close the pass and hand out the plan.
    pub fn finish(self, instance: String) -> Result<StackPlan> {
        if self.phase != Some(Phase::Outputs) {
            return Err(Error::PhaseOrder {
                current: self.phase.map_or("start", |p| p.as_str()),
                next: Phase::Outputs.as_str(),
            });
        }

        info!(
            "Declared stack {} with {} resources",
            self.inputs.name,
            self.graph.node_count()
        );

        Ok(StackPlan::new(
            self.inputs.name,
            self.inputs.region,
            self.graph,
            instance,
            self.redactor,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::SensitiveString;

    fn inputs() -> StackInputs {
        StackInputs::new(
            "10.0.0.0/16",
            "10.0.1.0/24",
            SensitiveString::new("203.0.113.5/32"),
            "ssh-ed25519 AAAAC3Nz test",
        )
    }

    #[test]
    fn test_phases_must_be_entered_in_order() {
        let mut builder = StackBuilder::new(inputs());
        builder.enter(Phase::Network).unwrap();

        let err = builder.enter(Phase::Compute).unwrap_err();
        assert!(matches!(
            err,
            Error::PhaseOrder { current: "network", next: "compute" }
        ));
        assert_eq!(builder.phase(), Some(Phase::Network));
    }

    #[test]
    fn test_first_phase_is_network() {
        let mut builder = StackBuilder::new(inputs());
        assert!(matches!(
            builder.enter(Phase::Access),
            Err(Error::PhaseOrder { current: "start", .. })
        ));
    }

    #[test]
    fn test_second_association_of_a_subnet_is_rejected() {
        let mut builder = StackBuilder::new(inputs());
        builder.enter(Phase::Network).unwrap();
        builder.declare_network().unwrap();

        builder
            .declare(Resource::new(
                "extra-rt",
                ResourceSpec::RouteTable(RouteTable {
                    network: "btc-tracker-vpc".to_string(),
                    routes: Vec::new(),
                    tags: Default::default(),
                }),
            ))
            .unwrap();

        let err = builder
            .declare(Resource::new(
                "extra-assoc",
                ResourceSpec::RouteAssociation(RouteAssociation {
                    subnet: "btc-tracker-subnet".to_string(),
                    route_table: "extra-rt".to_string(),
                }),
            ))
            .unwrap_err();

        assert!(matches!(
            err,
            Error::DuplicateAssociation { ref subnet, ref route_table }
                if subnet == "btc-tracker-subnet" && route_table == "btc-tracker-rt"
        ));
    }

    #[test]
    fn test_route_through_foreign_gateway_is_rejected() {
        let mut builder = StackBuilder::new(inputs());
        builder.enter(Phase::Network).unwrap();
        builder.declare_network().unwrap();

        builder
            .declare(Resource::new(
                "other-vpc",
                ResourceSpec::NetworkBlock(NetworkBlock::with_dns("10.1.0.0/16", Default::default())),
            ))
            .unwrap();

        let err = builder
            .declare(Resource::new(
                "other-rt",
                ResourceSpec::RouteTable(RouteTable {
                    network: "other-vpc".to_string(),
                    routes: vec![RouteEntry::default_via("btc-tracker-igw")],
                    tags: Default::default(),
                }),
            ))
            .unwrap_err();

        assert!(matches!(err, Error::NetworkMismatch { ref found, .. } if found == "btc-tracker-vpc"));
    }

    #[test]
    fn test_unrestricted_policy_is_rejected_before_declaration() {
        let mut builder = StackBuilder::new(StackInputs {
            my_ip: SensitiveString::new("0.0.0.0/0"),
            ..inputs()
        });
        builder.enter(Phase::Network).unwrap();
        let network = builder.declare_network().unwrap();
        builder.enter(Phase::Access).unwrap();

        let err = builder.declare_access(&network.vpc).unwrap_err();
        assert!(matches!(err, Error::UnrestrictedIngress { from_port: 22, .. }));
        assert!(!builder.graph.contains("btc-tracker-sg"));
    }
}

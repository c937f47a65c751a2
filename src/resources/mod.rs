//! Resource declarations.
//!
//! Every resource in a stack is a [`Resource`]: a stable logical name plus a
//! typed [`ResourceSpec`]. Specs refer to each other by logical name only;
//! the provisioning engine swaps those names for provider identifiers when it
//! realizes the graph.
//!
//! ## Kinds
//!
//! | Kind | Spec | References |
//! |------|------|------------|
//! | `network_block` | [`NetworkBlock`] | - |
//! | `gateway` | [`Gateway`] | network |
//! | `subnet` | [`Subnet`] | network |
//! | `route_table` | [`RouteTable`] | network, gateway (per route) |
//! | `route_association` | [`RouteAssociation`] | subnet, route table |
//! | `access_policy` | [`AccessPolicy`] | network |
//! | `image_reference` | [`ImageReference`] | - |
//! | `key_credential` | [`KeyCredential`] | - |
//! | `compute_instance` | [`ComputeInstance`] | subnet, access policies, key, image |

pub mod access;
pub mod compute;
pub mod network;

pub use access::{AccessPolicy, EgressRule, IngressRule, Protocol, SourceRange};
pub use compute::{ComputeInstance, ImageFilter, ImageReference, KeyCredential, RootVolume};
pub use network::{Gateway, NetworkBlock, RouteAssociation, RouteEntry, RouteTable, Subnet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Tag set attached to a taggable resource, in insertion order.
pub type Tags = IndexMap<String, String>;

/// Build a tag set with a `Name` tag followed by the stack-wide tags.
pub fn name_tags(display_name: &str, extra: &Tags) -> Tags {
    let mut tags = Tags::new();
    tags.insert("Name".to_string(), display_name.to_string());
    for (key, value) in extra {
        if key != "Name" {
            tags.insert(key.clone(), value.clone());
        }
    }
    tags
}

/// The kind of a declared resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    NetworkBlock,
    Gateway,
    Subnet,
    RouteTable,
    RouteAssociation,
    AccessPolicy,
    ImageReference,
    KeyCredential,
    ComputeInstance,
}

impl ResourceKind {
    /// Stable snake_case name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::NetworkBlock => "network_block",
            ResourceKind::Gateway => "gateway",
            ResourceKind::Subnet => "subnet",
            ResourceKind::RouteTable => "route_table",
            ResourceKind::RouteAssociation => "route_association",
            ResourceKind::AccessPolicy => "access_policy",
            ResourceKind::ImageReference => "image_reference",
            ResourceKind::KeyCredential => "key_credential",
            ResourceKind::ComputeInstance => "compute_instance",
        }
    }

    /// Data sources are looked up, never created, and never reused from state.
    pub fn is_data_source(&self) -> bool {
        matches!(self, ResourceKind::ImageReference)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference from one resource to another, by logical name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference<'a> {
    /// Logical name of the referenced resource
    pub target: &'a str,
    /// Kind the referenced resource must have
    pub expected: ResourceKind,
}

impl<'a> Reference<'a> {
    fn new(target: &'a str, expected: ResourceKind) -> Self {
        Self { target, expected }
    }
}

/// Typed declaration of a single resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    NetworkBlock(NetworkBlock),
    Gateway(Gateway),
    Subnet(Subnet),
    RouteTable(RouteTable),
    RouteAssociation(RouteAssociation),
    AccessPolicy(AccessPolicy),
    ImageReference(ImageReference),
    KeyCredential(KeyCredential),
    ComputeInstance(ComputeInstance),
}

impl ResourceSpec {
    /// Kind of this spec.
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::NetworkBlock(_) => ResourceKind::NetworkBlock,
            ResourceSpec::Gateway(_) => ResourceKind::Gateway,
            ResourceSpec::Subnet(_) => ResourceKind::Subnet,
            ResourceSpec::RouteTable(_) => ResourceKind::RouteTable,
            ResourceSpec::RouteAssociation(_) => ResourceKind::RouteAssociation,
            ResourceSpec::AccessPolicy(_) => ResourceKind::AccessPolicy,
            ResourceSpec::ImageReference(_) => ResourceKind::ImageReference,
            ResourceSpec::KeyCredential(_) => ResourceKind::KeyCredential,
            ResourceSpec::ComputeInstance(_) => ResourceKind::ComputeInstance,
        }
    }

    /// Every resource this spec refers to.
    pub fn references(&self) -> Vec<Reference<'_>> {
        use ResourceKind as K;

        match self {
            ResourceSpec::NetworkBlock(_)
            | ResourceSpec::ImageReference(_)
            | ResourceSpec::KeyCredential(_) => Vec::new(),
            ResourceSpec::Gateway(gw) => vec![Reference::new(&gw.network, K::NetworkBlock)],
            ResourceSpec::Subnet(subnet) => {
                vec![Reference::new(&subnet.network, K::NetworkBlock)]
            }
            ResourceSpec::RouteTable(rt) => {
                let mut refs = vec![Reference::new(&rt.network, K::NetworkBlock)];
                refs.extend(rt.routes.iter().map(|r| Reference::new(&r.gateway, K::Gateway)));
                refs
            }
            ResourceSpec::RouteAssociation(assoc) => vec![
                Reference::new(&assoc.subnet, K::Subnet),
                Reference::new(&assoc.route_table, K::RouteTable),
            ],
            ResourceSpec::AccessPolicy(policy) => {
                vec![Reference::new(&policy.network, K::NetworkBlock)]
            }
            ResourceSpec::ComputeInstance(instance) => {
                let mut refs = vec![Reference::new(&instance.subnet, K::Subnet)];
                refs.extend(
                    instance
                        .access_policies
                        .iter()
                        .map(|p| Reference::new(p, K::AccessPolicy)),
                );
                refs.push(Reference::new(&instance.key, K::KeyCredential));
                refs.push(Reference::new(&instance.image, K::ImageReference));
                refs
            }
        }
    }

    /// The network this resource lives in, when it is network-scoped directly.
    pub fn network(&self) -> Option<&str> {
        match self {
            ResourceSpec::Gateway(gw) => Some(&gw.network),
            ResourceSpec::Subnet(subnet) => Some(&subnet.network),
            ResourceSpec::RouteTable(rt) => Some(&rt.network),
            ResourceSpec::AccessPolicy(policy) => Some(&policy.network),
            _ => None,
        }
    }

    /// Tags carried by the resource, if it is taggable.
    pub fn tags(&self) -> Option<&Tags> {
        match self {
            ResourceSpec::NetworkBlock(r) => Some(&r.tags),
            ResourceSpec::Gateway(r) => Some(&r.tags),
            ResourceSpec::Subnet(r) => Some(&r.tags),
            ResourceSpec::RouteTable(r) => Some(&r.tags),
            ResourceSpec::AccessPolicy(r) => Some(&r.tags),
            ResourceSpec::KeyCredential(r) => Some(&r.tags),
            ResourceSpec::ComputeInstance(r) => Some(&r.tags),
            ResourceSpec::RouteAssociation(_) | ResourceSpec::ImageReference(_) => None,
        }
    }

    /// Sensitive values embedded in the spec, exposed for fingerprinting only.
    fn sensitive_material(&self) -> Vec<&str> {
        match self {
            ResourceSpec::AccessPolicy(policy) => policy
                .ingress
                .iter()
                .flat_map(|rule| rule.sources.iter().map(SourceRange::expose))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// A declared resource: logical name plus spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Stable logical name, unique within a stack
    pub name: String,
    /// Typed declaration
    #[serde(flatten)]
    pub spec: ResourceSpec,
}

impl Resource {
    /// Create a new resource declaration.
    pub fn new(name: impl Into<String>, spec: ResourceSpec) -> Self {
        Self {
            name: name.into(),
            spec,
        }
    }

    /// Kind of the resource.
    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }

    /// Digest of the declaration, sensitive values included.
    ///
    /// The digest changes whenever any declared field changes, including
    /// sensitive ones, without ever writing those values out in clear.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        // Serialization of a spec cannot fail: all keys are strings.
        if let Ok(json) = serde_json::to_vec(&self.spec) {
            hasher.update(&json);
        }
        for secret in self.spec.sensitive_material() {
            hasher.update([0u8]);
            hasher.update(secret.as_bytes());
        }
        hex_digest(&hasher.finalize())
    }
}

/// Lowercase hex encoding of a digest.
pub(crate) fn hex_digest(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::SensitiveString;

    fn policy(source: &str) -> Resource {
        Resource::new(
            "sg",
            ResourceSpec::AccessPolicy(AccessPolicy {
                network: "vpc".to_string(),
                description: "test".to_string(),
                ingress: vec![IngressRule::tcp(
                    22,
                    vec![SourceRange::Caller(SensitiveString::new(source))],
                )],
                egress: vec![EgressRule::allow_all()],
                tags: Tags::new(),
            }),
        )
    }

    #[test]
    fn test_name_tags_put_name_first() {
        let mut extra = Tags::new();
        extra.insert("Project".to_string(), "btc-tracker".to_string());
        extra.insert("Name".to_string(), "ignored".to_string());

        let tags = name_tags("btc-tracker-vpc", &extra);
        let keys: Vec<_> = tags.keys().cloned().collect();
        assert_eq!(keys, vec!["Name", "Project"]);
        assert_eq!(tags["Name"], "btc-tracker-vpc");
    }

    #[test]
    fn test_compute_instance_references() {
        let instance = ResourceSpec::ComputeInstance(ComputeInstance {
            instance_type: "t3.micro".to_string(),
            image: "ami".to_string(),
            subnet: "subnet".to_string(),
            access_policies: vec!["sg".to_string()],
            key: "key".to_string(),
            root_volume: RootVolume::default(),
            boot: crate::provision::BootPayload::new(),
            tags: Tags::new(),
        });

        let targets: Vec<_> = instance
            .references()
            .into_iter()
            .map(|r| (r.target, r.expected))
            .collect();
        assert_eq!(
            targets,
            vec![
                ("subnet", ResourceKind::Subnet),
                ("sg", ResourceKind::AccessPolicy),
                ("key", ResourceKind::KeyCredential),
                ("ami", ResourceKind::ImageReference),
            ]
        );
    }

    #[test]
    fn test_fingerprint_tracks_sensitive_values() {
        let a = policy("203.0.113.5/32");
        let b = policy("198.51.100.7/32");

        assert_eq!(a.fingerprint(), policy("203.0.113.5/32").fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_serialized_resource_hides_caller_address() {
        let json = serde_json::to_string(&policy("203.0.113.5/32")).unwrap();
        assert!(json.contains("\"kind\":\"access_policy\""));
        assert!(!json.contains("203.0.113.5"));
    }
}

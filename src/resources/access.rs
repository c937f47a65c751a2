//! Access policy (security group) declarations.
//!
//! Ingress is always restricted: a rule whose source admits every address is
//! rejected by [`AccessPolicy::check_restricted`]. Egress is permissive.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::Tags;
use crate::error::{Error, Result};
use crate::secrets::SensitiveString;

const ANY_IPV4: &str = "0.0.0.0/0";
const ANY_IPV6: &str = "::/0";

/// IP protocol of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    /// Every protocol (`-1` on the wire)
    All,
}

impl Protocol {
    /// Protocol identifier as providers expect it.
    pub fn as_wire(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::All => "-1",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Source range of an ingress rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRange {
    /// The caller's own address, held as a secret
    Caller(SensitiveString),
    /// A non-sensitive CIDR block
    Cidr(String),
}

impl SourceRange {
    /// The CIDR to hand to the provider.
    ///
    /// This is the only place a caller address leaves its wrapper.
    pub fn expose(&self) -> &str {
        match self {
            SourceRange::Caller(secret) => secret.expose(),
            SourceRange::Cidr(cidr) => cidr,
        }
    }

    /// Whether the range admits every address.
    pub fn is_unrestricted(&self) -> bool {
        let cidr = self.expose().trim();
        cidr == ANY_IPV4 || cidr == ANY_IPV6
    }
}

/// Ingress rule: protocol, port range and allowed sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub protocol: Protocol,
    pub from_port: u16,
    pub to_port: u16,
    pub sources: Vec<SourceRange>,
    pub description: Option<String>,
}

impl IngressRule {
    /// Single-port TCP rule.
    pub fn tcp(port: u16, sources: Vec<SourceRange>) -> Self {
        Self {
            protocol: Protocol::Tcp,
            from_port: port,
            to_port: port,
            sources,
            description: None,
        }
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Egress rule: protocol, port range and allowed destinations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressRule {
    pub protocol: Protocol,
    pub from_port: u16,
    pub to_port: u16,
    pub destinations: Vec<String>,
}

impl EgressRule {
    /// All outbound traffic.
    pub fn allow_all() -> Self {
        Self {
            protocol: Protocol::All,
            from_port: 0,
            to_port: 0,
            destinations: vec![ANY_IPV4.to_string()],
        }
    }
}

/// Security group scoped to one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    /// Logical name of the owning network
    pub network: String,
    /// Human description
    pub description: String,
    /// Ingress rules, in order
    pub ingress: Vec<IngressRule>,
    /// Egress rules, in order
    pub egress: Vec<EgressRule>,
    /// Resource tags
    pub tags: Tags,
}

impl AccessPolicy {
    /// Reject any ingress rule that admits every source.
    pub fn check_restricted(&self, name: &str) -> Result<()> {
        for rule in &self.ingress {
            if rule.sources.iter().any(SourceRange::is_unrestricted) {
                return Err(Error::UnrestrictedIngress {
                    policy: name.to_string(),
                    from_port: rule.from_port,
                    to_port: rule.to_port,
                });
            }
        }
        Ok(())
    }

    /// Ports opened for ingress, in rule order.
    pub fn ingress_ports(&self) -> Vec<(u16, u16)> {
        self.ingress.iter().map(|r| (r.from_port, r.to_port)).collect()
    }
}

//! Network resources: the virtual network, its gateway, subnet and routing.

use serde::{Deserialize, Serialize};

use super::Tags;

/// Destination of the default route.
pub const DEFAULT_ROUTE: &str = "0.0.0.0/0";

/// A virtual network (VPC).
///
/// The CIDR is passed to the provider as given; range validity is the
/// provider's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkBlock {
    /// IPv4 CIDR block of the network
    pub cidr_block: String,
    /// Enable DNS resolution inside the network
    pub enable_dns_support: bool,
    /// Assign DNS hostnames to instances
    pub enable_dns_hostnames: bool,
    /// Resource tags
    pub tags: Tags,
}

impl NetworkBlock {
    /// Network with DNS support and hostnames enabled.
    pub fn with_dns(cidr_block: impl Into<String>, tags: Tags) -> Self {
        Self {
            cidr_block: cidr_block.into(),
            enable_dns_support: true,
            enable_dns_hostnames: true,
            tags,
        }
    }
}

/// Internet gateway attached to one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gateway {
    /// Logical name of the network it attaches to
    pub network: String,
    /// Resource tags
    pub tags: Tags,
}

/// A subnet inside one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    /// Logical name of the owning network
    pub network: String,
    /// IPv4 CIDR block, expected to lie within the network's block
    pub cidr_block: String,
    /// Placement zone; the provider picks its first available zone when unset
    pub availability_zone: Option<String>,
    /// Give instances launched here a public address
    pub map_public_ip_on_launch: bool,
    /// Resource tags
    pub tags: Tags,
}

/// A single route: destination CIDR through a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    /// Destination CIDR
    pub destination: String,
    /// Logical name of the target gateway
    pub gateway: String,
}

impl RouteEntry {
    /// Default route through the given gateway.
    pub fn default_via(gateway: impl Into<String>) -> Self {
        Self {
            destination: DEFAULT_ROUTE.to_string(),
            gateway: gateway.into(),
        }
    }
}

/// Route table belonging to one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    /// Logical name of the owning network
    pub network: String,
    /// Routes, in declaration order
    pub routes: Vec<RouteEntry>,
    /// Resource tags
    pub tags: Tags,
}

/// Binds one subnet to one route table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteAssociation {
    /// Logical name of the subnet
    pub subnet: String,
    /// Logical name of the route table
    pub route_table: String,
}

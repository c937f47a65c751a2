//! Stack outputs.
//!
//! Three plain-text identifiers of the realized instance, emitted after a
//! successful pass for operators and downstream automation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::state::RealizedResource;

/// Provider attribute holding the instance's public address.
pub const ATTR_PUBLIC_IP: &str = "public_ip";

/// Provider attribute holding the instance's public DNS name.
pub const ATTR_PUBLIC_DNS: &str = "public_dns";

/// Named outputs of a realized stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackOutputs {
    /// Provider identifier of the compute instance
    pub instance_id: String,
    /// Public IPv4 address of the instance
    pub public_ip: String,
    /// Public DNS name of the instance
    pub public_dns: String,
}

impl StackOutputs {
    /// Read the outputs off a realized compute instance.
    pub fn from_instance(instance: &RealizedResource) -> Result<Self> {
        Ok(Self {
            instance_id: instance.id.clone(),
            public_ip: instance.attribute(ATTR_PUBLIC_IP)?.to_string(),
            public_dns: instance.attribute(ATTR_PUBLIC_DNS)?.to_string(),
        })
    }

    /// Outputs as ordered `(name, value)` pairs.
    pub fn entries(&self) -> [(&'static str, &str); 3] {
        [
            ("instance_id", self.instance_id.as_str()),
            ("public_ip", self.public_ip.as_str()),
            ("public_dns", self.public_dns.as_str()),
        ]
    }
}

impl fmt::Display for StackOutputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.entries() {
            writeln!(f, "{:<12} = {}", name, value)?;
        }
        Ok(())
    }
}

//! Provisioning state.
//!
//! The provisioning engine records every realized resource in a
//! [`StateStore`], a key-value store keyed by logical name. The stack
//! builder never touches it; it only declares resources. On the next pass
//! the engine reads the store back to decide whether a declaration is
//! already realized.
//!
//! ```text
//! ┌──────────────┐  plan   ┌──────────────┐  create   ┌──────────────┐
//! │ StackBuilder │ ──────▶ │    Engine    │ ────────▶ │   Provider   │
//! └──────────────┘         └──────────────┘           └──────────────┘
//!                                 │ put / get
//!                                 ▼
//!                          ┌──────────────┐
//!                          │  StateStore  │
//!                          │ (JSON/Memory)│
//!                          └──────────────┘
//! ```

pub mod dependencies;
pub mod persistence;

pub use dependencies::{ResourceDependency, ResourceGraph};
pub use persistence::{JsonStateStore, MemoryStateStore};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::outputs::StackOutputs;
use crate::resources::ResourceKind;

/// A resource as the provider reported it after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealizedResource {
    /// Logical name
    pub name: String,
    /// Resource kind
    pub kind: ResourceKind,
    /// Provider-assigned identifier
    pub id: String,
    /// Additional attributes reported by the provider (addresses, names)
    #[serde(default)]
    pub attributes: IndexMap<String, String>,
    /// Fingerprint of the declaration and resolved references it came from
    pub fingerprint: String,
    /// When the provider reported the resource realized
    pub realized_at: DateTime<Utc>,
}

impl RealizedResource {
    /// Get a named attribute, or fail naming it.
    pub fn attribute(&self, attribute: &str) -> Result<&str> {
        self.attributes
            .get(attribute)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::MissingAttribute {
                resource: self.name.clone(),
                attribute: attribute.to_string(),
            })
    }
}

/// Key-value store of realized resources, keyed by logical name.
pub trait StateStore: Send + Sync {
    /// Get a realized resource by logical name.
    fn get(&self, name: &str) -> Result<Option<RealizedResource>>;

    /// Record a realized resource, replacing any previous record.
    fn put(&self, resource: RealizedResource) -> Result<()>;

    /// All realized resources, in insertion order.
    fn list(&self) -> Result<Vec<RealizedResource>>;

    /// Record the outputs of the last successful pass.
    fn put_outputs(&self, outputs: &StackOutputs) -> Result<()>;

    /// Outputs of the last successful pass.
    fn get_outputs(&self) -> Result<Option<StackOutputs>>;
}

/// On-disk document shared by the store implementations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDocument {
    /// Format version
    pub version: u32,
    /// Realized resources by logical name
    #[serde(default)]
    pub resources: IndexMap<String, RealizedResource>,
    /// Outputs of the last successful pass
    #[serde(default)]
    pub outputs: Option<StackOutputs>,
}

impl StateDocument {
    /// Current format version.
    pub const VERSION: u32 = 1;

    /// Empty document at the current version.
    pub fn new() -> Self {
        Self {
            version: Self::VERSION,
            ..Default::default()
        }
    }
}

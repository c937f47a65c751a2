//! Provider abstraction.
//!
//! A provider turns a declared [`Resource`] into a realized one. It never
//! sees logical names of referenced resources on their own: the engine
//! hands it the realized form of every reference in the [`CreateRequest`].

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resources::{ImageFilter, Resource};
use crate::state::RealizedResource;

/// Error reported by a provider, message kept verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Throttling, eventual consistency and other retryable failures.
    #[error("{0}")]
    Transient(String),

    /// Anything retrying will not fix.
    #[error("{0}")]
    Permanent(String),
}

impl ProviderError {
    /// Retryable error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Non-retryable error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// Whether the engine may retry the call.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Provider message.
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Permanent(m) => m,
        }
    }

    /// Same error with its message rewritten, classification kept.
    pub fn redacted(self, redact: impl Fn(&str) -> String) -> Self {
        match self {
            Self::Transient(m) => Self::Transient(redact(&m)),
            Self::Permanent(m) => Self::Permanent(redact(&m)),
        }
    }
}

/// Result of resolving an image filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedImage {
    /// Image identifier (e.g. `ami-0abc...`)
    pub id: String,
    /// Image name as published
    pub name: String,
}

/// What a provider reports after creating a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Created {
    /// Provider-assigned identifier
    pub id: String,
    /// Additional attributes (addresses, zone, ...)
    pub attributes: IndexMap<String, String>,
}

impl Created {
    /// A created resource with no extra attributes.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: IndexMap::new(),
        }
    }

    /// Attach an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// A create call: the declaration plus its realized references.
#[derive(Debug, Clone)]
pub struct CreateRequest<'a> {
    /// Resource being created
    pub resource: &'a Resource,
    /// Realized form of every referenced resource, by logical name
    pub references: IndexMap<String, RealizedResource>,
}

impl<'a> CreateRequest<'a> {
    /// Provider identifier of a referenced resource.
    pub fn id_of(&self, name: &str) -> Result<&str, ProviderError> {
        self.references
            .get(name)
            .map(|r| r.id.as_str())
            .ok_or_else(|| {
                ProviderError::permanent(format!(
                    "'{}' references '{}', which is not realized",
                    self.resource.name, name
                ))
            })
    }
}

/// Cloud backend the engine drives.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Look up the image a filter selects.
    async fn resolve_image(&self, filter: &ImageFilter) -> Result<ResolvedImage, ProviderError>;

    /// Create one resource.
    async fn create(&self, request: &CreateRequest<'_>) -> Result<Created, ProviderError>;
}

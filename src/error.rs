//! Error types for Infrastack.
//!
//! Local errors (missing inputs, malformed declarations) are raised by the
//! stack builder before anything is created. Provider errors are carried
//! through verbatim from the provisioning engine; nothing here tries to
//! recover from them.

use thiserror::Error;

use crate::engine::ProviderError;

/// Result type alias for Infrastack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Infrastack.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Input Errors
    // ========================================================================
    /// A required configuration input was not supplied.
    #[error("Missing required configuration input '{0}'")]
    MissingInput(&'static str),

    /// A configuration input was supplied but is unusable.
    #[error("Invalid value for configuration input '{name}': {message}")]
    InvalidInput {
        /// Input name
        name: &'static str,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Declaration Errors
    // ========================================================================
    /// A resource referenced something not yet declared in this pass.
    #[error("Resource '{resource}' references '{target}', which has not been declared")]
    ForwardReference {
        /// Declaring resource
        resource: String,
        /// Missing reference target
        target: String,
    },

    /// A reference points at a resource of the wrong kind.
    #[error("Resource '{resource}' expects '{target}' to be a {expected}, found {found}")]
    ReferenceKind {
        /// Declaring resource
        resource: String,
        /// Reference target
        target: String,
        /// Expected resource kind
        expected: &'static str,
        /// Actual resource kind
        found: &'static str,
    },

    /// A logical name was declared twice.
    #[error("Resource '{0}' is already declared")]
    DuplicateResource(String),

    /// A subnet was associated with a second route table.
    #[error("Subnet '{subnet}' is already associated with route table '{route_table}'")]
    DuplicateAssociation {
        /// Subnet logical name
        subnet: String,
        /// Route table it is already bound to
        route_table: String,
    },

    /// An ingress rule admits every source address.
    #[error("Access policy '{policy}' has an unrestricted ingress rule on ports {from_port}-{to_port}")]
    UnrestrictedIngress {
        /// Access policy logical name
        policy: String,
        /// Start of port range
        from_port: u16,
        /// End of port range
        to_port: u16,
    },

    /// Two resources that must share a network do not.
    #[error("Resource '{resource}' is in network '{found}', expected '{expected}'")]
    NetworkMismatch {
        /// Resource in the wrong network
        resource: String,
        /// Network it should be in
        expected: String,
        /// Network it is in
        found: String,
    },

    /// A phase was entered out of order.
    #[error("Cannot enter phase {next} from phase {current}")]
    PhaseOrder {
        /// Current phase
        current: &'static str,
        /// Requested phase
        next: &'static str,
    },

    /// The resource graph contains a cycle.
    #[error("Dependency cycle detected: {0}")]
    DependencyCycle(String),

    // ========================================================================
    // Provisioning Errors
    // ========================================================================
    /// The provisioning engine failed to realize a resource.
    #[error("Provisioning '{resource}' failed: {source}")]
    Provision {
        /// Logical name of the resource
        resource: String,
        /// Provider error, verbatim
        #[source]
        source: ProviderError,
    },

    /// A realized resource is missing an attribute a dependent needs.
    #[error("Realized resource '{resource}' has no attribute '{attribute}'")]
    MissingAttribute {
        /// Logical name of the resource
        resource: String,
        /// Attribute name
        attribute: String,
    },

    /// The state store failed.
    #[error("State store error: {0}")]
    State(String),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error was raised before any resource was touched.
    pub fn is_local(&self) -> bool {
        !matches!(
            self,
            Error::Provision { .. } | Error::MissingAttribute { .. } | Error::State(_)
        )
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::MissingInput(_) | Error::InvalidInput { .. } => 2,
            Error::Provision { .. } | Error::MissingAttribute { .. } => 3,
            _ => 1,
        }
    }
}

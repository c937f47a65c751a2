//! # Infrastack - A Minimal Infrastructure-Stack Builder
//!
//! Infrastack declares, in dependency order, the resources of a
//! single-instance web application deployment and hands them to a
//! provisioning engine:
//!
//! - a virtual network with an internet gateway, a public subnet and a
//!   route table carrying the default route
//! - an access policy admitting only the caller's address
//! - the latest matching machine image and a registered key credential
//! - one compute instance with a structured boot payload
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           CLI Interface                             │
//! │                    (clap-based command parsing)                     │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           Stack Builder                             │
//! │       Network -> Access -> ComputeInputs -> Compute -> Outputs      │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │ StackPlan (petgraph DAG)
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        Provisioning Engine                          │
//! │        (waves run concurrently, transient errors retried)           │
//! └─────────────────────────────────────────────────────────────────────┘
//!          │                                               │
//!          ▼                                               ▼
//! ┌─────────────────────┐                     ┌─────────────────────────┐
//! │      Provider       │                     │       State Store       │
//! │ (AWS or simulated)  │                     │     (JSON or memory)    │
//! └─────────────────────┘                     └─────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust
//! use std::sync::Arc;
//! use infrastack::prelude::*;
//!
//! # tokio_test::block_on(async {
//! let inputs = StackInputs::new(
//!     "10.0.0.0/16",
//!     "10.0.1.0/24",
//!     SensitiveString::new("203.0.113.5/32"),
//!     "ssh-ed25519 AAAAC3Nz example",
//! );
//! let plan = StackBuilder::build(inputs)?;
//!
//! let engine = Engine::new(
//!     Arc::new(SimulatedProvider::new(plan.region())),
//!     Arc::new(MemoryStateStore::new()),
//! );
//! let report = engine.apply(&plan).await?;
//! println!("{}", report.outputs);
//! # Ok::<(), infrastack::Error>(())
//! # });
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::engine::{ApplyReport, Engine, Provider, ProviderError, SimulatedProvider};
    pub use crate::error::{Error, Result};
    pub use crate::outputs::StackOutputs;
    pub use crate::provision::{BootPayload, ProvisionStep, RepositoryUrl};
    pub use crate::resources::{Resource, ResourceKind, ResourceSpec};
    pub use crate::retry::RetryPolicy;
    pub use crate::secrets::SensitiveString;
    pub use crate::stack::{StackBuilder, StackInputs, StackPlan};
    pub use crate::state::{JsonStateStore, MemoryStateStore, ResourceGraph, StateStore};
}

// ============================================================================
// Core Types
// ============================================================================

/// Error types and the crate-wide `Result` alias.
pub mod error;

pub use error::{Error, Result};

/// Typed resource declarations.
pub mod resources;

/// Sensitive values and redaction.
pub mod secrets;

/// Boot-time provisioning payload.
pub mod provision;

// ============================================================================
// Building and Applying
// ============================================================================

/// Stack inputs, builder and plan.
pub mod stack;

/// Resource graph and state stores.
pub mod state;

/// Provisioning engine and providers.
pub mod engine;

/// Retry policy for transient provider errors.
pub mod retry;

/// Stack outputs.
pub mod outputs;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration management.
///
/// Handles loading and merging configuration from multiple sources:
/// environment variables, config files, and command-line arguments.
pub mod config;

// ============================================================================
// Version Information
// ============================================================================

/// Returns the current version of Infrastack.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

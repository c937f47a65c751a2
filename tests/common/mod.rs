//! Shared test utilities and fixtures for the Infrastack test suite.
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use infrastack::engine::{Engine, SimulatedProvider};
use infrastack::retry::RetryPolicy;
use infrastack::secrets::SensitiveString;
use infrastack::stack::{StackBuilder, StackInputs, StackPlan};
use infrastack::state::MemoryStateStore;

/// Caller address used by the reference scenario.
pub const CALLER: &str = "203.0.113.5/32";

/// Public key used by the reference scenario.
pub const PUBLIC_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHc5dHJhY2tlcg tester@example";

/// Inputs of the reference scenario.
pub fn scenario_inputs() -> StackInputs {
    StackInputs::new(
        "10.0.0.0/16",
        "10.0.1.0/24",
        SensitiveString::new(CALLER),
        PUBLIC_KEY,
    )
}

/// Plan of the reference scenario.
pub fn scenario_plan() -> StackPlan {
    StackBuilder::build(scenario_inputs()).expect("scenario inputs are complete")
}

/// Retry policy with millisecond delays so retry tests stay fast.
pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::constant(max_retries, Duration::from_millis(1))
}

/// Everything an engine test needs to inspect after a pass.
pub struct Harness {
    pub provider: Arc<SimulatedProvider>,
    pub state: Arc<MemoryStateStore>,
    pub engine: Engine,
}

impl Harness {
    /// Engine over a fresh simulated provider and in-memory state.
    pub fn new() -> Self {
        Self::with_provider(SimulatedProvider::new("us-east-1"))
    }

    /// Engine over the given provider and in-memory state.
    pub fn with_provider(provider: SimulatedProvider) -> Self {
        let provider = Arc::new(provider);
        let state = Arc::new(MemoryStateStore::new());
        let engine = Engine::new(provider.clone(), state.clone()).with_retry(fast_retry(3));
        Self {
            provider,
            state,
            engine,
        }
    }

    /// A second engine sharing this harness's provider and state.
    pub fn rerun(&self) -> Engine {
        Engine::new(self.provider.clone(), self.state.clone()).with_retry(fast_retry(3))
    }
}

//! Provisioning engine for Infrastack
//!
//! This module realizes a declared stack through a [`Provider`]:
//! - Walks the resource graph wave by wave
//! - Creates the resources of a wave concurrently
//! - Resolves each image filter at most once per pass
//! - Retries transient provider errors under a [`RetryPolicy`]
//! - Reuses resources whose declaration is unchanged since the last pass
//!
//! A permanent error, or a transient one that outlives its retries, aborts
//! the pass once the rest of its wave has settled. Resources realized before
//! the failure stay realized and stay recorded in the state store.
//!
//! Provider messages are passed through the plan's redaction registry
//! before they are wrapped in an [`Error`].

#[cfg(feature = "aws")]
pub mod aws;
pub mod provider;
pub mod simulated;

pub use provider::{CreateRequest, Created, Provider, ProviderError, ResolvedImage};
pub use simulated::{CatalogImage, SimulatedProvider};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use indexmap::IndexMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::outputs::StackOutputs;
use crate::resources::{hex_digest, ImageFilter, Resource, ResourceSpec};
use crate::retry::RetryPolicy;
use crate::stack::StackPlan;
use crate::state::{RealizedResource, StateStore};

/// What happened to a resource during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Created,
    Reused,
    Resolved,
}

/// Summary of a completed pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    /// Stack outputs
    pub outputs: StackOutputs,
    /// Logical names created during the pass, in completion order
    pub created: Vec<String>,
    /// Logical names reused from state
    pub reused: Vec<String>,
    /// Data sources looked up
    pub resolved: Vec<String>,
}

impl ApplyReport {
    /// Whether the pass created anything.
    pub fn changed(&self) -> bool {
        !self.created.is_empty()
    }
}

/// Image resolutions already made in the current pass, keyed by filter.
type ImageMemo = Mutex<HashMap<String, ResolvedImage>>;

/// The provisioning engine.
pub struct Engine {
    provider: Arc<dyn Provider>,
    state: Arc<dyn StateStore>,
    retry: RetryPolicy,
}

impl Engine {
    /// Create an engine with the default retry policy.
    pub fn new(provider: Arc<dyn Provider>, state: Arc<dyn StateStore>) -> Self {
        Self {
            provider,
            state,
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The state store the engine writes to.
    pub fn state(&self) -> &Arc<dyn StateStore> {
        &self.state
    }

    /// Realize a plan and record its outputs.
    #[instrument(skip(self, plan), fields(stack = %plan.name(), provider = %self.provider.name()))]
    pub async fn apply(&self, plan: &StackPlan) -> Result<ApplyReport> {
        let waves = plan.graph().waves()?;
        info!(
            "Applying {} resources in {} waves",
            plan.graph().node_count(),
            waves.len()
        );

        let images: ImageMemo = Mutex::new(HashMap::new());
        let mut realized: IndexMap<String, RealizedResource> = IndexMap::new();
        let mut created = Vec::new();
        let mut reused = Vec::new();
        let mut resolved = Vec::new();

        for (index, wave) in waves.iter().enumerate() {
            debug!("Wave {}: {} resources", index + 1, wave.len());

            // Every call of the wave runs to completion, so whatever the
            // provider created is in the state store before a failure aborts.
            let pending = wave
                .iter()
                .map(|resource| self.realize(plan, resource, &realized, &images));
            let mut failure = None;

            for outcome in join_all(pending).await {
                let (record, disposition) = match outcome {
                    Ok(done) => done,
                    Err(e) => {
                        if failure.is_none() {
                            failure = Some(e);
                        }
                        continue;
                    }
                };
                match disposition {
                    Disposition::Created => created.push(record.name.clone()),
                    Disposition::Reused => reused.push(record.name.clone()),
                    Disposition::Resolved => resolved.push(record.name.clone()),
                }
                realized.insert(record.name.clone(), record);
            }

            if let Some(e) = failure {
                warn!(
                    "Wave {} failed; {} resources realized so far",
                    index + 1,
                    realized.len()
                );
                return Err(e);
            }
        }

        let instance = realized.get(plan.instance_name()).ok_or_else(|| {
            Error::State(format!(
                "compute instance '{}' was not realized",
                plan.instance_name()
            ))
        })?;
        let outputs = StackOutputs::from_instance(instance)?;
        self.state.put_outputs(&outputs)?;

        info!(
            "Stack applied: {} created, {} unchanged",
            created.len(),
            reused.len()
        );

        Ok(ApplyReport {
            outputs,
            created,
            reused,
            resolved,
        })
    }

    async fn realize(
        &self,
        plan: &StackPlan,
        resource: &Resource,
        realized: &IndexMap<String, RealizedResource>,
        images: &ImageMemo,
    ) -> Result<(RealizedResource, Disposition)> {
        let mut references = IndexMap::new();
        for reference in resource.spec.references() {
            let dependency = realized.get(reference.target).ok_or_else(|| {
                Error::State(format!(
                    "'{}' was not realized before '{}'",
                    reference.target, resource.name
                ))
            })?;
            references.insert(reference.target.to_string(), dependency.clone());
        }
        let fingerprint = effective_fingerprint(plan.region(), resource, &references);

        if let ResourceSpec::ImageReference(image) = &resource.spec {
            let resolved = self
                .resolve_image(plan, &resource.name, &image.filter, images)
                .await?;
            let mut attributes = IndexMap::new();
            attributes.insert("name".to_string(), resolved.name);
            let record = RealizedResource {
                name: resource.name.clone(),
                kind: resource.kind(),
                id: resolved.id,
                attributes,
                fingerprint,
                realized_at: Utc::now(),
            };
            self.state.put(record.clone())?;
            return Ok((record, Disposition::Resolved));
        }

        if let Some(previous) = self.state.get(&resource.name)? {
            if previous.kind == resource.kind() && previous.fingerprint == fingerprint {
                debug!("{} unchanged ({})", resource.name, previous.id);
                return Ok((previous, Disposition::Reused));
            }
            warn!(
                "{} changed since {} was realized; creating a replacement",
                resource.name, previous.id
            );
        }

        let request = CreateRequest {
            resource,
            references,
        };
        let created = self
            .retry
            .execute_if(|| self.provider.create(&request), ProviderError::is_transient)
            .await
            .map_err(|e| Error::Provision {
                resource: resource.name.clone(),
                source: e.into_inner().redacted(|m| plan.redact(m)),
            })?;

        let record = RealizedResource {
            name: resource.name.clone(),
            kind: resource.kind(),
            id: created.id,
            attributes: created.attributes,
            fingerprint,
            realized_at: Utc::now(),
        };
        self.state.put(record.clone())?;
        info!("Created {} {} ({})", resource.kind(), resource.name, record.id);

        Ok((record, Disposition::Created))
    }

    async fn resolve_image(
        &self,
        plan: &StackPlan,
        name: &str,
        filter: &ImageFilter,
        images: &ImageMemo,
    ) -> Result<ResolvedImage> {
        let key = filter.cache_key();
        // Held across the lookup so concurrent references share one call.
        let mut memo = images.lock().await;
        if let Some(hit) = memo.get(&key) {
            debug!("{} resolved from this pass: {}", name, hit.id);
            return Ok(hit.clone());
        }

        let resolved = self
            .retry
            .execute_if(
                || self.provider.resolve_image(filter),
                ProviderError::is_transient,
            )
            .await
            .map_err(|e| Error::Provision {
                resource: name.to_string(),
                source: e.into_inner().redacted(|m| plan.redact(m)),
            })?;

        debug!("{} resolved to {} ({})", name, resolved.id, resolved.name);
        memo.insert(key, resolved.clone());
        Ok(resolved)
    }
}

/// Declaration fingerprint extended with the region and the identifiers it
/// resolves to.
///
/// A dependency that was replaced gets a new identifier, which in turn
/// changes the fingerprint of every resource referring to it. Records made
/// in another region never match.
fn effective_fingerprint(
    region: &str,
    resource: &Resource,
    references: &IndexMap<String, RealizedResource>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(region.as_bytes());
    hasher.update([0u8]);
    hasher.update(resource.fingerprint().as_bytes());
    for (name, dependency) in references {
        hasher.update([0u8]);
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(dependency.id.as_bytes());
    }
    hex_digest(&hasher.finalize())
}

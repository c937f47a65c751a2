//! In-process provider.
//!
//! Identifiers are derived from the region and logical name, so the same
//! stack always realizes to the same identifiers. Used by tests and by
//! `infrastack apply --simulate`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::provider::{CreateRequest, Created, Provider, ProviderError, ResolvedImage};
use crate::outputs::{ATTR_PUBLIC_DNS, ATTR_PUBLIC_IP};
use crate::resources::{hex_digest, ImageFilter, ResourceSpec};

/// An image published in the simulated catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogImage {
    pub id: String,
    pub name: String,
    pub owner: String,
    /// ISO-8601 creation date; compares lexically
    pub creation_date: String,
}

impl CatalogImage {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        owner: impl Into<String>,
        creation_date: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            owner: owner.into(),
            creation_date: creation_date.into(),
        }
    }
}

fn default_catalog() -> Vec<CatalogImage> {
    vec![
        CatalogImage::new(
            "ami-0a1b2c3d4e5f60001",
            "al2023-ami-2023.5.20240916.0-kernel-6.1-x86_64",
            "amazon",
            "2024-09-16T21:10:00.000Z",
        ),
        CatalogImage::new(
            "ami-0a1b2c3d4e5f60002",
            "al2023-ami-2023.6.20241010.0-kernel-6.1-x86_64",
            "amazon",
            "2024-10-10T18:02:00.000Z",
        ),
        CatalogImage::new(
            "ami-0a1b2c3d4e5f60003",
            "al2023-ami-2023.6.20241010.0-kernel-6.1-arm64",
            "amazon",
            "2024-10-10T18:03:00.000Z",
        ),
        CatalogImage::new(
            "ami-0a1b2c3d4e5f60004",
            "amzn2-ami-hvm-2.0.20241001.0-x86_64-gp2",
            "amazon",
            "2024-10-01T09:00:00.000Z",
        ),
    ]
}

/// Deterministic provider backed by an in-memory catalog.
pub struct SimulatedProvider {
    region: String,
    catalog: Vec<CatalogImage>,
    latency: Option<Duration>,
    slow: HashMap<String, Duration>,
    failures: Mutex<HashMap<String, VecDeque<ProviderError>>>,
    calls: Mutex<Vec<String>>,
    ingress: Mutex<HashMap<String, Vec<String>>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl SimulatedProvider {
    /// Provider for a region with the default image catalog.
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            catalog: default_catalog(),
            latency: None,
            slow: HashMap::new(),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            ingress: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Replace the image catalog.
    pub fn with_catalog(mut self, catalog: Vec<CatalogImage>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Sleep this long inside every create call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Sleep this long inside create calls for `name` only.
    pub fn with_latency_for(mut self, name: &str, latency: Duration) -> Self {
        self.slow.insert(name.to_string(), latency);
        self
    }

    /// Make the next create call for `name` fail with `error`.
    ///
    /// Queued failures are consumed in order, one per call.
    pub fn fail_next(&self, name: &str, error: ProviderError) {
        self.failures
            .lock()
            .entry(name.to_string())
            .or_default()
            .push_back(error);
    }

    /// Calls made so far: `create:<name>` and `resolve:<pattern>`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of create calls made for `name`.
    pub fn create_count(&self, name: &str) -> usize {
        let key = format!("create:{}", name);
        self.calls.lock().iter().filter(|c| **c == key).count()
    }

    /// Number of image resolutions made.
    pub fn resolve_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with("resolve:"))
            .count()
    }

    /// Ingress source ranges applied to an access policy.
    pub fn ingress_sources(&self, policy: &str) -> Vec<String> {
        self.ingress.lock().get(policy).cloned().unwrap_or_default()
    }

    /// Highest number of create calls observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn digest(&self, name: &str) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(self.region.as_bytes());
        hasher.update([0u8]);
        hasher.update(name.as_bytes());
        hasher.finalize().to_vec()
    }

    fn id_for(&self, prefix: &str, name: &str) -> String {
        let hex = hex_digest(&self.digest(name));
        format!("{}-{}", prefix, &hex[..17])
    }

    fn public_address(&self, name: &str) -> (String, String) {
        let d = self.digest(name);
        let ip = format!("54.{}.{}.{}", d[0], d[1], d[2].max(1));
        let dashed = ip.replace('.', "-");
        let dns = if self.region == "us-east-1" {
            format!("ec2-{}.compute-1.amazonaws.com", dashed)
        } else {
            format!("ec2-{}.{}.compute.amazonaws.com", dashed, self.region)
        };
        (ip, dns)
    }

    fn realize(&self, request: &CreateRequest<'_>) -> Result<Created, ProviderError> {
        let name = request.resource.name.as_str();

        let created = match &request.resource.spec {
            ResourceSpec::NetworkBlock(vpc) => Created::new(self.id_for("vpc", name))
                .with_attribute("cidr_block", &vpc.cidr_block)
                .with_attribute("enable_dns_hostnames", vpc.enable_dns_hostnames.to_string()),
            ResourceSpec::Gateway(gw) => Created::new(self.id_for("igw", name))
                .with_attribute("vpc_id", request.id_of(&gw.network)?),
            ResourceSpec::Subnet(subnet) => {
                let zone = subnet
                    .availability_zone
                    .clone()
                    .unwrap_or_else(|| format!("{}a", self.region));
                Created::new(self.id_for("subnet", name))
                    .with_attribute("vpc_id", request.id_of(&subnet.network)?)
                    .with_attribute("cidr_block", &subnet.cidr_block)
                    .with_attribute("availability_zone", zone)
                    .with_attribute(
                        "map_public_ip_on_launch",
                        subnet.map_public_ip_on_launch.to_string(),
                    )
            }
            ResourceSpec::RouteTable(rt) => {
                let mut created = Created::new(self.id_for("rtb", name))
                    .with_attribute("vpc_id", request.id_of(&rt.network)?);
                for route in &rt.routes {
                    created = created.with_attribute(
                        format!("route:{}", route.destination),
                        request.id_of(&route.gateway)?,
                    );
                }
                created
            }
            ResourceSpec::RouteAssociation(assoc) => Created::new(self.id_for("rtbassoc", name))
                .with_attribute("subnet_id", request.id_of(&assoc.subnet)?)
                .with_attribute("route_table_id", request.id_of(&assoc.route_table)?),
            ResourceSpec::AccessPolicy(policy) => {
                let sources: Vec<String> = policy
                    .ingress
                    .iter()
                    .flat_map(|rule| rule.sources.iter().map(|s| s.expose().to_string()))
                    .collect();
                self.ingress.lock().insert(name.to_string(), sources);
                Created::new(self.id_for("sg", name))
                    .with_attribute("vpc_id", request.id_of(&policy.network)?)
                    .with_attribute("ingress_rules", policy.ingress.len().to_string())
            }
            ResourceSpec::KeyCredential(key) => {
                let fingerprint = hex_digest(&Sha256::digest(key.public_key.as_bytes()));
                Created::new(self.id_for("key", name))
                    .with_attribute("key_name", &key.key_name)
                    .with_attribute("key_fingerprint", fingerprint)
            }
            ResourceSpec::ComputeInstance(instance) => {
                let subnet = request.references.get(&instance.subnet).ok_or_else(|| {
                    ProviderError::permanent(format!(
                        "InvalidSubnetID.NotFound: '{}' is not realized",
                        instance.subnet
                    ))
                })?;
                let mut created = Created::new(self.id_for("i", name))
                    .with_attribute("image_id", request.id_of(&instance.image)?)
                    .with_attribute("subnet_id", subnet.id.as_str())
                    .with_attribute("instance_type", &instance.instance_type);
                if subnet.attributes.get("map_public_ip_on_launch").map(String::as_str)
                    == Some("true")
                {
                    let (ip, dns) = self.public_address(name);
                    created = created
                        .with_attribute(ATTR_PUBLIC_IP, ip)
                        .with_attribute(ATTR_PUBLIC_DNS, dns);
                }
                created
            }
            ResourceSpec::ImageReference(_) => {
                return Err(ProviderError::permanent(format!(
                    "'{}' is a data source and cannot be created",
                    name
                )))
            }
        };

        Ok(created)
    }
}

#[async_trait]
impl Provider for SimulatedProvider {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn resolve_image(&self, filter: &ImageFilter) -> Result<ResolvedImage, ProviderError> {
        self.calls
            .lock()
            .push(format!("resolve:{}", filter.name_pattern));

        let mut matches: Vec<&CatalogImage> = self
            .catalog
            .iter()
            .filter(|image| filter.accepts_owner(&image.owner) && filter.matches_name(&image.name))
            .collect();

        if matches.is_empty() {
            return Err(ProviderError::permanent(format!(
                "Your query returned no results for name pattern '{}'",
                filter.name_pattern
            )));
        }
        if matches.len() > 1 && !filter.most_recent {
            return Err(ProviderError::permanent(format!(
                "Your query returned more than one result ({}); set most_recent to pick one",
                matches.len()
            )));
        }

        matches.sort_by(|a, b| a.creation_date.cmp(&b.creation_date));
        let image = matches[matches.len() - 1];
        debug!("Resolved image {} ({})", image.id, image.name);

        Ok(ResolvedImage {
            id: image.id.clone(),
            name: image.name.clone(),
        })
    }

    async fn create(&self, request: &CreateRequest<'_>) -> Result<Created, ProviderError> {
        let name = request.resource.name.as_str();
        self.calls.lock().push(format!("create:{}", name));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(latency) = self.slow.get(name).copied().or(self.latency) {
            tokio::time::sleep(latency).await;
        }

        let injected = self
            .failures
            .lock()
            .get_mut(name)
            .and_then(VecDeque::pop_front);
        let result = match injected {
            Some(error) => Err(error),
            None => self.realize(request),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

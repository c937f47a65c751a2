//! AWS provider backed by `aws-sdk-ec2`.
//!
//! Credentials come from the standard AWS provider chain (environment,
//! profile, instance metadata).
//!
//! A create is one primary call (CreateVpc, CreateSecurityGroup,
//! RunInstances, ...) followed by calls against the new id. Only a failed
//! primary call is reported as transient to the engine; once an id exists,
//! follow-up calls are retried here and a failure that outlives those
//! retries is permanent and names the id, so the engine never creates the
//! same resource twice.

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_ec2::primitives::Blob;
use aws_sdk_ec2::types::{
    AttributeBooleanValue, BlockDeviceMapping, EbsBlockDevice, Filter, InstanceStateName,
    InstanceType, IpPermission, IpRange, ResourceType, Tag, TagSpecification, VolumeType,
};
use aws_sdk_ec2::Client;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::provider::{CreateRequest, Created, Provider, ProviderError, ResolvedImage};
use crate::outputs::{ATTR_PUBLIC_DNS, ATTR_PUBLIC_IP};
use crate::resources::{
    hex_digest, AccessPolicy, ComputeInstance, EgressRule, ImageFilter, KeyCredential, NetworkBlock,
    Protocol, ResourceSpec, RouteTable, Subnet, Tags,
};
use crate::retry::RetryPolicy;

/// Error codes EC2 returns for conditions that clear up on their own.
const TRANSIENT_CODES: &[&str] = &[
    "RequestLimitExceeded",
    "Throttling",
    "ThrottlingException",
    "InternalError",
    "ServiceUnavailable",
    "Unavailable",
    "InsufficientInstanceCapacity",
    "InvalidVpcID.NotFound",
    "InvalidSubnetID.NotFound",
    "InvalidGroup.NotFound",
    "InvalidInternetGatewayID.NotFound",
    "InvalidRouteTableID.NotFound",
    "InvalidKeyPair.NotFound",
];

/// Returned by DescribeInstances until a fresh launch becomes visible.
const INSTANCE_NOT_FOUND: &str = "InvalidInstanceID.NotFound";

const ROOT_DEVICE: &str = "/dev/xvda";

fn transient_code(code: Option<&str>) -> bool {
    code.is_some_and(|code| TRANSIENT_CODES.contains(&code))
}

/// Whether a DescribeInstances failure just means "ask again".
fn instance_pending(code: Option<&str>) -> bool {
    code == Some(INSTANCE_NOT_FOUND) || transient_code(code)
}

fn is_transient<E, R>(err: &SdkError<E, R>) -> bool
where
    E: ProvideErrorMetadata,
{
    matches!(
        err,
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_)
    ) || transient_code(err.code())
}

fn classify<E, R>(action: &str, err: SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let transient = is_transient(&err);
    let message = format!("{}: {}", action, DisplayErrorContext(&err));

    if transient {
        ProviderError::transient(message)
    } else {
        ProviderError::permanent(message)
    }
}

/// A failure after `id` was created. Never retried by the engine.
fn after_create(id: &str, err: ProviderError) -> ProviderError {
    ProviderError::permanent(format!(
        "{} was created but could not be completed: {}",
        id,
        err.message()
    ))
}

/// RunInstances idempotency token: stable for one declaration within one
/// session, at most 64 ASCII characters.
fn client_token(session: &str, fingerprint: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session.as_bytes());
    hasher.update([0u8]);
    hasher.update(fingerprint.as_bytes());
    hex_digest(&hasher.finalize())
}

fn missing(field: &str) -> ProviderError {
    ProviderError::permanent(format!("EC2 response did not include {}", field))
}

fn tag_spec(resource_type: ResourceType, tags: &Tags) -> TagSpecification {
    TagSpecification::builder()
        .resource_type(resource_type)
        .set_tags(Some(
            tags.iter()
                .map(|(key, value)| Tag::builder().key(key).value(value).build())
                .collect(),
        ))
        .build()
}

fn enabled(value: bool) -> AttributeBooleanValue {
    AttributeBooleanValue::builder().value(value).build()
}

/// Provider that talks to EC2 in one region.
pub struct AwsProvider {
    client: Client,
    region: String,
    session: String,
    follow_up: RetryPolicy,
    wait_timeout: Duration,
    poll_interval: Duration,
}

impl AwsProvider {
    /// Build a client for `region` from the default credential chain.
    pub async fn connect(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_ec2::config::Region::new(region.to_string()))
            .load()
            .await;

        Self {
            client: Client::new(&config),
            region: region.to_string(),
            session: format!("{:016x}", rand::random::<u64>()),
            follow_up: RetryPolicy::exponential(
                6,
                Duration::from_millis(500),
                Duration::from_secs(15),
            ),
            wait_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
        }
    }

    /// How long to wait for the instance to reach `running`.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Retry policy for calls made against a resource that already exists.
    pub fn with_follow_up_retry(mut self, retry: RetryPolicy) -> Self {
        self.follow_up = retry;
        self
    }

    /// Run a call against the freshly created `id`, retrying transient
    /// failures here rather than in the engine.
    async fn follow_up<F, Fut, T>(&self, id: &str, call: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.follow_up
            .execute_if(call, ProviderError::is_transient)
            .await
            .map_err(|e| after_create(id, e.into_inner()))
    }

    async fn create_network(&self, vpc: &NetworkBlock) -> Result<Created, ProviderError> {
        let resp = self
            .client
            .create_vpc()
            .cidr_block(&vpc.cidr_block)
            .tag_specifications(tag_spec(ResourceType::Vpc, &vpc.tags))
            .send()
            .await
            .map_err(|e| classify("CreateVpc", e))?;
        let vpc_id = resp
            .vpc()
            .and_then(|v| v.vpc_id())
            .ok_or_else(|| missing("a VPC id"))?
            .to_string();

        // EC2 accepts one attribute per ModifyVpcAttribute call.
        let id = vpc_id.as_str();
        self.follow_up(id, || async move {
            self.client
                .modify_vpc_attribute()
                .vpc_id(id)
                .enable_dns_support(enabled(vpc.enable_dns_support))
                .send()
                .await
                .map_err(|e| classify("ModifyVpcAttribute", e))
        })
        .await?;
        self.follow_up(id, || async move {
            self.client
                .modify_vpc_attribute()
                .vpc_id(id)
                .enable_dns_hostnames(enabled(vpc.enable_dns_hostnames))
                .send()
                .await
                .map_err(|e| classify("ModifyVpcAttribute", e))
        })
        .await?;

        Ok(Created::new(vpc_id).with_attribute("cidr_block", &vpc.cidr_block))
    }

    async fn create_gateway(&self, vpc_id: &str, tags: &Tags) -> Result<Created, ProviderError> {
        let resp = self
            .client
            .create_internet_gateway()
            .tag_specifications(tag_spec(ResourceType::InternetGateway, tags))
            .send()
            .await
            .map_err(|e| classify("CreateInternetGateway", e))?;
        let igw_id = resp
            .internet_gateway()
            .and_then(|g| g.internet_gateway_id())
            .ok_or_else(|| missing("an internet gateway id"))?
            .to_string();

        let id = igw_id.as_str();
        self.follow_up(id, || async move {
            self.client
                .attach_internet_gateway()
                .internet_gateway_id(id)
                .vpc_id(vpc_id)
                .send()
                .await
                .map_err(|e| classify("AttachInternetGateway", e))
        })
        .await?;

        Ok(Created::new(igw_id).with_attribute("vpc_id", vpc_id))
    }

    async fn create_subnet(&self, vpc_id: &str, subnet: &Subnet) -> Result<Created, ProviderError> {
        let resp = self
            .client
            .create_subnet()
            .vpc_id(vpc_id)
            .cidr_block(&subnet.cidr_block)
            .set_availability_zone(subnet.availability_zone.clone())
            .tag_specifications(tag_spec(ResourceType::Subnet, &subnet.tags))
            .send()
            .await
            .map_err(|e| classify("CreateSubnet", e))?;
        let created = resp.subnet().ok_or_else(|| missing("a subnet"))?;
        let subnet_id = created
            .subnet_id()
            .ok_or_else(|| missing("a subnet id"))?
            .to_string();
        let zone = created.availability_zone().unwrap_or_default().to_string();

        if subnet.map_public_ip_on_launch {
            let id = subnet_id.as_str();
            self.follow_up(id, || async move {
                self.client
                    .modify_subnet_attribute()
                    .subnet_id(id)
                    .map_public_ip_on_launch(enabled(true))
                    .send()
                    .await
                    .map_err(|e| classify("ModifySubnetAttribute", e))
            })
            .await?;
        }

        Ok(Created::new(subnet_id)
            .with_attribute("vpc_id", vpc_id)
            .with_attribute("cidr_block", &subnet.cidr_block)
            .with_attribute("availability_zone", zone)
            .with_attribute(
                "map_public_ip_on_launch",
                subnet.map_public_ip_on_launch.to_string(),
            ))
    }

    async fn create_route_table(
        &self,
        request: &CreateRequest<'_>,
        rt: &RouteTable,
    ) -> Result<Created, ProviderError> {
        let vpc_id = request.id_of(&rt.network)?;
        let resp = self
            .client
            .create_route_table()
            .vpc_id(vpc_id)
            .tag_specifications(tag_spec(ResourceType::RouteTable, &rt.tags))
            .send()
            .await
            .map_err(|e| classify("CreateRouteTable", e))?;
        let rtb_id = resp
            .route_table()
            .and_then(|r| r.route_table_id())
            .ok_or_else(|| missing("a route table id"))?
            .to_string();

        let mut created = Created::new(rtb_id.clone()).with_attribute("vpc_id", vpc_id);
        for route in &rt.routes {
            let gateway_id = request
                .id_of(&route.gateway)
                .map_err(|e| after_create(&rtb_id, e))?;
            let id = rtb_id.as_str();
            self.follow_up(id, || async move {
                self.client
                    .create_route()
                    .route_table_id(id)
                    .destination_cidr_block(&route.destination)
                    .gateway_id(gateway_id)
                    .send()
                    .await
                    .map_err(|e| classify("CreateRoute", e))
            })
            .await?;
            created = created.with_attribute(format!("route:{}", route.destination), gateway_id);
        }

        Ok(created)
    }

    async fn create_access_policy(
        &self,
        name: &str,
        vpc_id: &str,
        policy: &AccessPolicy,
    ) -> Result<Created, ProviderError> {
        let resp = self
            .client
            .create_security_group()
            .group_name(name)
            .description(&policy.description)
            .vpc_id(vpc_id)
            .tag_specifications(tag_spec(ResourceType::SecurityGroup, &policy.tags))
            .send()
            .await
            .map_err(|e| classify("CreateSecurityGroup", e))?;
        let group_id = resp
            .group_id()
            .ok_or_else(|| missing("a security group id"))?
            .to_string();

        let ingress: Vec<IpPermission> = policy
            .ingress
            .iter()
            .map(|rule| {
                let mut builder = port_range(
                    IpPermission::builder().ip_protocol(rule.protocol.as_wire()),
                    rule.protocol,
                    rule.from_port,
                    rule.to_port,
                );
                for source in &rule.sources {
                    builder = builder.ip_ranges(
                        IpRange::builder()
                            .cidr_ip(source.expose())
                            .set_description(rule.description.clone())
                            .build(),
                    );
                }
                builder.build()
            })
            .collect();

        let id = group_id.as_str();
        if !ingress.is_empty() {
            let ingress = &ingress;
            self.follow_up(id, || async move {
                self.client
                    .authorize_security_group_ingress()
                    .group_id(id)
                    .set_ip_permissions(Some(ingress.clone()))
                    .send()
                    .await
                    .map_err(|e| classify("AuthorizeSecurityGroupIngress", e))
            })
            .await?;
        }

        // New groups already carry the allow-all egress rule.
        let default_egress = EgressRule::allow_all();
        let egress: Vec<IpPermission> = policy
            .egress
            .iter()
            .filter(|rule| **rule != default_egress)
            .map(|rule| {
                let mut builder = port_range(
                    IpPermission::builder().ip_protocol(rule.protocol.as_wire()),
                    rule.protocol,
                    rule.from_port,
                    rule.to_port,
                );
                for destination in &rule.destinations {
                    builder = builder.ip_ranges(IpRange::builder().cidr_ip(destination).build());
                }
                builder.build()
            })
            .collect();

        if !egress.is_empty() {
            let egress = &egress;
            self.follow_up(id, || async move {
                self.client
                    .authorize_security_group_egress()
                    .group_id(id)
                    .set_ip_permissions(Some(egress.clone()))
                    .send()
                    .await
                    .map_err(|e| classify("AuthorizeSecurityGroupEgress", e))
            })
            .await?;
        }

        Ok(Created::new(group_id)
            .with_attribute("vpc_id", vpc_id)
            .with_attribute("ingress_rules", policy.ingress.len().to_string()))
    }

    async fn import_key(&self, key: &KeyCredential) -> Result<Created, ProviderError> {
        let resp = self
            .client
            .import_key_pair()
            .key_name(&key.key_name)
            .public_key_material(Blob::new(key.public_key.trim().as_bytes()))
            .tag_specifications(tag_spec(ResourceType::KeyPair, &key.tags))
            .send()
            .await
            .map_err(|e| classify("ImportKeyPair", e))?;
        let key_id = resp
            .key_pair_id()
            .ok_or_else(|| missing("a key pair id"))?
            .to_string();

        Ok(Created::new(key_id)
            .with_attribute("key_name", &key.key_name)
            .with_attribute("key_fingerprint", resp.key_fingerprint().unwrap_or_default()))
    }

    async fn run_instance(
        &self,
        request: &CreateRequest<'_>,
        instance: &ComputeInstance,
    ) -> Result<Created, ProviderError> {
        let key_name = request
            .references
            .get(&instance.key)
            .and_then(|k| k.attributes.get("key_name"))
            .ok_or_else(|| missing("the key pair name"))?;
        let user_data = base64::engine::general_purpose::STANDARD.encode(instance.boot.render());
        let image_id = request.id_of(&instance.image)?;

        let mut run = self
            .client
            .run_instances()
            .client_token(client_token(&self.session, &request.resource.fingerprint()))
            .image_id(image_id)
            .instance_type(InstanceType::from(instance.instance_type.as_str()))
            .min_count(1)
            .max_count(1)
            .key_name(key_name)
            .subnet_id(request.id_of(&instance.subnet)?)
            .user_data(user_data)
            .block_device_mappings(
                BlockDeviceMapping::builder()
                    .device_name(ROOT_DEVICE)
                    .ebs(
                        EbsBlockDevice::builder()
                            .volume_size(instance.root_volume.size_gib as i32)
                            .volume_type(VolumeType::from(instance.root_volume.volume_type.as_str()))
                            .delete_on_termination(true)
                            .build(),
                    )
                    .build(),
            )
            .tag_specifications(tag_spec(ResourceType::Instance, &instance.tags));
        for policy in &instance.access_policies {
            run = run.security_group_ids(request.id_of(policy)?);
        }

        let resp = run
            .send()
            .await
            .map_err(|e| classify("RunInstances", e))?;
        let instance_id = resp
            .instances()
            .first()
            .and_then(|i| i.instance_id())
            .ok_or_else(|| missing("an instance id"))?
            .to_string();

        info!("Launched {}; waiting for it to enter running", instance_id);
        let (public_ip, public_dns) = self
            .wait_until_running(&instance_id)
            .await
            .map_err(|e| after_create(&instance_id, e))?;

        let mut created = Created::new(instance_id)
            .with_attribute("image_id", image_id)
            .with_attribute("instance_type", &instance.instance_type);
        if let Some(ip) = public_ip {
            created = created.with_attribute(ATTR_PUBLIC_IP, ip);
        }
        if let Some(dns) = public_dns {
            created = created.with_attribute(ATTR_PUBLIC_DNS, dns);
        }
        Ok(created)
    }

    async fn wait_until_running(
        &self,
        instance_id: &str,
    ) -> Result<(Option<String>, Option<String>), ProviderError> {
        let start = Instant::now();

        loop {
            let resp = match self
                .client
                .describe_instances()
                .instance_ids(instance_id)
                .send()
                .await
            {
                Ok(resp) => Some(resp),
                Err(e) if instance_pending(e.code()) || is_transient(&e) => {
                    warn!("{} not visible yet: {}", instance_id, DisplayErrorContext(&e));
                    None
                }
                Err(e) => return Err(classify("DescribeInstances", e)),
            };

            let described = resp.as_ref().and_then(|resp| {
                resp.reservations()
                    .iter()
                    .flat_map(|r| r.instances())
                    .find(|i| i.instance_id() == Some(instance_id))
            });

            if let Some(described) = described {
                let state = described.state().and_then(|s| s.name());
                if state == Some(&InstanceStateName::Running) {
                    return Ok((
                        described.public_ip_address().map(str::to_string),
                        described
                            .public_dns_name()
                            .filter(|d| !d.is_empty())
                            .map(str::to_string),
                    ));
                }
                if matches!(
                    state,
                    Some(InstanceStateName::Terminated) | Some(InstanceStateName::ShuttingDown)
                ) {
                    return Err(ProviderError::permanent(format!(
                        "instance {} terminated while starting",
                        instance_id
                    )));
                }
                debug!("{} is {:?}", instance_id, state);
            }

            if start.elapsed() >= self.wait_timeout {
                return Err(ProviderError::permanent(format!(
                    "timed out after {:?} waiting for {} to enter running",
                    self.wait_timeout, instance_id
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn port_range(
    builder: aws_sdk_ec2::types::builders::IpPermissionBuilder,
    protocol: Protocol,
    from_port: u16,
    to_port: u16,
) -> aws_sdk_ec2::types::builders::IpPermissionBuilder {
    // Ports are meaningless for the all-protocols wildcard.
    if protocol == Protocol::All {
        builder
    } else {
        builder.from_port(i32::from(from_port)).to_port(i32::from(to_port))
    }
}

#[async_trait]
impl Provider for AwsProvider {
    fn name(&self) -> &str {
        "aws"
    }

    async fn resolve_image(&self, filter: &ImageFilter) -> Result<ResolvedImage, ProviderError> {
        let resp = self
            .client
            .describe_images()
            .set_owners(Some(filter.owners.clone()))
            .filters(
                Filter::builder()
                    .name("name")
                    .values(&filter.name_pattern)
                    .build(),
            )
            .filters(Filter::builder().name("state").values("available").build())
            .send()
            .await
            .map_err(|e| classify("DescribeImages", e))?;

        let mut images: Vec<_> = resp
            .images()
            .iter()
            .filter(|image| image.image_id().is_some())
            .collect();

        if images.is_empty() {
            return Err(ProviderError::permanent(format!(
                "Your query returned no results for name pattern '{}' in {}",
                filter.name_pattern, self.region
            )));
        }
        if images.len() > 1 && !filter.most_recent {
            return Err(ProviderError::permanent(format!(
                "Your query returned more than one result ({}); set most_recent to pick one",
                images.len()
            )));
        }

        images.sort_by(|a, b| a.creation_date().cmp(&b.creation_date()));
        let image = images[images.len() - 1];

        Ok(ResolvedImage {
            id: image.image_id().unwrap_or_default().to_string(),
            name: image.name().unwrap_or_default().to_string(),
        })
    }

    async fn create(&self, request: &CreateRequest<'_>) -> Result<Created, ProviderError> {
        let name = request.resource.name.as_str();
        debug!("Creating {} {} in {}", request.resource.kind(), name, self.region);

        match &request.resource.spec {
            ResourceSpec::NetworkBlock(vpc) => self.create_network(vpc).await,
            ResourceSpec::Gateway(gw) => {
                self.create_gateway(request.id_of(&gw.network)?, &gw.tags)
                    .await
            }
            ResourceSpec::Subnet(subnet) => {
                self.create_subnet(request.id_of(&subnet.network)?, subnet)
                    .await
            }
            ResourceSpec::RouteTable(rt) => self.create_route_table(request, rt).await,
            ResourceSpec::RouteAssociation(assoc) => {
                let subnet_id = request.id_of(&assoc.subnet)?;
                let route_table_id = request.id_of(&assoc.route_table)?;
                let resp = self
                    .client
                    .associate_route_table()
                    .subnet_id(subnet_id)
                    .route_table_id(route_table_id)
                    .send()
                    .await
                    .map_err(|e| classify("AssociateRouteTable", e))?;
                let association_id = resp
                    .association_id()
                    .ok_or_else(|| missing("an association id"))?;
                Ok(Created::new(association_id)
                    .with_attribute("subnet_id", subnet_id)
                    .with_attribute("route_table_id", route_table_id))
            }
            ResourceSpec::AccessPolicy(policy) => {
                self.create_access_policy(name, request.id_of(&policy.network)?, policy)
                    .await
            }
            ResourceSpec::KeyCredential(key) => self.import_key(key).await,
            ResourceSpec::ComputeInstance(instance) => self.run_instance(request, instance).await,
            ResourceSpec::ImageReference(_) => Err(ProviderError::permanent(format!(
                "'{}' is a data source and cannot be created",
                name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_spec_keeps_order() {
        let mut tags = Tags::new();
        tags.insert("Name".to_string(), "btc-tracker-vpc".to_string());
        tags.insert("Project".to_string(), "btc-tracker".to_string());

        let spec = tag_spec(ResourceType::Vpc, &tags);
        let keys: Vec<_> = spec.tags().iter().filter_map(|t| t.key()).collect();
        assert_eq!(keys, vec!["Name", "Project"]);
    }

    #[test]
    fn test_all_protocol_omits_ports() {
        let permission = port_range(
            IpPermission::builder().ip_protocol("-1"),
            Protocol::All,
            0,
            0,
        )
        .build();
        assert!(permission.from_port().is_none());

        let permission = port_range(
            IpPermission::builder().ip_protocol("tcp"),
            Protocol::Tcp,
            22,
            22,
        )
        .build();
        assert_eq!(permission.from_port(), Some(22));
    }

    #[test]
    fn test_fresh_instance_lookup_keeps_polling() {
        assert!(instance_pending(Some("InvalidInstanceID.NotFound")));
        assert!(instance_pending(Some("RequestLimitExceeded")));
        assert!(!instance_pending(Some("UnauthorizedOperation")));
        assert!(!instance_pending(None));
    }

    #[test]
    fn test_failure_after_create_is_permanent() {
        let err = after_create(
            "vpc-0abc",
            ProviderError::transient("ModifyVpcAttribute: InvalidVpcID.NotFound"),
        );
        assert!(!err.is_transient());
        assert!(err.message().starts_with("vpc-0abc was created"));
        assert!(err.message().contains("InvalidVpcID.NotFound"));
    }

    #[test]
    fn test_client_token_is_stable_per_session() {
        let token = client_token("0000000000000001", "abc");
        assert_eq!(token, client_token("0000000000000001", "abc"));
        assert_ne!(token, client_token("0000000000000002", "abc"));
        assert_ne!(token, client_token("0000000000000001", "abd"));
        assert!(token.len() <= 64 && token.is_ascii());
    }
}

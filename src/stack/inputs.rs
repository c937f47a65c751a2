//! Stack inputs resolved from configuration.

use std::fmt;

use crate::config::StackConfig;
use crate::error::{Error, Result};
use crate::provision::RepositoryUrl;
use crate::resources::{RootVolume, Tags};
use crate::secrets::SensitiveString;

/// Instance type used when none is configured.
pub const DEFAULT_INSTANCE_TYPE: &str = "t3.micro";

/// Validated inputs of one stack.
#[derive(Clone)]
pub struct StackInputs {
    /// Prefix of every logical name
    pub name: String,
    /// Cloud region
    pub region: String,
    /// CIDR block of the network, passed through unvalidated
    pub vpc_cidr: String,
    /// CIDR block of the subnet, passed through unvalidated
    pub subnet_cidr: String,
    /// Caller address that ingress is restricted to
    pub my_ip: SensitiveString,
    /// OpenSSH public key material
    pub public_key: String,
    /// Application repository
    pub repo_url: RepositoryUrl,
    /// Placement zone of the subnet
    pub availability_zone: Option<String>,
    /// Instance type
    pub instance_type: String,
    /// Root volume of the instance
    pub root_volume: RootVolume,
    /// Stack-wide tags
    pub tags: Tags,
}

impl StackInputs {
    /// Inputs with the defaults for every optional value.
    pub fn new(
        vpc_cidr: impl Into<String>,
        subnet_cidr: impl Into<String>,
        my_ip: SensitiveString,
        public_key: impl Into<String>,
    ) -> Self {
        Self {
            name: crate::config::DEFAULT_STACK_NAME.to_string(),
            region: crate::config::DEFAULT_REGION.to_string(),
            vpc_cidr: vpc_cidr.into(),
            subnet_cidr: subnet_cidr.into(),
            my_ip,
            public_key: public_key.into(),
            repo_url: RepositoryUrl::placeholder(),
            availability_zone: None,
            instance_type: DEFAULT_INSTANCE_TYPE.to_string(),
            root_volume: RootVolume::default(),
            tags: Tags::new(),
        }
    }

    /// Resolve inputs from configuration.
    ///
    /// Required inputs are checked in declaration order, so the error names
    /// the first one missing. Blank values count as missing.
    pub fn from_config(config: &StackConfig, tags: &Tags) -> Result<Self> {
        fn present(value: &Option<String>) -> Option<&str> {
            value.as_deref().map(str::trim).filter(|v| !v.is_empty())
        }

        let vpc_cidr = present(&config.vpc_cidr).ok_or(Error::MissingInput("vpc_cidr"))?;
        let subnet_cidr =
            present(&config.subnet_cidr).ok_or(Error::MissingInput("subnet_cidr"))?;
        let my_ip = config
            .my_ip
            .as_ref()
            .map(|ip| ip.expose().trim())
            .filter(|ip| !ip.is_empty())
            .map(SensitiveString::new)
            .ok_or(Error::MissingInput("my_ip"))?;
        let public_key = match (present(&config.public_key), &config.public_key_file) {
            (Some(key), _) => key.to_string(),
            (None, Some(path)) => std::fs::read_to_string(path)
                .map_err(|e| Error::InvalidInput {
                    name: "public_key_file",
                    message: format!("cannot read {}: {}", path.display(), e),
                })?
                .trim()
                .to_string(),
            (None, None) => return Err(Error::MissingInput("public_key")),
        };
        if public_key.is_empty() {
            return Err(Error::MissingInput("public_key"));
        }

        let defaults = RootVolume::default();

        Ok(Self {
            name: config.name().to_string(),
            region: config.region().to_string(),
            vpc_cidr: vpc_cidr.to_string(),
            subnet_cidr: subnet_cidr.to_string(),
            my_ip,
            public_key,
            repo_url: present(&config.repo_url)
                .map(RepositoryUrl::new)
                .unwrap_or_default(),
            availability_zone: present(&config.availability_zone).map(str::to_string),
            instance_type: present(&config.instance_type)
                .unwrap_or(DEFAULT_INSTANCE_TYPE)
                .to_string(),
            root_volume: RootVolume {
                size_gib: config.root_volume_gib.unwrap_or(defaults.size_gib),
                volume_type: present(&config.root_volume_type)
                    .map(str::to_string)
                    .unwrap_or(defaults.volume_type),
            },
            tags: tags.clone(),
        })
    }

    /// Logical name of a resource of this stack.
    pub fn logical_name(&self, suffix: &str) -> String {
        format!("{}-{}", self.name, suffix)
    }
}

impl fmt::Debug for StackInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackInputs")
            .field("name", &self.name)
            .field("region", &self.region)
            .field("vpc_cidr", &self.vpc_cidr)
            .field("subnet_cidr", &self.subnet_cidr)
            .field("my_ip", &self.my_ip)
            .field("repo_url", &self.repo_url)
            .field("instance_type", &self.instance_type)
            .finish_non_exhaustive()
    }
}

//! Configuration module for Infrastack
//!
//! Handles loading and merging configuration from multiple sources:
//! - Default values
//! - System configuration (/etc/infrastack/infrastack.toml)
//! - User configuration (~/.infrastack.toml)
//! - Project configuration (./infrastack.toml)
//! - Environment variables (`INFRASTACK_*`)
//! - Command-line arguments (applied by the CLI)

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::retry::RetryPolicy;
use crate::secrets::SensitiveString;

/// Stack name used when none is configured.
pub const DEFAULT_STACK_NAME: &str = "btc-tracker";

/// Region used when none is configured.
pub const DEFAULT_REGION: &str = "us-east-1";

/// State file used when none is configured.
pub const DEFAULT_STATE_FILE: &str = ".infrastack/state.json";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Stack inputs
    pub stack: StackConfig,

    /// Provisioning engine settings
    pub engine: EngineConfig,

    /// Logging settings
    pub logging: LoggingConfig,

    /// Tags applied to every taggable resource
    pub tags: IndexMap<String, String>,
}

/// Inputs of the stack.
///
/// Required inputs stay `None` until some layer sets them; the stack
/// builder reports the first one still missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Prefix of every logical name
    pub name: Option<String>,

    /// Cloud region
    pub region: Option<String>,

    /// CIDR block of the network
    pub vpc_cidr: Option<String>,

    /// CIDR block of the subnet
    pub subnet_cidr: Option<String>,

    /// Caller address allowed to reach the instance
    pub my_ip: Option<SensitiveString>,

    /// OpenSSH public key material
    pub public_key: Option<String>,

    /// File to read the public key from when `public_key` is unset
    pub public_key_file: Option<PathBuf>,

    /// Application repository cloned at boot
    pub repo_url: Option<String>,

    /// Placement zone of the subnet
    pub availability_zone: Option<String>,

    /// Instance type
    pub instance_type: Option<String>,

    /// Root volume size in GiB
    pub root_volume_gib: Option<u32>,

    /// Root volume type
    pub root_volume_type: Option<String>,
}

impl StackConfig {
    /// Effective stack name.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_STACK_NAME)
    }

    /// Effective region.
    pub fn region(&self) -> &str {
        self.region.as_deref().unwrap_or(DEFAULT_REGION)
    }

    fn merge(self, other: StackConfig) -> StackConfig {
        StackConfig {
            name: other.name.or(self.name),
            region: other.region.or(self.region),
            vpc_cidr: other.vpc_cidr.or(self.vpc_cidr),
            subnet_cidr: other.subnet_cidr.or(self.subnet_cidr),
            my_ip: other.my_ip.or(self.my_ip),
            public_key: other.public_key.or(self.public_key),
            public_key_file: other.public_key_file.or(self.public_key_file),
            repo_url: other.repo_url.or(self.repo_url),
            availability_zone: other.availability_zone.or(self.availability_zone),
            instance_type: other.instance_type.or(self.instance_type),
            root_volume_gib: other.root_volume_gib.or(self.root_volume_gib),
            root_volume_type: other.root_volume_type.or(self.root_volume_type),
        }
    }
}

/// Which provider the engine drives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Amazon EC2 (requires the `aws` feature)
    #[default]
    Aws,
    /// Deterministic in-process provider
    Simulated,
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aws" => Ok(ProviderKind::Aws),
            "simulated" | "sim" => Ok(ProviderKind::Simulated),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// Provisioning engine settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Provider to use
    pub provider: Option<ProviderKind>,

    /// Path of the JSON state file
    pub state_file: Option<PathBuf>,

    /// Retry policy for transient provider errors
    pub retry: Option<RetryPolicy>,
}

impl EngineConfig {
    /// Effective provider.
    pub fn provider(&self) -> ProviderKind {
        self.provider.unwrap_or_default()
    }

    /// Effective state file path.
    pub fn state_file(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE))
    }

    /// Effective retry policy.
    pub fn retry(&self) -> RetryPolicy {
        self.retry.clone().unwrap_or_default()
    }
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (overridden by `-v` and `RUST_LOG`)
    pub level: Option<String>,

    /// Emit JSON log lines
    pub json: bool,
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Config::default();

        for path in Self::get_config_paths(config_path) {
            if path.exists() {
                config = config.merge_from_file(&path)?;
            } else if config_path == Some(&path) {
                anyhow::bail!("Config file not found: {}", path.display());
            }
        }

        config.apply_env_overrides()?;

        Ok(config)
    }

    /// Get the list of configuration file paths to check
    fn get_config_paths(explicit_path: Option<&PathBuf>) -> Vec<PathBuf> {
        // Explicit path takes priority
        if let Some(path) = explicit_path {
            return vec![path.clone()];
        }

        if let Ok(env_config) = std::env::var("INFRASTACK_CONFIG") {
            return vec![PathBuf::from(env_config)];
        }

        let mut paths = vec![PathBuf::from("/etc/infrastack/infrastack.toml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".infrastack.toml"));
        }
        paths.push(PathBuf::from("infrastack.toml"));

        paths
    }

    /// Merge configuration from a file
    fn merge_from_file(self, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let file_config: Config = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };

        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(self.merge(file_config))
    }

    /// Merge another config into this one; set values in `other` win
    fn merge(self, other: Config) -> Config {
        let mut tags = self.tags;
        tags.extend(other.tags);

        Config {
            stack: self.stack.merge(other.stack),
            engine: EngineConfig {
                provider: other.engine.provider.or(self.engine.provider),
                state_file: other.engine.state_file.or(self.engine.state_file),
                retry: other.engine.retry.or(self.engine.retry),
            },
            logging: LoggingConfig {
                level: other.logging.level.or(self.logging.level),
                json: other.logging.json || self.logging.json,
            },
            tags,
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        if let Some(name) = var("INFRASTACK_STACK_NAME") {
            self.stack.name = Some(name);
        }
        if let Some(region) = var("INFRASTACK_REGION") {
            self.stack.region = Some(region);
        }
        if let Some(cidr) = var("INFRASTACK_VPC_CIDR") {
            self.stack.vpc_cidr = Some(cidr);
        }
        if let Some(cidr) = var("INFRASTACK_SUBNET_CIDR") {
            self.stack.subnet_cidr = Some(cidr);
        }
        if let Some(ip) = var("INFRASTACK_MY_IP") {
            self.stack.my_ip = Some(SensitiveString::new(ip));
        }
        if let Some(key) = var("INFRASTACK_PUBLIC_KEY") {
            self.stack.public_key = Some(key);
        }
        if let Some(file) = var("INFRASTACK_PUBLIC_KEY_FILE") {
            self.stack.public_key_file = Some(PathBuf::from(file));
        }
        if let Some(url) = var("INFRASTACK_REPO_URL") {
            self.stack.repo_url = Some(url);
        }
        if let Some(provider) = var("INFRASTACK_PROVIDER") {
            self.engine.provider = Some(
                provider
                    .parse::<ProviderKind>()
                    .map_err(anyhow::Error::msg)
                    .context("Invalid INFRASTACK_PROVIDER")?,
            );
        }
        if let Some(file) = var("INFRASTACK_STATE_FILE") {
            self.engine.state_file = Some(PathBuf::from(file));
        }
        if let Some(retries) = var("INFRASTACK_MAX_RETRIES") {
            let max_retries = retries
                .parse::<u32>()
                .with_context(|| format!("Invalid INFRASTACK_MAX_RETRIES: {}", retries))?;
            let mut retry = self.engine.retry();
            retry.max_retries = max_retries;
            self.engine.retry = Some(retry);
        }
        if let Some(level) = var("INFRASTACK_LOG_LEVEL") {
            self.logging.level = Some(level);
        }
        if var("INFRASTACK_LOG_JSON").is_some() {
            self.logging.json = true;
        }

        Ok(())
    }

    /// Load from a specific file only, skipping the standard locations
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Config::default().merge_from_file(path.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.stack.name(), "btc-tracker");
        assert_eq!(config.stack.region(), "us-east-1");
        assert_eq!(config.engine.provider(), ProviderKind::Aws);
        assert_eq!(config.engine.retry().max_retries, 3);
        assert!(config.stack.vpc_cidr.is_none());
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config::default();
        base.stack.vpc_cidr = Some("10.0.0.0/16".to_string());
        base.tags.insert("Project".to_string(), "btc".to_string());

        let mut other = Config::default();
        other.stack.region = Some("eu-west-1".to_string());
        other.tags.insert("Owner".to_string(), "ops".to_string());

        let merged = base.merge(other);
        assert_eq!(merged.stack.region(), "eu-west-1");
        assert_eq!(merged.stack.vpc_cidr.as_deref(), Some("10.0.0.0/16"));
        assert_eq!(merged.tags.len(), 2);
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("AWS".parse::<ProviderKind>(), Ok(ProviderKind::Aws));
        assert_eq!("sim".parse::<ProviderKind>(), Ok(ProviderKind::Simulated));
        assert!("gcp".parse::<ProviderKind>().is_err());
    }
}

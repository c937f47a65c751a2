//! Integration tests for the Infrastack configuration system
//!
//! These tests verify:
//! - Loading configuration from TOML, YAML, and JSON files
//! - Environment variable overrides
//! - Default values
//! - Resolving stack inputs from a loaded configuration

use infrastack::config::{Config, ProviderKind};
use infrastack::error::Error;
use infrastack::retry::BackoffStrategy;
use infrastack::stack::{StackBuilder, StackInputs};
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::path::PathBuf;
use tempfile::tempdir;

const OVERRIDE_VARS: [&str; 10] = [
    "INFRASTACK_STACK_NAME",
    "INFRASTACK_REGION",
    "INFRASTACK_VPC_CIDR",
    "INFRASTACK_SUBNET_CIDR",
    "INFRASTACK_MY_IP",
    "INFRASTACK_PUBLIC_KEY",
    "INFRASTACK_PROVIDER",
    "INFRASTACK_MAX_RETRIES",
    "INFRASTACK_LOG_JSON",
    "INFRASTACK_CONFIG",
];

fn clear_env() {
    for var in OVERRIDE_VARS {
        std::env::remove_var(var);
    }
}

// ============================================================================
// File Formats
// ============================================================================

#[test]
fn test_load_toml_config() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("infrastack.toml");
    std::fs::write(
        &path,
        r#"
[stack]
name = "tracker-prod"
region = "eu-central-1"
vpc_cidr = "10.20.0.0/16"
subnet_cidr = "10.20.1.0/24"
my_ip = "198.51.100.7/32"
public_key = "ssh-ed25519 AAAAC3Nz prod"
repo_url = "https://github.com/acme/btc-tracker.git"
root_volume_gib = 30

[engine]
provider = "simulated"
state_file = "/var/lib/infrastack/prod.json"

[engine.retry]
max_retries = 5
initial_delay_ms = 200
backoff = "linear"

[logging]
level = "debug"

[tags]
Environment = "production"
"#,
    )
    .unwrap();

    let config = Config::from_file(&path).unwrap();

    assert_eq!(config.stack.name(), "tracker-prod");
    assert_eq!(config.stack.region(), "eu-central-1");
    assert_eq!(config.stack.my_ip.as_ref().unwrap().expose(), "198.51.100.7/32");
    assert_eq!(config.stack.root_volume_gib, Some(30));
    assert_eq!(config.engine.provider(), ProviderKind::Simulated);
    assert_eq!(
        config.engine.state_file(),
        PathBuf::from("/var/lib/infrastack/prod.json")
    );

    let retry = config.engine.retry();
    assert_eq!(retry.max_retries, 5);
    assert_eq!(retry.initial_delay_ms, 200);
    assert_eq!(retry.backoff, BackoffStrategy::Linear);
    // Unset fields keep their defaults.
    assert_eq!(retry.max_delay_ms, 30_000);

    assert_eq!(config.logging.level.as_deref(), Some("debug"));
    assert_eq!(
        config.tags.get("Environment").map(String::as_str),
        Some("production")
    );
}

#[test]
fn test_load_yaml_config() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("infrastack.yml");
    std::fs::write(
        &path,
        r#"
stack:
  vpc_cidr: 10.0.0.0/16
  subnet_cidr: 10.0.1.0/24
  my_ip: 203.0.113.5/32
engine:
  retry:
    max_retries: 1
    backoff: constant
"#,
    )
    .unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.stack.vpc_cidr.as_deref(), Some("10.0.0.0/16"));
    assert_eq!(config.engine.retry().max_retries, 1);
    assert_eq!(config.engine.retry().backoff, BackoffStrategy::Constant);
    assert_eq!(config.stack.name(), "btc-tracker");
}

#[test]
fn test_load_json_config() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("infrastack.json");
    std::fs::write(
        &path,
        r#"{"stack": {"region": "ap-southeast-2"}, "logging": {"json": true}}"#,
    )
    .unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.stack.region(), "ap-southeast-2");
    assert!(config.logging.json);
}

#[test]
fn test_malformed_config_names_the_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[stack\nname = ").unwrap();

    let err = Config::from_file(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("broken.toml"));
}

#[test]
#[serial]
fn test_explicit_missing_config_is_an_error() {
    clear_env();
    let missing = PathBuf::from("/nonexistent/infrastack.toml");
    assert!(Config::load(Some(&missing)).is_err());
}

// ============================================================================
// Environment Overrides
// ============================================================================

#[test]
#[serial]
fn test_env_overrides_file_values() {
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("infrastack.toml");
    std::fs::write(
        &path,
        "[stack]\nregion = \"us-west-2\"\nvpc_cidr = \"10.0.0.0/16\"\n",
    )
    .unwrap();

    std::env::set_var("INFRASTACK_REGION", "eu-west-1");
    std::env::set_var("INFRASTACK_MY_IP", "203.0.113.5/32");
    std::env::set_var("INFRASTACK_PROVIDER", "sim");
    std::env::set_var("INFRASTACK_MAX_RETRIES", "7");
    std::env::set_var("INFRASTACK_LOG_JSON", "1");

    let config = Config::load(Some(&path)).unwrap();
    clear_env();

    assert_eq!(config.stack.region(), "eu-west-1");
    assert_eq!(config.stack.vpc_cidr.as_deref(), Some("10.0.0.0/16"));
    assert_eq!(config.stack.my_ip.as_ref().unwrap().expose(), "203.0.113.5/32");
    assert_eq!(config.engine.provider(), ProviderKind::Simulated);
    assert_eq!(config.engine.retry().max_retries, 7);
    assert!(config.logging.json);
}

#[test]
#[serial]
fn test_invalid_env_override_is_rejected() {
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("infrastack.toml");
    std::fs::write(&path, "").unwrap();

    std::env::set_var("INFRASTACK_MAX_RETRIES", "many");
    let result = Config::load(Some(&path));
    clear_env();

    let err = result.unwrap_err();
    assert!(err.to_string().contains("INFRASTACK_MAX_RETRIES"));
}

#[test]
#[serial]
fn test_config_env_var_selects_file() {
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("from-env.toml");
    std::fs::write(&path, "[stack]\nname = \"from-env\"\n").unwrap();

    std::env::set_var("INFRASTACK_CONFIG", &path);
    let config = Config::load(None).unwrap();
    clear_env();

    assert_eq!(config.stack.name(), "from-env");
}

// ============================================================================
// Inputs From Configuration
// ============================================================================

#[test]
#[serial]
fn test_env_only_configuration_builds_a_stack() {
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.toml");
    std::fs::write(&path, "").unwrap();

    std::env::set_var("INFRASTACK_VPC_CIDR", "10.0.0.0/16");
    std::env::set_var("INFRASTACK_SUBNET_CIDR", "10.0.1.0/24");
    std::env::set_var("INFRASTACK_MY_IP", "203.0.113.5/32");
    std::env::set_var("INFRASTACK_PUBLIC_KEY", "ssh-ed25519 AAAAC3Nz env");
    let config = Config::load(Some(&path)).unwrap();
    clear_env();

    let inputs = StackInputs::from_config(&config.stack, &config.tags).unwrap();
    let plan = StackBuilder::build(inputs).unwrap();
    assert_eq!(plan.graph().node_count(), 9);
}

#[test]
fn test_missing_public_key_is_reported_after_network_inputs() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("partial.toml");
    std::fs::write(
        &path,
        "[stack]\nvpc_cidr = \"10.0.0.0/16\"\nsubnet_cidr = \"10.0.1.0/24\"\nmy_ip = \"203.0.113.5/32\"\n",
    )
    .unwrap();

    let config = Config::from_file(&path).unwrap();
    let err = StackInputs::from_config(&config.stack, &config.tags).unwrap_err();
    assert!(matches!(err, Error::MissingInput("public_key")));
}

#[test]
fn test_public_key_file_is_read() {
    let dir = tempdir().unwrap();
    let key_path = dir.path().join("id_ed25519.pub");
    std::fs::write(&key_path, "ssh-ed25519 AAAAC3Nz file\n").unwrap();

    let config_path = dir.path().join("infrastack.toml");
    std::fs::write(
        &config_path,
        format!(
            "[stack]\nvpc_cidr = \"10.0.0.0/16\"\nsubnet_cidr = \"10.0.1.0/24\"\nmy_ip = \"203.0.113.5/32\"\npublic_key_file = {:?}\n",
            key_path.display().to_string()
        ),
    )
    .unwrap();

    let config = Config::from_file(&config_path).unwrap();
    let inputs = StackInputs::from_config(&config.stack, &config.tags).unwrap();
    assert_eq!(inputs.public_key, "ssh-ed25519 AAAAC3Nz file");
}

#[test]
fn test_unreadable_public_key_file_is_invalid_input() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("infrastack.toml");
    std::fs::write(
        &config_path,
        "[stack]\nvpc_cidr = \"10.0.0.0/16\"\nsubnet_cidr = \"10.0.1.0/24\"\nmy_ip = \"203.0.113.5/32\"\npublic_key_file = \"/nonexistent/key.pub\"\n",
    )
    .unwrap();

    let config = Config::from_file(&config_path).unwrap();
    let err = StackInputs::from_config(&config.stack, &config.tags).unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidInput {
            name: "public_key_file",
            ..
        }
    ));
}

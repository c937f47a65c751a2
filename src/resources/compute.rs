//! Compute resources and their inputs: image lookup, key credential, instance.

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::Tags;
use crate::provision::BootPayload;

/// Default image name pattern: Amazon Linux 2023 on x86_64.
pub const DEFAULT_IMAGE_PATTERN: &str = "al2023-ami-2023.*-x86_64";

/// Default image owner.
pub const DEFAULT_IMAGE_OWNER: &str = "amazon";

/// Filter query resolving to a single machine image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageFilter {
    /// Name pattern; `*` matches any run of characters, `?` a single one
    pub name_pattern: String,
    /// Accepted image owners
    pub owners: Vec<String>,
    /// Pick the most recently created match
    pub most_recent: bool,
}

impl Default for ImageFilter {
    fn default() -> Self {
        Self {
            name_pattern: DEFAULT_IMAGE_PATTERN.to_string(),
            owners: vec![DEFAULT_IMAGE_OWNER.to_string()],
            most_recent: true,
        }
    }
}

impl ImageFilter {
    /// Whether an image name matches the pattern.
    pub fn matches_name(&self, name: &str) -> bool {
        pattern_regex(&self.name_pattern).is_some_and(|re| re.is_match(name))
    }

    /// Whether an owner is accepted. An empty owner list accepts all.
    pub fn accepts_owner(&self, owner: &str) -> bool {
        self.owners.is_empty() || self.owners.iter().any(|o| o == owner)
    }

    /// Stable key identifying the query, used to memoise resolution.
    pub fn cache_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.name_pattern,
            self.owners.join(","),
            self.most_recent
        )
    }
}

fn pattern_regex(pattern: &str) -> Option<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).ok()
}

/// Machine image data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub filter: ImageFilter,
}

/// Registered public key used to log in to the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCredential {
    /// Provider-side key name
    pub key_name: String,
    /// OpenSSH public key material
    pub public_key: String,
    /// Resource tags
    pub tags: Tags,
}

/// Root block device of the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootVolume {
    /// Size in GiB
    pub size_gib: u32,
    /// Volume type (gp2, gp3, io1, ...)
    pub volume_type: String,
}

impl Default for RootVolume {
    fn default() -> Self {
        Self {
            size_gib: 20,
            volume_type: "gp3".to_string(),
        }
    }
}

/// The single virtual machine of the stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeInstance {
    /// Machine size (e.g. `t3.micro`)
    pub instance_type: String,
    /// Logical name of the image reference
    pub image: String,
    /// Logical name of the subnet
    pub subnet: String,
    /// Logical names of the access policies, at least one
    pub access_policies: Vec<String>,
    /// Logical name of the key credential
    pub key: String,
    /// Root volume sizing
    pub root_volume: RootVolume,
    /// Boot-time provisioning payload, passed through unmodified
    pub boot: BootPayload,
    /// Resource tags
    pub tags: Tags,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_matches_al2023() {
        let filter = ImageFilter::default();
        assert!(filter.matches_name("al2023-ami-2023.6.20241010.0-kernel-6.1-x86_64"));
        assert!(!filter.matches_name("al2023-ami-2023.6.20241010.0-kernel-6.1-arm64"));
        assert!(!filter.matches_name("amzn2-ami-hvm-2.0-x86_64"));
    }

    #[test]
    fn test_wildcards() {
        let matches = |pattern: &str, name: &str| {
            pattern_regex(pattern).is_some_and(|re| re.is_match(name))
        };
        assert!(matches("*", ""));
        assert!(matches("a?c", "abc"));
        assert!(!matches("a?c", "ac"));
        assert!(matches("a*b*c", "a-x-b-y-c"));
        assert!(!matches("a*b", "a-x-c"));
        // Regex metacharacters in the pattern are literal
        assert!(matches("ami-2023.1", "ami-2023.1"));
        assert!(!matches("ami-2023.1", "ami-2023x1"));
    }

    #[test]
    fn test_owner_filter() {
        let filter = ImageFilter::default();
        assert!(filter.accepts_owner("amazon"));
        assert!(!filter.accepts_owner("aws-marketplace"));

        let open = ImageFilter {
            owners: vec![],
            ..ImageFilter::default()
        };
        assert!(open.accepts_owner("anyone"));
    }

    #[test]
    fn test_root_volume_default() {
        let volume = RootVolume::default();
        assert_eq!(volume.size_gib, 20);
        assert_eq!(volume.volume_type, "gp3");
    }
}

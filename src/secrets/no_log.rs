//! No-log enforcement for sensitive configuration inputs.
//!
//! Sensitive inputs (the caller address that restricts ingress) travel
//! through the builder wrapped in [`SensitiveString`]. Rendered plans and
//! outputs are additionally passed through a [`NoLogRegistry`] so that a
//! value which leaked into free text is still masked.

use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Replacement text for every redacted value.
pub const REDACTED: &str = "[REDACTED]";

/// A string wrapper that prevents the value from being logged or serialized.
///
/// `Display`, `Debug` and `Serialize` all yield `[REDACTED]`. The only way to
/// read the value is [`SensitiveString::expose`].
///
/// # Example
///
/// ```rust
/// use infrastack::secrets::SensitiveString;
///
/// let ip = SensitiveString::new("203.0.113.5/32");
/// assert_eq!(format!("{}", ip), "[REDACTED]");
/// assert_eq!(ip.expose(), "203.0.113.5/32");
/// ```
#[derive(Clone)]
pub struct SensitiveString {
    value: String,
}

impl SensitiveString {
    /// Create a new sensitive string.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Expose the underlying value.
    pub fn expose(&self) -> &str {
        &self.value
    }

    /// Check if the value is empty.
    pub fn is_empty(&self) -> bool {
        self.value.trim().is_empty()
    }
}

impl fmt::Display for SensitiveString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveString({})", REDACTED)
    }
}

// No Deref to str: reads go through expose()

impl From<String> for SensitiveString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SensitiveString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl PartialEq for SensitiveString {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for SensitiveString {}

impl serde::Serialize for SensitiveString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(REDACTED)
    }
}

impl<'de> serde::Deserialize<'de> for SensitiveString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}

/// Registry of sensitive values to mask in rendered text.
pub struct NoLogRegistry {
    values: RwLock<HashSet<String>>,
}

impl NoLogRegistry {
    /// Create a new registry.
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashSet::new()),
        }
    }

    /// Create a shared registry.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a sensitive value.
    pub fn register(&self, value: &SensitiveString) {
        if value.is_empty() {
            return;
        }
        self.values.write().insert(value.expose().to_string());
    }

    /// Check if a text contains any registered sensitive value.
    pub fn contains_sensitive(&self, text: &str) -> bool {
        self.values.read().iter().any(|v| text.contains(v.as_str()))
    }

    /// Redact all registered sensitive values from text.
    pub fn redact(&self, text: &str) -> String {
        let values = self.values.read();
        let mut result = text.to_string();

        // Longest first, so a value that contains another is masked whole.
        let mut ordered: Vec<&String> = values.iter().collect();
        ordered.sort_by_key(|v| std::cmp::Reverse(v.len()));

        for value in ordered {
            if result.contains(value.as_str()) {
                result = result.replace(value.as_str(), REDACTED);
            }
        }

        result
    }

    /// Get the number of registered values.
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl Default for NoLogRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NoLogRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoLogRegistry")
            .field("registered_values", &self.len())
            .finish()
    }
}

//! Sensitive value handling.
//!
//! Values marked sensitive in configuration never reach logs, rendered
//! plans, state files or error messages in clear text.

mod no_log;

pub use no_log::{NoLogRegistry, SensitiveString, REDACTED};

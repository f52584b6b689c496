//! Policy error types.

use thiserror::Error;

/// Errors from checking or loading a policy.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A needle asked for a capability the policy does not grant.
    #[error("capability denied: {0}")]
    Denied(String),

    /// A rule can never match inside the sandbox, such as an absolute or
    /// `..` filesystem pattern.
    #[error("invalid policy: {0}")]
    Invalid(String),

    /// The `[allow]`/`[deny]` tables are not valid TOML for a policy.
    #[error("failed to parse policy: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, Error>;

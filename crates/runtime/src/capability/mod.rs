//! Host modules a guest can reach.
//!
//! A capability registers raw host functions on a [`Sandbox`] and then runs
//! a small Lua prelude that tucks them into locals and publishes a namespace
//! table (`fs`, `network`, `log`). Guests never see the raw bindings.

mod fs;
mod log;
mod network;

pub use fs::FsModule;
pub use log::{LogLevel, LogModule, LogSink, TracingSink};
pub use network::{DEFAULT_TIMEOUT as DEFAULT_NETWORK_TIMEOUT, NetworkModule};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::Result;
use crate::sandbox::Sandbox;
use crate::value::ScriptValue;

/// A host module that can be installed into a sandbox.
///
/// Implementations are shared read-only across concurrent invocations.
pub trait Capability: Send + Sync {
    /// Name of the namespace the guest sees.
    fn name(&self) -> &'static str;

    /// Bind host functions and run the prelude.
    fn install(self: Arc<Self>, sandbox: &Sandbox) -> Result<()>;
}

/// Failure of a host function, raised in the guest as a Lua error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CapabilityError {
    #[error("capability denied: {0}")]
    Denied(String),

    #[error("path escapes the sandbox root: {0}")]
    Escape(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl From<policy::Error> for CapabilityError {
    fn from(err: policy::Error) -> Self {
        match err {
            policy::Error::Denied(reason) => Self::Denied(reason),
            other => Self::Denied(other.to_string()),
        }
    }
}

/// Positional string argument. Numbers are accepted and rendered the way
/// Lua's `tostring` would.
pub(crate) fn string_arg(
    args: &[ScriptValue],
    index: usize,
    call: &str,
) -> std::result::Result<String, CapabilityError> {
    match args.get(index) {
        Some(ScriptValue::Str(s)) => Ok(s.clone()),
        Some(n @ ScriptValue::Number(_)) => Ok(n.to_string()),
        Some(other) => Err(CapabilityError::InvalidArgument(format!(
            "{call}: argument #{} must be a string, got {}",
            index + 1,
            other.type_name()
        ))),
        None => Err(CapabilityError::InvalidArgument(format!(
            "{call}: argument #{} is missing",
            index + 1
        ))),
    }
}

/// Optional string-keyed table of scalars, as used for HTTP headers.
pub(crate) fn string_map_arg(
    args: &[ScriptValue],
    index: usize,
    call: &str,
) -> std::result::Result<BTreeMap<String, String>, CapabilityError> {
    let invalid = |found: &str| {
        CapabilityError::InvalidArgument(format!(
            "{call}: argument #{} must be a table of strings, got {found}",
            index + 1
        ))
    };
    match args.get(index) {
        None | Some(ScriptValue::Nil) => Ok(BTreeMap::new()),
        Some(ScriptValue::List(items)) if items.is_empty() => Ok(BTreeMap::new()),
        Some(ScriptValue::Map(map)) => map
            .iter()
            .map(|(k, v)| match v {
                ScriptValue::Str(s) => Ok((k.clone(), s.clone())),
                ScriptValue::Number(_) | ScriptValue::Bool(_) => Ok((k.clone(), v.to_string())),
                other => Err(invalid(other.type_name())),
            })
            .collect(),
        Some(other) => Err(invalid(other.type_name())),
    }
}

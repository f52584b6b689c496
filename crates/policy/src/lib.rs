//! Capability-based policy system.
//!
//! Core principle: **Guest code reaches the outside world only through a
//! capability, and every capability use is checked against policy.**

mod capability;
mod error;
mod policy;

pub use capability::{CapabilityKind, CapabilityRequest};
pub use error::{Error, Result};
pub use policy::{AllowRules, Decision, DenyRules, Policy};

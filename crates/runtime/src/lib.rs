//! Needle runtime: typed execution of Lua tool bodies in a sandbox.
//!
//! A [`Needle`](storage::Needle) declares typed arguments and a return type.
//! Executing one goes through these pieces:
//!
//! - **args**: raw JSON arguments are coerced into [`NeedleParameter`]s.
//! - **codegen**: the parameters become `local` bindings ahead of the body.
//! - **sandbox**: a fresh Lua state, with no `io`, `os` or module loading,
//!   runs the source under a deadline and a memory limit.
//! - **capability**: host modules (`fs`, `network`, `log`) installed into
//!   each sandbox, gated by a [`Policy`](policy::Policy).
//! - **executor**: ties the above together and returns a [`NeedleResult`]
//!   of the declared type.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use policy::Policy;
//! use runtime::{FsModule, LogModule, NeedleExecutor};
//! use storage::{Arg, Needle, ValueType};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = Arc::new(Policy::restrictive());
//! let executor = NeedleExecutor::builder()
//!     .capability(FsModule::new("sandbox", policy)?)
//!     .capability(LogModule::tracing())
//!     .build();
//!
//! let add = Needle::new("add", "return a + b", ValueType::Int)
//!     .with_arg(Arg::required("a", ValueType::Int))
//!     .with_arg(Arg::required("b", ValueType::Int));
//!
//! let args = serde_json::json!({"a": 10, "b": 32});
//! let result = executor.execute_json(args.as_object().unwrap(), &add).await?;
//! println!("{result}");
//! # Ok(())
//! # }
//! ```

mod args;
pub mod capability;
mod codegen;
mod error;
mod executor;
mod params;
pub mod sandbox;
mod tool;
mod value;

pub use args::{ArgumentError, ParsedArguments, parse_arguments};
pub use capability::{
    Capability, CapabilityError, DEFAULT_NETWORK_TIMEOUT, FsModule, LogLevel, LogModule, LogSink,
    NetworkModule, TracingSink,
};
pub use codegen::{build_source, quote};
pub use error::{Error, Result};
pub use executor::{NeedleExecutor, NeedleExecutorBuilder};
pub use params::{NeedleParameter, NeedleResult, ParamValue};
pub use sandbox::{Limits, Sandbox};
pub use tool::ToolSpec;
pub use value::{FromScriptValue, ScriptValue};

//! SQLite-backed storage for needle definitions.
//!
//! A needle is a small tool an agent can call: a name, a description, a
//! list of typed arguments, a return type and a Lua body. This crate owns
//! the record shape ([`Needle`], [`Arg`], [`ValueType`]) and its persistence
//! ([`NeedleStore`]).
//!
//! Records serialize with the external schema field names (`returnType`,
//! `defaultValue`, `createdAt`, ...) so that any JSON or key-value store can
//! round-trip them losslessly.
//!
//! # Example
//!
//! ```no_run
//! use storage::{Arg, Needle, NeedleStore, ValueType};
//!
//! let store = NeedleStore::open("needles.db")?;
//!
//! let add = Needle::new("add", "return a + b", ValueType::Int)
//!     .with_description("Add two integers")
//!     .with_arg(Arg::required("a", ValueType::Int))
//!     .with_arg(Arg::required("b", ValueType::Int));
//! store.save(&add)?;
//!
//! for needle in store.list()? {
//!     println!("{}: {}", needle.name, needle.description);
//! }
//! # Ok::<(), storage::Error>(())
//! ```

mod error;
mod needle;
mod store;

pub use error::{Error, Result};
pub use needle::{Arg, Needle, NeedleId, ValueType};
pub use store::NeedleStore;

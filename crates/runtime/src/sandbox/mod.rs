//! Guest Runtime Adapter: one disposable Lua state per invocation.
//!
//! All interaction with the interpreter goes through [`Sandbox`]; nothing
//! outside this module touches `mlua` directly. The rest of the crate only
//! sees `evaluate`, `bind_function`, `set_global` and `exec`.

mod convert;

use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use mlua::{HookTriggers, Lua, LuaOptions, StdLib, Value, Variadic, VmState};
use thiserror::Error;

use crate::capability::CapabilityError;
use crate::value::{FromScriptValue, ScriptValue};
use crate::{Error, Result};

/// How often (in VM instructions) the deadline is checked.
const DEADLINE_CHECK_INTERVAL: u32 = 1_000;

/// Chunk name used for needle sources in error messages.
const NEEDLE_CHUNK: &str = "=needle";

/// Base library functions that reach the filesystem or load code.
const REMOVED_GLOBALS: &[&str] = &["dofile", "loadfile", "load", "require", "print"];

/// Finalizers run with hooks disabled, so a `__gc` loop would never see the
/// deadline.
const GUARD_PRELUDE: &str = r#"
local raw_setmetatable, rawget, type, error = setmetatable, rawget, type, error
setmetatable = function(t, mt)
  if type(mt) == "table" and rawget(mt, "__gc") ~= nil then
    error("__gc metamethods are not available", 2)
  end
  return raw_setmetatable(t, mt)
end
"#;

/// Resource limits applied to every sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Wall-clock budget for one invocation.
    pub deadline: Option<Duration>,
    /// Maximum bytes the interpreter may allocate.
    pub memory_limit: Option<usize>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            deadline: Some(Duration::from_secs(30)),
            memory_limit: Some(64 * 1024 * 1024),
        }
    }
}

impl Limits {
    /// No deadline and no memory limit.
    pub fn unlimited() -> Self {
        Self {
            deadline: None,
            memory_limit: None,
        }
    }
}

#[derive(Debug, Error)]
#[error("invocation deadline exceeded")]
struct DeadlineExceeded;

/// An isolated Lua interpreter.
///
/// Only `table`, `string`, `math` and `utf8` are loaded; there is no `io`,
/// `os`, `package`, `debug` or `coroutine`, and the base functions that load
/// code or files are removed. Coroutines are left out because the
/// instruction hook only follows the main thread. Everything else a guest can reach is bound by
/// the host.
pub struct Sandbox {
    lua: Lua,
    deadline: Option<Duration>,
}

impl Sandbox {
    /// Create a fresh interpreter with `limits` applied. The deadline clock
    /// starts now.
    pub fn new(limits: &Limits) -> Result<Self> {
        let libs = StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8;
        let lua = Lua::new_with(libs, LuaOptions::default()).map_err(setup_error)?;

        let globals = lua.globals();
        for name in REMOVED_GLOBALS {
            globals.set(*name, Value::Nil).map_err(setup_error)?;
        }
        lua.load(GUARD_PRELUDE)
            .set_name("=guard")
            .exec()
            .map_err(setup_error)?;

        if let Some(bytes) = limits.memory_limit {
            lua.set_memory_limit(bytes).map_err(setup_error)?;
        }

        if let Some(budget) = limits.deadline {
            let expires = Instant::now() + budget;
            lua.set_hook(
                HookTriggers::new().every_nth_instruction(DEADLINE_CHECK_INTERVAL),
                move |lua, _| {
                    if Instant::now() < expires {
                        return Ok(VmState::Continue);
                    }
                    // From here on every instruction fails, so a guest `pcall`
                    // only unwinds one frame before the error is raised again.
                    lua.set_hook(HookTriggers::new().every_nth_instruction(1), |_, _| {
                        Err(mlua::Error::external(DeadlineExceeded))
                    });
                    Err(mlua::Error::external(DeadlineExceeded))
                },
            );
        }

        tracing::debug!(?limits, "created sandbox");
        Ok(Self {
            lua,
            deadline: limits.deadline,
        })
    }

    /// Expose a host function to the guest as the global `name`.
    ///
    /// Arguments arrive as [`ScriptValue`]s. An `Err` return, or a panic,
    /// is raised in the guest as a Lua error that `pcall` can catch.
    pub fn bind_function<F>(&self, name: &str, host_fn: F) -> Result<()>
    where
        F: Fn(Vec<ScriptValue>) -> std::result::Result<ScriptValue, CapabilityError> + 'static,
    {
        let fn_name = name.to_string();
        let function = self
            .lua
            .create_function(move |_, args: Variadic<ScriptValue>| {
                let args: Vec<ScriptValue> = args.iter().cloned().collect();
                match panic::catch_unwind(AssertUnwindSafe(|| host_fn(args))) {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(mlua::Error::external(e)),
                    Err(_) => Err(mlua::Error::runtime(format!(
                        "host function '{fn_name}' panicked"
                    ))),
                }
            })
            .map_err(setup_error)?;

        self.lua
            .globals()
            .set(name, function)
            .map_err(setup_error)
    }

    /// Publish a value as the global `name`.
    pub fn set_global(&self, name: &str, value: ScriptValue) -> Result<()> {
        self.lua.globals().set(name, value).map_err(setup_error)
    }

    /// Run a trusted host-provided chunk, such as a capability prelude.
    pub fn exec(&self, chunk_name: &str, source: &str) -> Result<()> {
        self.lua
            .load(source)
            .set_name(format!("={chunk_name}"))
            .exec()
            .map_err(|e| Error::Sandbox(format!("{chunk_name}: {}", root_message(&e))))
    }

    /// Compile and run `source`, converting its first return value to `T`.
    ///
    /// Returns `Ok(None)` when the chunk produced `nil` (or nothing), and
    /// [`Error::TypeMismatch`] when it produced a value that is not a `T`.
    pub fn evaluate<T: FromScriptValue>(&self, source: &str) -> Result<Option<T>> {
        let chunk = self
            .lua
            .load(source)
            .set_name(NEEDLE_CHUNK)
            .into_function()
            .map_err(|e| self.classify(e))?;

        let value: Value = chunk.call(()).map_err(|e| self.classify(e))?;
        let value = convert::from_lua_value(value, 0).map_err(|e| Error::TypeMismatch {
            expected: T::TYPE,
            found: e.to_string(),
        })?;

        if value.is_nil() {
            return Ok(None);
        }
        T::from_script_value(&value)
            .map(Some)
            .ok_or_else(|| Error::TypeMismatch {
                expected: T::TYPE,
                found: describe(&value),
            })
    }

    fn classify(&self, err: mlua::Error) -> Error {
        if let (Some(limit), Some(_)) = (self.deadline, find_cause::<DeadlineExceeded>(&err)) {
            return Error::Timeout(limit);
        }
        match root(&err) {
            mlua::Error::SyntaxError { message, .. } => Error::Compile(message.clone()),
            mlua::Error::MemoryError(_) => {
                Error::Runtime("memory limit exceeded".to_string())
            }
            _ => Error::Runtime(root_message(&err)),
        }
    }
}

fn setup_error(err: mlua::Error) -> Error {
    Error::Sandbox(root_message(&err))
}

/// Unwrap callback and context layers down to the originating error.
fn root(err: &mlua::Error) -> &mlua::Error {
    match err {
        mlua::Error::CallbackError { cause, .. } => root(cause),
        mlua::Error::WithContext { cause, .. } => root(cause),
        _ => err,
    }
}

fn find_cause<T: std::error::Error + 'static>(err: &mlua::Error) -> Option<&T> {
    match root(err) {
        mlua::Error::ExternalError(inner) => inner.downcast_ref::<T>(),
        _ => None,
    }
}

/// The originating error message without the Lua stack traceback.
fn root_message(err: &mlua::Error) -> String {
    let message = root(err).to_string();
    match message.find("\nstack traceback:") {
        Some(end) => message[..end].to_string(),
        None => message,
    }
}

fn describe(value: &ScriptValue) -> String {
    let mut rendered = value.to_string();
    if rendered.len() > 64 {
        let cut = (0..=61).rev().find(|i| rendered.is_char_boundary(*i)).unwrap_or(0);
        rendered.truncate(cut);
        rendered.push_str("...");
    }
    format!("{} ({rendered})", value.type_name())
}

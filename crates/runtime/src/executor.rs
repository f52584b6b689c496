//! Executing a needle: validate, build source, sandbox, evaluate.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use storage::{Needle, ValueType};

use crate::args::{ArgumentError, parse_arguments};
use crate::capability::Capability;
use crate::codegen::build_source;
use crate::params::{NeedleParameter, NeedleResult};
use crate::sandbox::{Limits, Sandbox};
use crate::{Error, Result};

/// Extra time the async backstop allows beyond the deadline, so the
/// interpreter's own check normally reports the timeout first.
const BACKSTOP_GRACE: Duration = Duration::from_secs(1);

/// Builder for [`NeedleExecutor`].
pub struct NeedleExecutorBuilder {
    capabilities: Vec<Arc<dyn Capability>>,
    limits: Limits,
}

impl NeedleExecutorBuilder {
    pub fn new() -> Self {
        Self {
            capabilities: Vec::new(),
            limits: Limits::default(),
        }
    }

    /// Install `capability` into every sandbox this executor creates.
    pub fn capability<C: Capability + 'static>(mut self, capability: C) -> Self {
        self.capabilities.push(Arc::new(capability));
        self
    }

    /// Wall-clock budget per invocation.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.limits.deadline = Some(deadline);
        self
    }

    /// Interpreter allocation cap per invocation, in bytes.
    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.limits.memory_limit = Some(bytes);
        self
    }

    /// Remove the deadline and the memory limit.
    pub fn unlimited(mut self) -> Self {
        self.limits = Limits::unlimited();
        self
    }

    pub fn build(self) -> NeedleExecutor {
        NeedleExecutor {
            capabilities: self.capabilities,
            limits: self.limits,
        }
    }
}

impl Default for NeedleExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs needles, one fresh sandbox per invocation.
///
/// Cloning is cheap; clones share the capability modules, which are
/// read-only. Concurrent invocations share nothing else.
#[derive(Clone)]
pub struct NeedleExecutor {
    capabilities: Vec<Arc<dyn Capability>>,
    limits: Limits,
}

impl NeedleExecutor {
    pub fn builder() -> NeedleExecutorBuilder {
        NeedleExecutorBuilder::new()
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Parse raw JSON arguments for `needle`, then execute it.
    ///
    /// This is the entry point for tool calls.
    pub async fn execute_json(
        &self,
        args: &Map<String, Value>,
        needle: &Needle,
    ) -> Result<NeedleResult> {
        let parsed = parse_arguments(args, needle)?;
        self.execute(parsed.params, needle).await
    }

    /// Execute `needle` on a blocking thread.
    ///
    /// Returns [`Error::Timeout`] once the deadline (plus a short grace)
    /// passes, even if the guest is stuck inside a host call. The blocking
    /// thread is then left to finish on its own.
    pub async fn execute(&self, params: Vec<NeedleParameter>, needle: &Needle) -> Result<NeedleResult> {
        let executor = self.clone();
        let owned = needle.clone();
        let task = tokio::task::spawn_blocking(move || executor.execute_blocking(&params, &owned));

        let joined = match self.limits.deadline {
            Some(limit) => match tokio::time::timeout(limit + BACKSTOP_GRACE, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    tracing::warn!(needle = %needle.name, ?limit, "needle abandoned after deadline");
                    return Err(Error::Timeout(limit));
                }
            },
            None => task.await,
        };

        joined.map_err(|e| {
            tracing::error!(needle = %needle.name, error = %e, "needle task failed");
            Error::Runtime(format!("needle task failed: {e}"))
        })?
    }

    /// Execute `needle` on the current thread.
    ///
    /// Network calls need a tokio runtime handle, so from async code use
    /// [`execute`](Self::execute) instead.
    pub fn execute_blocking(&self, params: &[NeedleParameter], needle: &Needle) -> Result<NeedleResult> {
        let started = Instant::now();
        tracing::info!(needle = %needle.name, params = params.len(), "executing needle");

        let outcome = self.run(params, needle);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(result) => {
                tracing::info!(needle = %needle.name, %result, elapsed_ms, "needle finished")
            }
            Err(e @ Error::Compile(_)) => {
                tracing::error!(needle = %needle.name, error = %e, "generated source did not compile")
            }
            Err(e) => tracing::warn!(needle = %needle.name, error = %e, elapsed_ms, "needle failed"),
        }
        outcome
    }

    fn run(&self, params: &[NeedleParameter], needle: &Needle) -> Result<NeedleResult> {
        validate(params, needle)?;
        let source = build_source(params, needle)?;

        let sandbox = Sandbox::new(&self.limits)?;
        for capability in &self.capabilities {
            tracing::debug!(capability = capability.name(), "installing capability");
            Arc::clone(capability).install(&sandbox)?;
        }

        let expected = needle.return_type;
        let result = match expected {
            ValueType::String => sandbox.evaluate::<String>(&source)?.map(NeedleResult::String),
            ValueType::Int => sandbox.evaluate::<i64>(&source)?.map(NeedleResult::Int),
            ValueType::Float => sandbox.evaluate::<f64>(&source)?.map(NeedleResult::Float),
            ValueType::Boolean => sandbox.evaluate::<bool>(&source)?.map(NeedleResult::Boolean),
        };
        result.ok_or(Error::NoValue { expected })
    }
}

impl fmt::Debug for NeedleExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.capabilities.iter().map(|c| c.name()).collect();
        f.debug_struct("NeedleExecutor")
            .field("capabilities", &names)
            .field("limits", &self.limits)
            .finish()
    }
}

/// Check typed parameters against the needle's declared arguments.
fn validate(params: &[NeedleParameter], needle: &Needle) -> Result<()> {
    needle.validate()?;

    for param in params {
        let arg = needle
            .arg(&param.name)
            .ok_or_else(|| ArgumentError::UnknownParameter(param.name.clone()))?;
        if param.value_type() != arg.value_type {
            return Err(ArgumentError::TypeMismatch {
                name: param.name.clone(),
                expected: arg.value_type,
                found: param.value_type(),
            }
            .into());
        }
    }

    if let Some(missing) = needle
        .args
        .iter()
        .find(|arg| arg.required && !params.iter().any(|p| p.name == arg.name))
    {
        return Err(ArgumentError::MissingRequired(missing.name.clone()).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::Arg;

    fn executor() -> NeedleExecutor {
        NeedleExecutor::builder().build()
    }

    #[test]
    fn each_return_type_has_its_own_path() {
        let ex = executor();
        let cases = [
            (ValueType::String, "return 'hi'", NeedleResult::String("hi".into())),
            (ValueType::Int, "return 7", NeedleResult::Int(7)),
            (ValueType::Float, "return 2.5", NeedleResult::Float(2.5)),
            (ValueType::Boolean, "return false", NeedleResult::Boolean(false)),
        ];
        for (return_type, code, expected) in cases {
            let needle = Needle::new("literal", code, return_type);
            assert_eq!(ex.execute_blocking(&[], &needle).unwrap(), expected);
        }
    }

    #[test]
    fn integral_float_results_are_floats() {
        let needle = Needle::new("whole", "return 3", ValueType::Float);
        assert_eq!(executor().execute_blocking(&[], &needle).unwrap(), NeedleResult::Float(3.0));
    }

    #[test]
    fn nil_is_an_error() {
        let needle = Needle::new("nothing", "local x = 1", ValueType::String);
        let err = executor().execute_blocking(&[], &needle).unwrap_err();
        assert!(matches!(err, Error::NoValue { expected: ValueType::String }));
    }

    #[test]
    fn parameters_are_checked_before_running() {
        let needle = Needle::new("greet", "return 'hello ' .. who", ValueType::String)
            .with_arg(Arg::required("who", ValueType::String));
        let ex = executor();

        assert!(matches!(
            ex.execute_blocking(&[], &needle),
            Err(Error::Argument(ArgumentError::MissingRequired(ref n))) if n == "who"
        ));
        assert!(matches!(
            ex.execute_blocking(&[NeedleParameter::int("who", 1)], &needle),
            Err(Error::Argument(ArgumentError::TypeMismatch { found: ValueType::Int, .. }))
        ));
        assert!(matches!(
            ex.execute_blocking(
                &[NeedleParameter::string("who", "x"), NeedleParameter::string("whom", "y")],
                &needle
            ),
            Err(Error::Argument(ArgumentError::UnknownParameter(ref n))) if n == "whom"
        ));
        assert_eq!(
            ex.execute_blocking(&[NeedleParameter::string("who", "bob")], &needle).unwrap(),
            NeedleResult::String("hello bob".into())
        );
    }

    #[test]
    fn invalid_needles_are_rejected() {
        let needle = Needle::new("dup", "return a", ValueType::Int)
            .with_arg(Arg::required("a", ValueType::Int))
            .with_arg(Arg::required("a", ValueType::Int));
        let err = executor()
            .execute_blocking(&[NeedleParameter::int("a", 1)], &needle)
            .unwrap_err();
        assert!(matches!(err, Error::Storage(storage::Error::InvalidNeedle(_))));
    }

    #[test]
    fn optional_arguments_use_defaults() {
        let needle = Needle::new("scale", "return x * factor", ValueType::Int)
            .with_arg(Arg::required("x", ValueType::Int))
            .with_arg(Arg::optional("factor", ValueType::Int, Some("3")));
        let result = executor()
            .execute_blocking(&[NeedleParameter::int("x", 5)], &needle)
            .unwrap();
        assert_eq!(result, NeedleResult::Int(15));
    }

    #[tokio::test]
    async fn async_path_parses_json_arguments() {
        let needle = Needle::new("add", "return a + b", ValueType::Int)
            .with_arg(Arg::required("a", ValueType::Int))
            .with_arg(Arg::required("b", ValueType::Int));
        let args = serde_json::json!({"a": 10, "b": "32"});
        let result = executor()
            .execute_json(args.as_object().unwrap(), &needle)
            .await
            .unwrap();
        assert_eq!(result, NeedleResult::Int(42));
    }

    #[tokio::test]
    async fn backstop_reports_timeouts() {
        let ex = NeedleExecutor::builder()
            .deadline(Duration::from_millis(100))
            .build();
        let needle = Needle::new("spin", "while true do end", ValueType::Int);
        let err = ex.execute(Vec::new(), &needle).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(d) if d == Duration::from_millis(100)));
    }

    #[test]
    fn debug_lists_capabilities() {
        let ex = NeedleExecutor::builder()
            .capability(crate::capability::LogModule::tracing())
            .build();
        assert!(format!("{ex:?}").contains("\"log\""));
    }
}

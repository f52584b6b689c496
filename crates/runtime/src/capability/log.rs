//! `log`: guest logging, plus the `print` rebinding.

use std::fmt;
use std::sync::Arc;

use super::{Capability, CapabilityError};
use crate::Result;
use crate::sandbox::Sandbox;
use crate::value::ScriptValue;

const PRELUDE: &str = r##"
local write = __log_write
__log_write = nil
log = {
  d = function(tag, message, cause) write("d", tag, message, cause) end,
  i = function(tag, message, cause) write("i", tag, message, cause) end,
  w = function(tag, message, cause) write("w", tag, message, cause) end,
  e = function(tag, message, cause) write("e", tag, message, cause) end,
}
function print(...)
  local parts = {}
  for i = 1, select("#", ...) do
    parts[#parts + 1] = tostring((select(i, ...)))
  end
  write("i", "print", table.concat(parts, "\t"))
end
"##;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn from_code(code: &str) -> Option<Self> {
        match code {
            "d" => Some(Self::Debug),
            "i" => Some(Self::Info),
            "w" => Some(Self::Warn),
            "e" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        })
    }
}

/// Destination for guest log lines.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, tag: &str, message: &str, cause: Option<&str>);
}

/// Forwards guest logs to `tracing` under the `needle::guest` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, tag: &str, message: &str, cause: Option<&str>) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "needle::guest", tag, cause, "{message}"),
            LogLevel::Info => tracing::info!(target: "needle::guest", tag, cause, "{message}"),
            LogLevel::Warn => tracing::warn!(target: "needle::guest", tag, cause, "{message}"),
            LogLevel::Error => tracing::error!(target: "needle::guest", tag, cause, "{message}"),
        }
    }
}

pub struct LogModule {
    sink: Arc<dyn LogSink>,
}

impl LogModule {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl Default for LogModule {
    fn default() -> Self {
        Self::tracing()
    }
}

impl fmt::Debug for LogModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogModule").finish_non_exhaustive()
    }
}

impl Capability for LogModule {
    fn name(&self) -> &'static str {
        "log"
    }

    fn install(self: Arc<Self>, sandbox: &Sandbox) -> Result<()> {
        let sink = Arc::clone(&self.sink);
        sandbox.bind_function("__log_write", move |args| {
            let code = args.first().and_then(ScriptValue::as_str).unwrap_or_default();
            let level = LogLevel::from_code(code)
                .ok_or_else(|| CapabilityError::InvalidArgument(format!("unknown log level '{code}'")))?;
            let text = |i: usize| args.get(i).map(ScriptValue::to_string).unwrap_or_else(|| "nil".to_string());
            let cause = args.get(3).filter(|c| !c.is_nil()).map(ScriptValue::to_string);

            sink.log(level, &text(1), &text(2), cause.as_deref());
            Ok(ScriptValue::Nil)
        })?;

        sandbox.exec("log", PRELUDE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::Limits;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(LogLevel, String, String, Option<String>)>>);

    impl LogSink for Recorder {
        fn log(&self, level: LogLevel, tag: &str, message: &str, cause: Option<&str>) {
            self.0.lock().unwrap().push((
                level,
                tag.to_string(),
                message.to_string(),
                cause.map(str::to_string),
            ));
        }
    }

    fn installed() -> (Arc<Recorder>, Sandbox) {
        let recorder = Arc::new(Recorder::default());
        let sandbox = Sandbox::new(&Limits::default()).unwrap();
        Arc::new(LogModule::new(recorder.clone())).install(&sandbox).unwrap();
        (recorder, sandbox)
    }

    #[test]
    fn levels_tags_and_causes() {
        let (recorder, sandbox) = installed();
        sandbox
            .evaluate::<i64>(
                r#"
                log.d("net", "dialing")
                log.w("net", "slow", "latency 900ms")
                log.e("db", 42)
                return 0
                "#,
            )
            .unwrap();

        let lines = recorder.0.lock().unwrap();
        assert_eq!(
            *lines,
            vec![
                (LogLevel::Debug, "net".to_string(), "dialing".to_string(), None),
                (
                    LogLevel::Warn,
                    "net".to_string(),
                    "slow".to_string(),
                    Some("latency 900ms".to_string())
                ),
                (LogLevel::Error, "db".to_string(), "42".to_string(), None),
            ]
        );
    }

    #[test]
    fn print_goes_to_the_sink() {
        let (recorder, sandbox) = installed();
        sandbox.evaluate::<i64>("print('a', 1, nil, true) return 0").unwrap();

        let lines = recorder.0.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, LogLevel::Info);
        assert_eq!(lines[0].1, "print");
        assert_eq!(lines[0].2, "a\t1\tnil\ttrue");
    }

    #[test]
    fn raw_binding_is_hidden() {
        let (_recorder, sandbox) = installed();
        assert_eq!(
            sandbox.evaluate::<bool>("return __log_write == nil and type(log.i) == 'function'").unwrap(),
            Some(true)
        );
    }

    #[test]
    fn tracing_sink_accepts_every_level() {
        let sink = TracingSink;
        for level in [LogLevel::Debug, LogLevel::Info, LogLevel::Warn, LogLevel::Error] {
            sink.log(level, "tag", "message", Some("cause"));
        }
        assert_eq!(LogLevel::Warn.to_string(), "warn");
    }
}

//! Injected logging sink.
//!
//! The launcher and the teardown path never log through global state
//! directly. They receive an `Arc<dyn HarnessLog>` from [`HarnessConfig`]
//! so that tests can capture or silence harness output.
//!
//! [`HarnessConfig`]: crate::HarnessConfig

use std::fmt::Arguments;

/// Log level for harness messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Sink for harness diagnostics.
pub trait HarnessLog: Send + Sync {
    /// Record a message at `level`. The other methods delegate here.
    fn log(&self, level: LogLevel, args: Arguments<'_>);

    fn debug(&self, args: Arguments<'_>) {
        self.log(LogLevel::Debug, args);
    }

    fn info(&self, args: Arguments<'_>) {
        self.log(LogLevel::Info, args);
    }

    fn warn(&self, args: Arguments<'_>) {
        self.log(LogLevel::Warn, args);
    }

    fn error(&self, args: Arguments<'_>) {
        self.log(LogLevel::Error, args);
    }
}

/// Forwards harness messages to the `tracing` ecosystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLog;

impl HarnessLog for TracingLog {
    fn log(&self, level: LogLevel, args: Arguments<'_>) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "test_server", "{}", args),
            LogLevel::Info => tracing::info!(target: "test_server", "{}", args),
            LogLevel::Warn => tracing::warn!(target: "test_server", "{}", args),
            LogLevel::Error => tracing::error!(target: "test_server", "{}", args),
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpLog;

impl HarnessLog for NoOpLog {
    #[inline]
    fn log(&self, _level: LogLevel, _args: Arguments<'_>) {}
}

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::client::ClientConfig;
use crate::config::SecureServingOptions;

/// Contract between the harness and the service under test.
///
/// The service supplies its own flag parser (`Options`), derives its runtime
/// configuration from the parsed options and exposes a blocking run loop
/// that must return once the [`StopSignal`] fires.
pub trait TestService: Send + Sync + 'static {
    /// Flag-parsed options. Defaults live in the clap attributes.
    type Options: clap::Parser + fmt::Debug + Send;
    /// Fully resolved runtime configuration shared with the run loop.
    type Config: fmt::Debug + Send + Sync + 'static;

    /// Program name used as `argv[0]` when parsing overrides and as the
    /// service thread name.
    const NAME: &'static str;

    /// Secure serving section of the options, when the service has one.
    fn secure_serving<'a>(
        &self,
        options: &'a mut Self::Options,
    ) -> Option<&'a mut SecureServingOptions>;

    /// Derive the runtime configuration. Implementations that serve on the
    /// pre-bound socket take it out of [`SecureServingOptions::listener`].
    fn config(&self, options: &mut Self::Options) -> anyhow::Result<Self::Config>;

    /// Client configuration able to reach the running service.
    fn client_config(&self, config: &Self::Config) -> ClientConfig;

    /// Blocking run loop.
    fn run(&self, config: Arc<Self::Config>, stop: StopSignal) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
struct StopState {
    stopped: Mutex<bool>,
    changed: Condvar,
}

impl StopState {
    fn fire(&self) {
        let mut stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        *stopped = true;
        self.changed.notify_all();
    }
}

/// Create a connected cancellation pair.
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let state = Arc::new(StopState::default());
    (
        StopHandle {
            state: state.clone(),
        },
        StopSignal { state },
    )
}

/// Harness side of the cancellation signal. Dropping it fires the signal.
#[derive(Debug)]
pub struct StopHandle {
    state: Arc<StopState>,
}

impl StopHandle {
    /// Ask the run loop to begin full shutdown. Repeated calls are no-ops.
    pub fn stop(&self) {
        self.state.fire();
    }
}

impl Drop for StopHandle {
    fn drop(&mut self) {
        self.state.fire();
    }
}

/// Service side of the cancellation signal.
#[derive(Debug, Clone)]
pub struct StopSignal {
    state: Arc<StopState>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self
            .state
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until cancellation fires.
    pub fn wait(&self) {
        let stopped = self
            .state
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let _stopped = self
            .state
            .changed
            .wait_while(stopped, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Block until cancellation fires or `timeout` elapses. Returns whether
    /// the signal has fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let stopped = self
            .state
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (stopped, _) = self
            .state
            .changed
            .wait_timeout_while(stopped, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *stopped
    }
}

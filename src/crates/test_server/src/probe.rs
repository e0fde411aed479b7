use std::time::{Duration, Instant};

use thiserror::Error;

use crate::client::Liveness;
use crate::error::HarnessError;
use crate::log::HarnessLog;
use crate::runner::{RunningService, ServiceExit};

/// Delay between readiness attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How long to wait for readiness before giving up.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

const HEALTHY_STATUS: u16 = 200;

/// Readiness poll cadence and deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

/// Why a service never became ready.
#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("service exited before becoming ready: {0}")]
    ServiceStartFailed(#[source] ServiceExit),
    #[error("timed out after {0:?} waiting for a healthy response")]
    Timeout(Duration),
}

impl From<ReadinessError> for HarnessError {
    fn from(err: ReadinessError) -> Self {
        match err {
            ReadinessError::ServiceStartFailed(exit) => HarnessError::ServiceStartFailed(exit),
            ReadinessError::Timeout(timeout) => HarnessError::ReadinessTimeout(timeout),
        }
    }
}

/// Poll `liveness` until it answers 200.
///
/// Each round checks, in order: whether the run loop has already returned,
/// whether the endpoint is healthy, and whether the deadline has passed.
/// Non-200 statuses and request errors only mean "not ready yet". An attempt
/// may take at most one interval and never runs past the deadline. The wait
/// between rounds blocks on the run loop's outcome, so an early exit is
/// seen as soon as it happens.
pub fn wait_ready(
    liveness: &dyn Liveness,
    service: &mut RunningService,
    policy: &PollPolicy,
    log: &dyn HarnessLog,
) -> Result<(), ReadinessError> {
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut attempts: u64 = 0;

    loop {
        if let Some(exit) = service.try_exit() {
            return Err(ReadinessError::ServiceStartFailed(exit));
        }

        attempts += 1;
        let limit = policy
            .interval
            .min(deadline.saturating_duration_since(Instant::now()));
        match liveness.check(limit) {
            Ok(HEALTHY_STATUS) => {
                log.debug(format_args!(
                    "healthy after {attempts} attempt(s) in {:?}",
                    started.elapsed()
                ));
                return Ok(());
            }
            Ok(status) => log.debug(format_args!("liveness attempt {attempts}: status {status}")),
            Err(err) => log.debug(format_args!("liveness attempt {attempts}: {err:#}")),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(ReadinessError::Timeout(policy.timeout));
        }

        let pause = policy.interval.min(deadline - now);
        if let Some(exit) = service.wait_exit_timeout(pause) {
            return Err(ReadinessError::ServiceStartFailed(exit));
        }
    }
}

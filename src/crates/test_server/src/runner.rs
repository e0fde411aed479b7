use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{HarnessError, HarnessResult};
use crate::service::{stop_channel, StopHandle, StopSignal};

/// Terminal outcome of a service run loop.
#[derive(Debug)]
pub enum ServiceExit {
    /// The run loop returned `Ok(())`.
    Clean,
    /// The run loop returned an error.
    Failed(anyhow::Error),
    /// The run loop panicked.
    Panicked(String),
}

impl ServiceExit {
    pub fn is_clean(&self) -> bool {
        matches!(self, ServiceExit::Clean)
    }
}

impl fmt::Display for ServiceExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceExit::Clean => f.write_str("run loop returned without error"),
            ServiceExit::Failed(err) => write!(f, "{err:#}"),
            ServiceExit::Panicked(message) => write!(f, "run loop panicked: {message}"),
        }
    }
}

impl StdError for ServiceExit {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ServiceExit::Failed(err) => {
                let source: &(dyn StdError + 'static) = &**err;
                Some(source)
            }
            _ => None,
        }
    }
}

/// Result of waiting for the run loop during shutdown.
#[derive(Debug)]
pub enum Shutdown {
    /// The run loop returned with this outcome.
    Exited(ServiceExit),
    /// The outcome was already taken earlier (e.g. by the readiness prober).
    AlreadyObserved,
    /// The run loop did not return within the shutdown bound.
    TimedOut(Duration),
}

/// Starts service run loops on a dedicated thread.
pub struct ServiceRunner;

impl ServiceRunner {
    /// Spawn `run` on its own thread, handing it the service side of a fresh
    /// cancellation pair.
    ///
    /// The outcome is delivered exactly once, after which the channel is
    /// closed. A panic inside `run` is caught and delivered as
    /// [`ServiceExit::Panicked`].
    pub fn start<F>(name: &str, run: F) -> HarnessResult<RunningService>
    where
        F: FnOnce(StopSignal) -> anyhow::Result<()> + Send + 'static,
    {
        let (stop, signal) = stop_channel();
        let (exit_tx, exit_rx) = mpsc::sync_channel(1);

        let thread = thread::Builder::new()
            .name(format!("test-server-{name}"))
            .spawn(move || {
                let exit = match panic::catch_unwind(AssertUnwindSafe(|| run(signal))) {
                    Ok(Ok(())) => ServiceExit::Clean,
                    Ok(Err(err)) => ServiceExit::Failed(err),
                    Err(payload) => ServiceExit::Panicked(panic_message(payload.as_ref())),
                };
                let _ = exit_tx.send(exit);
            })
            .map_err(HarnessError::ServiceSpawn)?;

        Ok(RunningService {
            stop,
            exit_rx,
            thread: Some(thread),
            observed: false,
        })
    }
}

/// Handle to a run loop executing on its background thread.
pub struct RunningService {
    stop: StopHandle,
    exit_rx: Receiver<ServiceExit>,
    thread: Option<JoinHandle<()>>,
    observed: bool,
}

impl RunningService {
    /// Take the outcome if the run loop has already returned.
    pub fn try_exit(&mut self) -> Option<ServiceExit> {
        if self.observed {
            return None;
        }
        match self.exit_rx.try_recv() {
            Ok(exit) => Some(self.finish(exit)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(self.finish(lost_outcome())),
        }
    }

    /// Like [`try_exit`](Self::try_exit), but block for up to `timeout`
    /// waiting for the run loop to return.
    pub fn wait_exit_timeout(&mut self, timeout: Duration) -> Option<ServiceExit> {
        if self.observed {
            return None;
        }
        match self.exit_rx.recv_timeout(timeout) {
            Ok(exit) => Some(self.finish(exit)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(self.finish(lost_outcome())),
        }
    }

    /// Whether the outcome has already been taken.
    pub fn has_exited(&self) -> bool {
        self.observed
    }

    /// Fire the cancellation signal without waiting.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Fire cancellation, then wait for the run loop to return and join its
    /// thread. With `timeout` set, give up after that long and detach the
    /// thread instead.
    pub fn stop_and_wait(mut self, timeout: Option<Duration>) -> Shutdown {
        self.stop.stop();
        if self.observed {
            self.join();
            return Shutdown::AlreadyObserved;
        }

        let received = match timeout {
            None => self.exit_rx.recv().ok(),
            Some(limit) => match self.exit_rx.recv_timeout(limit) {
                Ok(exit) => Some(exit),
                Err(RecvTimeoutError::Timeout) => return Shutdown::TimedOut(limit),
                Err(RecvTimeoutError::Disconnected) => None,
            },
        };
        let exit = self.finish(received.unwrap_or_else(lost_outcome));
        self.join();
        Shutdown::Exited(exit)
    }

    fn finish(&mut self, exit: ServiceExit) -> ServiceExit {
        self.observed = true;
        exit
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl fmt::Debug for RunningService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningService")
            .field("observed", &self.observed)
            .field("joined", &self.thread.is_none())
            .finish()
    }
}

// The worker always sends before dropping the sender, so a disconnect
// without a value means the thread died outside the caught closure.
fn lost_outcome() -> ServiceExit {
    ServiceExit::Panicked("service thread ended without reporting an outcome".to_string())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn stop_and_wait_delivers_clean_exit() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let running = ServiceRunner::start("clean", move |stop| {
            stop.wait();
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .expect("start");

        match running.stop_and_wait(None) {
            Shutdown::Exited(exit) => assert!(exit.is_clean()),
            other => panic!("unexpected shutdown {other:?}"),
        }
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn early_failure_is_peekable_once() {
        let mut running =
            ServiceRunner::start("fails", |_stop| Err(anyhow::anyhow!("bind: address in use")))
                .expect("start");

        let exit = running
            .wait_exit_timeout(Duration::from_secs(5))
            .expect("failure should be delivered");
        assert!(matches!(exit, ServiceExit::Failed(_)));
        assert_eq!(exit.to_string(), "bind: address in use");
        assert!(running.has_exited());
        assert!(running.try_exit().is_none());
        assert!(matches!(
            running.stop_and_wait(None),
            Shutdown::AlreadyObserved
        ));
    }

    #[test]
    fn try_exit_is_empty_while_running() {
        let mut running = ServiceRunner::start("idle", |stop| {
            stop.wait();
            Ok(())
        })
        .expect("start");

        assert!(running.try_exit().is_none());
        assert!(running.wait_exit_timeout(Duration::from_millis(20)).is_none());
        assert!(matches!(
            running.stop_and_wait(None),
            Shutdown::Exited(ServiceExit::Clean)
        ));
    }

    #[test]
    fn panics_are_reported_as_outcomes() {
        let mut running = ServiceRunner::start("panics", |_stop| -> anyhow::Result<()> {
            panic!("config was nil")
        })
        .expect("start");

        match running.wait_exit_timeout(Duration::from_secs(5)) {
            Some(ServiceExit::Panicked(message)) => assert_eq!(message, "config was nil"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn shutdown_error_is_returned_from_wait() {
        let running = ServiceRunner::start("dirty", |stop| {
            stop.wait();
            Err(anyhow::anyhow!("failed to flush state"))
        })
        .expect("start");

        match running.stop_and_wait(None) {
            Shutdown::Exited(ServiceExit::Failed(err)) => {
                assert_eq!(err.to_string(), "failed to flush state")
            }
            other => panic!("unexpected shutdown {other:?}"),
        }
    }

    #[test]
    fn bounded_wait_gives_up_on_stuck_run_loop() {
        let running = ServiceRunner::start("stuck", |_stop| {
            thread::sleep(Duration::from_millis(500));
            Ok(())
        })
        .expect("start");

        let started = Instant::now();
        let shutdown = running.stop_and_wait(Some(Duration::from_millis(50)));
        assert!(matches!(shutdown, Shutdown::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_millis(450));
    }
}

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use crate::log::HarnessLog;
use crate::runner::{RunningService, ServiceExit, Shutdown};

/// Cancels the service, waits for its run loop to return, then removes the
/// temporary directory.
///
/// `run` consumes the value, so it executes at most once. A `Teardown` that
/// is dropped without being run tears down from `Drop`, which is how every
/// failed launch is cleaned up.
#[must_use = "dropping a Teardown tears the server down immediately"]
pub struct Teardown {
    service: Option<RunningService>,
    temp_dir: Option<TempDir>,
    shutdown_timeout: Option<Duration>,
    log: Arc<dyn HarnessLog>,
}

impl Teardown {
    pub(crate) fn new(log: Arc<dyn HarnessLog>, shutdown_timeout: Option<Duration>) -> Self {
        Self {
            service: None,
            temp_dir: None,
            shutdown_timeout,
            log,
        }
    }

    pub(crate) fn own_temp_dir(&mut self, dir: TempDir) -> PathBuf {
        let path = dir.path().to_path_buf();
        self.temp_dir = Some(dir);
        path
    }

    pub(crate) fn own_service(&mut self, service: RunningService) -> &mut RunningService {
        self.service.insert(service)
    }

    pub fn temp_dir(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }

    /// Tear everything down. Failures are logged, never returned.
    pub fn run(mut self) {
        self.run_once();
    }

    fn run_once(&mut self) {
        if let Some(service) = self.service.take() {
            match service.stop_and_wait(self.shutdown_timeout) {
                Shutdown::Exited(ServiceExit::Clean) | Shutdown::AlreadyObserved => {}
                Shutdown::Exited(exit) => self
                    .log
                    .error(format_args!("Failed to shutdown test server clearly: {exit}")),
                Shutdown::TimedOut(limit) => {
                    if let Some(dir) = self.temp_dir.take() {
                        let path = dir.keep();
                        self.log.error(format_args!(
                            "test server did not stop within {limit:?}; leaving {} in place",
                            path.display()
                        ));
                    } else {
                        self.log
                            .error(format_args!("test server did not stop within {limit:?}"));
                    }
                    return;
                }
            }
        }

        if let Some(dir) = self.temp_dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(err) = dir.close() {
                self.log.warn(format_args!(
                    "failed to remove temp dir {}: {err}",
                    path.display()
                ));
            }
        }
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.run_once();
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Teardown")
            .field("service", &self.service)
            .field("temp_dir", &self.temp_dir())
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{LogLevel, NoOpLog};
    use crate::resources::allocate_temp_dir;
    use crate::runner::ServiceRunner;
    use std::fmt::Arguments;
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::thread;

    #[derive(Default)]
    struct Recorded(Mutex<Vec<(LogLevel, String)>>);

    impl HarnessLog for Recorded {
        fn log(&self, level: LogLevel, args: Arguments<'_>) {
            self.0.lock().unwrap().push((level, args.to_string()));
        }
    }

    impl Recorded {
        fn errors(&self) -> Vec<String> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter(|(level, _)| *level == LogLevel::Error)
                .map(|(_, line)| line.clone())
                .collect()
        }
    }

    fn temp_root() -> TempDir {
        TempDir::new().expect("temp root")
    }

    #[test]
    fn stops_service_before_removing_directory() {
        let root = temp_root();
        let mut teardown = Teardown::new(Arc::new(NoOpLog), None);
        let dir = teardown.own_temp_dir(allocate_temp_dir(Some(root.path()), "svc").unwrap());

        let cert = dir.join("serving.crt");
        let dir_seen_at_exit = Arc::new(AtomicBool::new(false));
        let seen = dir_seen_at_exit.clone();
        let service = ServiceRunner::start("writer", move |stop| {
            fs::write(&cert, b"cert")?;
            stop.wait();
            seen.store(cert.exists(), Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        teardown.own_service(service);
        thread::sleep(Duration::from_millis(20));

        teardown.run();

        assert!(dir_seen_at_exit.load(Ordering::SeqCst));
        assert!(!dir.exists());
    }

    #[test]
    fn shutdown_error_is_logged_not_raised() {
        let root = temp_root();
        let log = Arc::new(Recorded::default());
        let mut teardown = Teardown::new(log.clone(), None);
        let dir = teardown.own_temp_dir(allocate_temp_dir(Some(root.path()), "svc").unwrap());
        teardown.own_service(
            ServiceRunner::start("dirty", |stop| {
                stop.wait();
                Err(anyhow::anyhow!("lease not released"))
            })
            .unwrap(),
        );

        teardown.run();

        assert!(!dir.exists());
        assert_eq!(
            log.errors(),
            vec!["Failed to shutdown test server clearly: lease not released".to_string()]
        );
    }

    #[test]
    fn drop_tears_down() {
        let root = temp_root();
        let mut teardown = Teardown::new(Arc::new(NoOpLog), None);
        let dir = teardown.own_temp_dir(allocate_temp_dir(Some(root.path()), "svc").unwrap());

        drop(teardown);
        assert!(!dir.exists());
    }

    #[test]
    fn empty_teardown_is_harmless() {
        Teardown::new(Arc::new(NoOpLog), None).run();
    }

    #[test]
    fn already_removed_directory_is_only_logged() {
        let root = temp_root();
        let log = Arc::new(Recorded::default());
        let mut teardown = Teardown::new(log.clone(), None);
        let dir = teardown.own_temp_dir(allocate_temp_dir(Some(root.path()), "svc").unwrap());
        fs::remove_dir_all(&dir).unwrap();

        teardown.run();
        assert!(log.errors().is_empty());
    }

    #[test]
    fn stuck_service_leaves_directory_when_bounded() {
        let root = temp_root();
        let log = Arc::new(Recorded::default());
        let mut teardown = Teardown::new(log.clone(), Some(Duration::from_millis(50)));
        let dir = teardown.own_temp_dir(allocate_temp_dir(Some(root.path()), "svc").unwrap());
        teardown.own_service(
            ServiceRunner::start("stuck", |_stop| {
                thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .unwrap(),
        );

        teardown.run();

        assert!(dir.exists(), "directory must outlive a run loop that may still use it");
        let errors = log.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("did not stop within"));
    }
}

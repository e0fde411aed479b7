use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::assemble::{assemble, Assembled, LaunchRequest};
use crate::client::{ClientConfig, HealthClient};
use crate::config::HarnessConfig;
use crate::error::HarnessResult;
use crate::log::HarnessLog;
use crate::probe::wait_ready;
use crate::resources::allocate_temp_dir;
use crate::runner::ServiceRunner;
use crate::service::TestService;
use crate::teardown::Teardown;

/// Steps of a single launch, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LaunchStage {
    Allocating,
    Configuring,
    Starting,
    Probing,
    Ready,
}

impl fmt::Display for LaunchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LaunchStage::Allocating => "allocating",
            LaunchStage::Configuring => "configuring",
            LaunchStage::Starting => "starting",
            LaunchStage::Probing => "probing",
            LaunchStage::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// A running, healthy service plus the obligation to tear it down.
///
/// Call [`tear_down`](Self::tear_down) when the test is done. Dropping the
/// server performs the same teardown, so a panicking test does not leak the
/// run loop or the temporary directory.
pub struct TestServer<S: TestService> {
    /// Client configuration for reaching the service's API.
    pub client_config: ClientConfig,
    /// Options after overrides and harness wiring were applied.
    pub options: S::Options,
    /// Runtime configuration the run loop was started with.
    pub config: Arc<S::Config>,
    service: Arc<S>,
    tmp_dir: PathBuf,
    secure_port: Option<u16>,
    teardown: Teardown,
}

impl<S: TestService> TestServer<S> {
    /// Temporary directory owned by this server. Removed on teardown.
    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    /// Port the service was handed, when secure serving was enabled.
    pub fn port(&self) -> Option<u16> {
        self.secure_port
    }

    /// The service instance whose run loop is executing.
    pub fn service(&self) -> &S {
        &self.service
    }

    /// Stop the service, wait for it to exit and remove the temp dir.
    pub fn tear_down(self) {
        self.teardown.run();
    }
}

impl<S: TestService> fmt::Debug for TestServer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestServer")
            .field("client_config", &self.client_config)
            .field("options", &self.options)
            .field("config", &self.config)
            .field("tmp_dir", &self.tmp_dir)
            .field("secure_port", &self.secure_port)
            .finish_non_exhaustive()
    }
}

/// Start `service` in-process and wait until its liveness endpoint answers
/// 200.
///
/// On error every resource of the launch has already been released; the
/// caller only has cleanup to do when this returns `Ok`.
pub fn start_test_server<S, I, T>(
    service: S,
    harness: &HarnessConfig,
    overrides: I,
) -> HarnessResult<TestServer<S>>
where
    S: TestService,
    I: IntoIterator<Item = T>,
    T: Into<String>,
{
    let request = LaunchRequest::new(overrides);
    launch(service, harness, &request).inspect_err(|err| {
        harness.log.debug(format_args!(
            "launch of {} failed while {}: {err}",
            S::NAME,
            err.stage()
        ))
    })
}

/// Like [`start_test_server`], but a failed launch fails the calling test.
///
/// # Panics
///
/// Panics with the launch error if the server could not be started.
pub fn start_test_server_or_die<S, I, T>(
    service: S,
    harness: &HarnessConfig,
    overrides: I,
) -> TestServer<S>
where
    S: TestService,
    I: IntoIterator<Item = T>,
    T: Into<String>,
{
    match start_test_server(service, harness, overrides) {
        Ok(server) => server,
        Err(err) => panic!("failed to launch server: {err}"),
    }
}

fn launch<S: TestService>(
    service: S,
    harness: &HarnessConfig,
    request: &LaunchRequest,
) -> HarnessResult<TestServer<S>> {
    let log = harness.log.as_ref();
    // Runs on every early return below.
    let mut teardown = Teardown::new(harness.log.clone(), harness.shutdown_timeout);

    enter(log, LaunchStage::Allocating);
    let tmp_dir = teardown.own_temp_dir(allocate_temp_dir(
        harness.temp_root.as_deref(),
        &harness.temp_dir_prefix,
    )?);

    enter(log, LaunchStage::Configuring);
    let Assembled {
        options,
        config,
        secure_port,
    } = assemble(&service, request, &tmp_dir, log)?;
    let config = Arc::new(config);
    let service = Arc::new(service);

    enter(log, LaunchStage::Starting);
    let running = {
        let service = service.clone();
        let config = config.clone();
        ServiceRunner::start(S::NAME, move |stop| service.run(config, stop))?
    };
    let running = teardown.own_service(running);

    enter(log, LaunchStage::Probing);
    log.info(format_args!(
        "Waiting for {} to be ok...",
        harness.health_path
    ));
    let client_config = service.client_config(&config);
    let health = HealthClient::new(&client_config, &harness.health_path)?;
    wait_ready(&health, running, &harness.poll, log)?;

    enter(log, LaunchStage::Ready);
    Ok(TestServer {
        client_config,
        options,
        config,
        service,
        tmp_dir,
        secure_port,
        teardown,
    })
}

fn enter(log: &dyn HarnessLog, stage: LaunchStage) {
    log.debug(format_args!("test server launch: {stage}"));
}

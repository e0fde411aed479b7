//! Utilities for running a network service in-process for the duration of a
//! test: allocate a port and a temp dir, start the service's blocking run
//! loop on its own thread, wait for its liveness endpoint to answer 200 and
//! tear everything down again in order.
//!
//! Typical usage:
//! ```no_run
//! use std::sync::Arc;
//!
//! use clap::Parser;
//! use test_server_harness::{
//!     start_test_server_or_die, ClientConfig, HarnessConfig, SecureServingOptions, StopSignal,
//!     TestService,
//! };
//!
//! #[derive(Debug, Parser)]
//! struct Options {
//!     #[command(flatten)]
//!     secure_serving: SecureServingOptions,
//! }
//!
//! #[derive(Debug)]
//! struct Config {
//!     port: u16,
//! }
//!
//! struct MyService;
//!
//! impl TestService for MyService {
//!     type Options = Options;
//!     type Config = Config;
//!     const NAME: &'static str = "my-service";
//!
//!     fn secure_serving<'a>(&self, o: &'a mut Options) -> Option<&'a mut SecureServingOptions> {
//!         Some(&mut o.secure_serving)
//!     }
//!
//!     fn config(&self, o: &mut Options) -> anyhow::Result<Config> {
//!         Ok(Config { port: o.secure_serving.bind_port })
//!     }
//!
//!     fn client_config(&self, c: &Config) -> ClientConfig {
//!         ClientConfig::new(format!("https://127.0.0.1:{}", c.port)).with_insecure(true)
//!     }
//!
//!     fn run(&self, _config: Arc<Config>, stop: StopSignal) -> anyhow::Result<()> {
//!         stop.wait();
//!         Ok(())
//!     }
//! }
//!
//! let server = start_test_server_or_die(MyService, &HarnessConfig::default(), ["--v=2"]);
//! println!("serving from {}", server.client_config.host);
//! server.tear_down();
//! ```

mod assemble;
mod client;
mod config;
mod error;
mod harness;
mod log;
mod probe;
mod resources;
mod runner;
mod service;
mod teardown;

pub use assemble::{assemble, Assembled, LaunchRequest};
pub use client::{ClientConfig, HealthClient, Liveness, DEFAULT_REQUEST_TIMEOUT};
pub use config::{
    HarnessConfig, SecureServingOptions, DEFAULT_HEALTH_PATH, DEFAULT_SECURE_PORT,
    DEFAULT_TEMP_DIR_PREFIX,
};
pub use error::{HarnessError, HarnessResult};
pub use harness::{start_test_server, start_test_server_or_die, LaunchStage, TestServer};
pub use log::{HarnessLog, LogLevel, NoOpLog, TracingLog};
pub use probe::{
    wait_ready, PollPolicy, ReadinessError, DEFAULT_POLL_INTERVAL, DEFAULT_READY_TIMEOUT,
};
pub use resources::{allocate_port, allocate_temp_dir};
pub use runner::{RunningService, ServiceExit, ServiceRunner, Shutdown};
pub use service::{stop_channel, StopHandle, StopSignal, TestService};
pub use teardown::Teardown;

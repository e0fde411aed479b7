use std::fmt;
use std::net::{IpAddr, Ipv4Addr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::log::{HarnessLog, TracingLog};
use crate::probe::PollPolicy;

/// Secure port a service listens on unless overridden. Any non-zero value
/// asks the harness to swap in a freshly allocated port.
pub const DEFAULT_SECURE_PORT: u16 = 10257;
/// Liveness endpoint probed while waiting for readiness.
pub const DEFAULT_HEALTH_PATH: &str = "/healthz";
/// Prefix of the per-launch temporary directory.
pub const DEFAULT_TEMP_DIR_PREFIX: &str = "test-server";

const POLL_INTERVAL_ENV: &str = "TEST_SERVER_POLL_INTERVAL_MS";
const READY_TIMEOUT_ENV: &str = "TEST_SERVER_READY_TIMEOUT_MS";
const SHUTDOWN_TIMEOUT_ENV: &str = "TEST_SERVER_SHUTDOWN_TIMEOUT_MS";

/// Secure serving flags, meant to be flattened into a service's options.
#[derive(Debug, clap::Args)]
pub struct SecureServingOptions {
    /// Address to serve on.
    #[arg(long = "bind-address", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind_address: IpAddr,
    /// Port to serve HTTPS on. 0 disables secure serving.
    #[arg(long = "secure-port", default_value_t = DEFAULT_SECURE_PORT)]
    pub bind_port: u16,
    /// Directory holding serving certificates.
    #[arg(long = "cert-dir")]
    pub cert_directory: Option<PathBuf>,
    /// Pre-bound socket the service should adopt instead of binding itself.
    #[arg(skip)]
    pub listener: Option<TcpListener>,
}

impl SecureServingOptions {
    pub fn enabled(&self) -> bool {
        self.bind_port != 0
    }
}

/// Harness-level settings for a launch.
#[derive(Clone)]
pub struct HarnessConfig {
    /// Prefix of the temporary directory name.
    pub temp_dir_prefix: String,
    /// Directory to create the temporary directory in. `None` uses the
    /// system temp root.
    pub temp_root: Option<PathBuf>,
    /// Path of the liveness endpoint.
    pub health_path: String,
    /// Readiness poll cadence and deadline.
    pub poll: PollPolicy,
    /// Upper bound on waiting for the run loop during teardown. `None`
    /// waits for as long as the service takes.
    pub shutdown_timeout: Option<Duration>,
    /// Sink for harness diagnostics.
    pub log: Arc<dyn HarnessLog>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            temp_dir_prefix: DEFAULT_TEMP_DIR_PREFIX.to_string(),
            temp_root: None,
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            poll: PollPolicy::default(),
            shutdown_timeout: None,
            log: Arc::new(TracingLog),
        }
    }
}

impl fmt::Debug for HarnessConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarnessConfig")
            .field("temp_dir_prefix", &self.temp_dir_prefix)
            .field("temp_root", &self.temp_root)
            .field("health_path", &self.health_path)
            .field("poll", &self.poll)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

impl HarnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the temporary directory prefix.
    pub fn with_temp_dir_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.temp_dir_prefix = prefix.into();
        self
    }

    /// Create the temporary directory under `root`.
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    /// Probe a different liveness path.
    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }

    /// Override the delay between readiness attempts.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll.interval = interval;
        self
    }

    /// Override how long to wait for readiness.
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.poll.timeout = timeout;
        self
    }

    /// Bound how long teardown waits for the run loop to return.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Route harness diagnostics to a custom sink.
    pub fn with_log(mut self, log: Arc<dyn HarnessLog>) -> Self {
        self.log = log;
        self
    }

    /// Apply `TEST_SERVER_*_MS` overrides from the environment.
    ///
    /// Unparsable values are reported through the configured log and ignored.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(interval) = self.millis_from(&lookup, POLL_INTERVAL_ENV) {
            self.poll.interval = interval;
        }
        if let Some(timeout) = self.millis_from(&lookup, READY_TIMEOUT_ENV) {
            self.poll.timeout = timeout;
        }
        if let Some(timeout) = self.millis_from(&lookup, SHUTDOWN_TIMEOUT_ENV) {
            self.shutdown_timeout = Some(timeout);
        }
        self
    }

    fn millis_from(
        &self,
        lookup: &impl Fn(&str) -> Option<String>,
        key: &str,
    ) -> Option<Duration> {
        let raw = lookup(key)?;
        match raw.trim().parse::<u64>() {
            Ok(millis) => Some(Duration::from_millis(millis)),
            Err(err) => {
                self.log
                    .warn(format_args!("ignoring {key}={raw:?}: {err}"));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::NoOpLog;
    use clap::Parser;
    use std::collections::HashMap;

    #[derive(Debug, Parser)]
    struct Flags {
        #[command(flatten)]
        secure_serving: SecureServingOptions,
    }

    #[test]
    fn secure_serving_defaults_request_a_port() {
        let flags = Flags::try_parse_from(["svc"]).expect("defaults parse");
        assert_eq!(flags.secure_serving.bind_port, DEFAULT_SECURE_PORT);
        assert!(flags.secure_serving.enabled());
        assert!(flags.secure_serving.bind_address.is_unspecified());
        assert!(flags.secure_serving.listener.is_none());
    }

    #[test]
    fn secure_port_zero_disables_secure_serving() {
        let flags = Flags::try_parse_from(["svc", "--secure-port=0", "--cert-dir", "/tmp/certs"])
            .expect("flags parse");
        assert!(!flags.secure_serving.enabled());
        assert_eq!(
            flags.secure_serving.cert_directory,
            Some(PathBuf::from("/tmp/certs"))
        );
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = HarnessConfig::new()
            .with_temp_dir_prefix("kcm")
            .with_health_path("/livez")
            .with_poll_interval(Duration::from_millis(5))
            .with_ready_timeout(Duration::from_secs(2))
            .with_shutdown_timeout(Duration::from_secs(3));

        assert_eq!(config.temp_dir_prefix, "kcm");
        assert_eq!(config.health_path, "/livez");
        assert_eq!(config.poll.interval, Duration::from_millis(5));
        assert_eq!(config.poll.timeout, Duration::from_secs(2));
        assert_eq!(config.shutdown_timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn defaults_match_fixed_policy() {
        let config = HarnessConfig::default();
        assert_eq!(config.poll.interval, Duration::from_millis(100));
        assert_eq!(config.poll.timeout, Duration::from_secs(30));
        assert_eq!(config.health_path, DEFAULT_HEALTH_PATH);
        assert!(config.shutdown_timeout.is_none());
        assert!(format!("{config:?}").contains("HarnessConfig"));
    }

    #[test]
    fn env_style_overrides_skip_garbage() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (POLL_INTERVAL_ENV, "25"),
            (READY_TIMEOUT_ENV, "soon"),
            (SHUTDOWN_TIMEOUT_ENV, " 1500 "),
        ]);
        let config = HarnessConfig::new()
            .with_log(Arc::new(NoOpLog))
            .with_overrides_from(|key| vars.get(key).map(|value| value.to_string()));

        assert_eq!(config.poll.interval, Duration::from_millis(25));
        assert_eq!(config.poll.timeout, Duration::from_secs(30));
        assert_eq!(config.shutdown_timeout, Some(Duration::from_millis(1500)));
    }
}

use std::ffi::OsString;
use std::fmt;
use std::path::Path;

use clap::Parser;

use crate::error::{HarnessError, HarnessResult};
use crate::log::HarnessLog;
use crate::resources::allocate_port;
use crate::service::TestService;

/// Ordered configuration overrides for one launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchRequest {
    overrides: Vec<String>,
}

impl LaunchRequest {
    pub fn new<I, T>(overrides: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            overrides: overrides.into_iter().map(Into::into).collect(),
        }
    }

    pub fn overrides(&self) -> &[String] {
        &self.overrides
    }
}

/// Options and configuration resolved for a launch.
pub struct Assembled<S: TestService> {
    pub options: S::Options,
    pub config: S::Config,
    /// Port handed to the service, when secure serving was requested.
    pub secure_port: Option<u16>,
}

impl<S: TestService> fmt::Debug for Assembled<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assembled")
            .field("options", &self.options)
            .field("config", &self.config)
            .field("secure_port", &self.secure_port)
            .finish()
    }
}

/// Parse the overrides, wire in a free port and the certificate directory
/// when secure serving is requested, then derive the runtime config.
pub fn assemble<S: TestService>(
    service: &S,
    request: &LaunchRequest,
    temp_dir: &Path,
    log: &dyn HarnessLog,
) -> HarnessResult<Assembled<S>> {
    let args = std::iter::once(OsString::from(S::NAME))
        .chain(request.overrides().iter().map(OsString::from));
    let mut options = S::Options::try_parse_from(args)
        .map_err(|err| HarnessError::configuration("parse flags", err))?;

    let mut secure_port = None;
    if let Some(serving) = service.secure_serving(&mut options) {
        if serving.enabled() {
            let (listener, port) = allocate_port()?;
            serving.listener = Some(listener);
            serving.bind_port = port;
            serving.cert_directory = Some(temp_dir.to_path_buf());
            secure_port = Some(port);
            log.info(format_args!(
                "{} will listen securely on port {port}...",
                S::NAME
            ));
        }
    }

    let config = service
        .config(&mut options)
        .map_err(|err| HarnessError::configuration("create config from options", err))?;

    Ok(Assembled {
        options,
        config,
        secure_port,
    })
}

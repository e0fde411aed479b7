use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::harness::LaunchStage;
use crate::runner::ServiceExit;

/// Result alias for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Errors that can occur while launching a test server.
///
/// Every variant is produced after the harness has already released the
/// resources of the failed launch.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to create temp dir: {0}")]
    Filesystem(#[source] io::Error),
    #[error("failed to create listener: {0}")]
    ResourceExhaustion(#[source] io::Error),
    #[error("failed to {context}: {source:#}")]
    Configuration {
        context: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to spawn service thread: {0}")]
    ServiceSpawn(#[source] io::Error),
    #[error("failed to create a client: {0:#}")]
    ClientConstruction(#[source] anyhow::Error),
    #[error("service exited before becoming ready: {0}")]
    ServiceStartFailed(#[source] ServiceExit),
    #[error("service did not report healthy within {0:?}")]
    ReadinessTimeout(Duration),
}

impl HarnessError {
    pub(crate) fn configuration(context: &'static str, source: impl Into<anyhow::Error>) -> Self {
        HarnessError::Configuration {
            context,
            source: source.into(),
        }
    }

    pub(crate) fn client(source: impl Into<anyhow::Error>) -> Self {
        HarnessError::ClientConstruction(source.into())
    }

    /// Launch stage the failure was raised from.
    pub fn stage(&self) -> LaunchStage {
        match self {
            HarnessError::Filesystem(_) | HarnessError::ResourceExhaustion(_) => {
                LaunchStage::Allocating
            }
            HarnessError::Configuration { .. } => LaunchStage::Configuring,
            HarnessError::ServiceSpawn(_) => LaunchStage::Starting,
            HarnessError::ClientConstruction(_)
            | HarnessError::ServiceStartFailed(_)
            | HarnessError::ReadinessTimeout(_) => LaunchStage::Probing,
        }
    }
}

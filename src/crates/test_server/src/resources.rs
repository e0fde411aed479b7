//! Per-launch ephemeral resources: a pre-bound TCP listener and a private
//! temporary directory.

use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::path::Path;

use tempfile::{Builder, TempDir};

use crate::error::{HarnessError, HarnessResult};

/// Bind an OS-assigned port on the wildcard address.
///
/// The listener is returned live so the port cannot be taken by anyone
/// else before the service adopts it.
pub fn allocate_port() -> HarnessResult<(TcpListener, u16)> {
    let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
        .map_err(HarnessError::ResourceExhaustion)?;
    let port = listener
        .local_addr()
        .map_err(HarnessError::ResourceExhaustion)?
        .port();
    Ok((listener, port))
}

/// Create a uniquely named directory, under `root` when given and under the
/// system temp root otherwise.
pub fn allocate_temp_dir(root: Option<&Path>, prefix: &str) -> HarnessResult<TempDir> {
    let mut builder = Builder::new();
    builder.prefix(prefix);
    let dir = match root {
        Some(root) => builder.tempdir_in(root),
        None => builder.tempdir(),
    };
    dir.map_err(HarnessError::Filesystem)
}

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Failures that stop the relay itself
///
/// Per-connection trouble never shows up here; it is reported as
/// [`Disconnected`](crate::connection::Disconnected) and only ends the
/// session it happened on.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

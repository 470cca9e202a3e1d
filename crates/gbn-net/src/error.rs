use gbn_abstract::ConfigError;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to write output: {0}")]
    Output(#[source] io::Error),
    #[error("{resource} not complete after {elapsed:?} ({received} byte(s) received)")]
    DeadlineExceeded {
        resource: String,
        elapsed: Duration,
        received: u64,
    },
}

/// Errors a UDP socket reports after an ICMP port unreachable.
pub(crate) fn is_transport_reset(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
    )
}

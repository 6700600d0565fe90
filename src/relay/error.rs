use std::{io, net::SocketAddr};

use thiserror::Error;
use tokio::task::JoinError;

use super::net::ConnectionId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("couldn't bind listener to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("write to connection {0} timed out")]
    WriteTimedOut(ConnectionId),
    #[error("invalid relay configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("relay task failed: {0}")]
    Join(#[from] JoinError),
}

use std::{fmt, net::SocketAddr};

use tokio::net::TcpStream;

pub mod acceptor;
pub mod reader;
pub mod wire;

/// Identity of an accepted connection. Assigned in accept order and never
/// reused while the relay runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A freshly accepted stream on its way to the coordinator.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub peer_addr: SocketAddr,
    pub stream: TcpStream,
}

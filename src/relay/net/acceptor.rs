use std::{io, net::SocketAddr, time::Duration};

use tokio::{
    net::TcpListener,
    select,
    sync::{mpsc, watch},
};
use tracing::{debug, debug_span, warn, Instrument};

use super::{Connection, ConnectionId};
use crate::relay::error::Error;

/// Owns the listening socket and hands every accepted stream to the
/// coordinator.
pub struct Acceptor {
    listener: TcpListener,
    nodelay: bool,
    retry_delay: Duration,
    next_id: u64,
}

impl Acceptor {
    /// Binds the listening socket. Failing to bind is fatal for the relay, so
    /// the error is returned rather than retried.
    pub async fn bind(
        addr: SocketAddr,
        nodelay: bool,
        retry_delay: Duration,
    ) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        Ok(Self {
            listener,
            nodelay,
            retry_delay,
            next_id: 0,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until shutdown is signalled or the coordinator
    /// stops listening. This should be spawned in a dedicated task.
    pub async fn run(
        mut self,
        new_connections_tx: mpsc::Sender<Connection>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let local_addr = self.listener.local_addr().ok();
        let span = debug_span!("acceptor", addr = ?local_addr);
        async move {
            debug!("acceptor started");
            loop {
                let accepted = select! {
                    accepted = self.listener.accept() => accepted,
                    _ = shutdown.changed() => break,
                };
                let (stream, peer_addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("accept failed, retrying: {}", e);
                        tokio::time::sleep(self.retry_delay).await;
                        continue;
                    }
                };
                if self.nodelay {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(
                            "couldn't set TCP_NODELAY for {}: {}",
                            peer_addr, e
                        );
                    }
                }
                let id = ConnectionId(self.next_id);
                self.next_id += 1;
                debug!("accepted connection {} from {}", id, peer_addr);
                let conn = Connection {
                    id,
                    peer_addr,
                    stream,
                };
                // a full queue parks us here until the coordinator catches up
                let sent = select! {
                    sent = new_connections_tx.send(conn) => sent,
                    _ = shutdown.changed() => break,
                };
                if sent.is_err() {
                    debug!("coordinator is gone");
                    break;
                }
            }
            debug!("acceptor stopped");
        }
        .instrument(span)
        .await
    }
}

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use hashbrown::HashMap;
use rand::{rngs::StdRng, seq::IteratorRandom, SeedableRng};
use tokio::{
    io::AsyncWriteExt,
    net::tcp::OwnedWriteHalf,
    select,
    sync::{mpsc, watch},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, debug_span, trace, Instrument};

use super::{
    config::{Delivery, RelayConfig},
    error::Error,
    net::{
        reader::{read_messages, ReaderEvent},
        wire::{self, Message},
        Connection, ConnectionId,
    },
    stats::ThroughputCounter,
};

/// A live member of the connection set: the write half of its stream and
/// the task reading the other half.
struct Peer {
    id: ConnectionId,
    addr: SocketAddr,
    writer: OwnedWriteHalf,
    reader: JoinHandle<()>,
}

impl Peer {
    /// One bounded attempt at writing a whole line.
    async fn send(
        &mut self,
        line: &[u8],
        limit: Duration,
    ) -> Result<(), Error> {
        timeout(limit, self.writer.write_all(line))
            .await
            .map_err(|_| Error::WriteTimedOut(self.id))??;
        Ok(())
    }

    async fn close(mut self) {
        self.reader.abort();
        if let Err(e) = self.writer.shutdown().await {
            trace!("shutdown of connection {} failed: {}", self.id, e);
        }
    }
}

/// The only owner of the connection set. Registrations, removals and
/// deliveries are all serialized through its event loop, so the set needs no
/// lock.
pub struct Coordinator {
    peers: HashMap<ConnectionId, Peer>,
    delivery: Delivery,
    echo_to_sender: bool,
    announce: bool,
    read_buffer_size: usize,
    queue_capacity: usize,
    write_timeout: Duration,
    counter: ThroughputCounter,
    live: Arc<AtomicUsize>,
    rng: StdRng,
}

impl Coordinator {
    pub fn new(
        config: &RelayConfig,
        counter: ThroughputCounter,
        live: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            peers: HashMap::new(),
            delivery: config.delivery,
            echo_to_sender: config.echo_to_sender,
            announce: config.announce,
            read_buffer_size: config.read_buffer_size,
            queue_capacity: config.queue_capacity,
            write_timeout: config.write_timeout,
            counter,
            live,
            rng: StdRng::from_entropy(),
        }
    }

    /// Runs the event loop until shutdown is signalled. Shutdown is also
    /// assumed once the signalling side has been dropped.
    pub async fn run(
        mut self,
        mut new_connections_rx: mpsc::Receiver<Connection>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let span = debug_span!("coordinator", delivery = ?self.delivery);
        async move {
            debug!("coordinator started");
            // we keep a sender ourselves, so this queue never closes
            let (events_tx, mut events_rx) = mpsc::channel(self.queue_capacity);
            loop {
                select! {
                    Some(conn) = new_connections_rx.recv() => {
                        self.register(conn, &events_tx).await;
                    }
                    Some(event) = events_rx.recv() => match event {
                        ReaderEvent::Message(msg) => self.deliver(msg).await,
                        ReaderEvent::Closed(id) => self.remove(id).await,
                    },
                    _ = shutdown.changed() => break,
                }
            }
            self.shutdown().await;
            debug!("coordinator stopped");
        }
        .instrument(span)
        .await
    }

    async fn register(
        &mut self,
        conn: Connection,
        events_tx: &mpsc::Sender<ReaderEvent>,
    ) {
        let Connection {
            id,
            peer_addr,
            stream,
        } = conn;
        let (read_half, writer) = stream.into_split();
        let reader = tokio::spawn(read_messages(
            id,
            read_half,
            self.read_buffer_size,
            events_tx.clone(),
        ));
        let peer = Peer {
            id,
            addr: peer_addr,
            writer,
            reader,
        };
        let stale = self.peers.insert(id, peer);
        debug_assert!(stale.is_none(), "connection {} registered twice", id);
        self.live.store(self.peers.len(), Ordering::Relaxed);
        debug!("registered connection {} from {}", id, peer_addr);

        if self.announce {
            self.broadcast(&wire::joined_notice(id), None).await;
        }
    }

    /// Drops a connection whose reader has exited. Later events for the same
    /// id are ignored.
    async fn remove(&mut self, id: ConnectionId) {
        let Some(peer) = self.peers.remove(&id) else {
            trace!("connection {} already removed", id);
            return;
        };
        self.live.store(self.peers.len(), Ordering::Relaxed);
        debug!("removed connection {} from {}", id, peer.addr);
        peer.close().await;

        if self.announce {
            self.broadcast(&wire::exited_notice(id), None).await;
        }
    }

    async fn deliver(&mut self, msg: Message) {
        let line = if self.announce {
            msg.encode_announced()
        } else {
            msg.encode()
        };
        let skip = (!self.echo_to_sender).then_some(msg.origin());
        let delivered = match self.delivery {
            Delivery::Broadcast => self.broadcast(&line, skip).await,
            Delivery::Relay => self.relay(&line, skip).await,
        };
        trace!("message from {} delivered {} times", msg.origin(), delivered);
    }

    /// Writes `line` to every peer except `skip`. Returns the number of
    /// successful writes.
    async fn broadcast(
        &mut self,
        line: &[u8],
        skip: Option<ConnectionId>,
    ) -> usize {
        let mut delivered = 0;
        for (id, peer) in self.peers.iter_mut() {
            if Some(*id) == skip {
                continue;
            }
            match peer.send(line, self.write_timeout).await {
                Ok(()) => {
                    self.counter.record();
                    delivered += 1;
                }
                // the reader will notice a dead socket and report it
                Err(e) => debug!("write to connection {} failed: {}", id, e),
            }
        }
        delivered
    }

    /// Writes `line` to a single uniformly chosen peer other than `skip`.
    async fn relay(
        &mut self,
        line: &[u8],
        skip: Option<ConnectionId>,
    ) -> usize {
        let chosen = self
            .peers
            .iter_mut()
            .filter(|(id, _)| Some(**id) != skip)
            .choose(&mut self.rng);
        let Some((id, peer)) = chosen else {
            trace!("no recipient for message");
            return 0;
        };
        match peer.send(line, self.write_timeout).await {
            Ok(()) => {
                self.counter.record();
                1
            }
            Err(e) => {
                debug!("write to connection {} failed: {}", id, e);
                0
            }
        }
    }

    async fn shutdown(&mut self) {
        if self.announce {
            self.broadcast(&wire::line(wire::SERVER_EXITED), None).await;
        }
        let peers: Vec<Peer> =
            self.peers.drain().map(|(_, peer)| peer).collect();
        self.live.store(0, Ordering::Relaxed);
        debug!("closing {} connections", peers.len());
        for peer in peers {
            peer.close().await;
        }
    }
}

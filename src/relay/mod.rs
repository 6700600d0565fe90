// A relay is four kinds of task wired together by two bounded queues. The
// acceptor owns the listening socket and pushes every accepted stream onto
// the new-connection queue. The coordinator is the only task that ever
// touches the connection set: it registers new streams, spawns a reader for
// each, and writes every message that comes back through the outbound queue
// to its recipients. Readers report their own exit through that same outbound
// queue, so removal from the set happens in exactly one place. Both queues
// are deliberately small; a reader stalls while the coordinator is busy
// writing, and that stall is the back-pressure.
//
// The only state shared outside the coordinator is the throughput counter,
// an atomic word that the stats reporter swaps to zero once per interval.
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use futures::future::join_all;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::debug;

pub mod config;
mod coordinator;
pub mod error;
pub mod net;
pub mod stats;

use self::{
    config::RelayConfig,
    coordinator::Coordinator,
    error::Error,
    net::acceptor::Acceptor,
    stats::{Report, StatsReporter, ThroughputCounter},
};

/// Number of reports buffered for a slow consumer before new ones are
/// dropped.
const REPORT_BACKLOG: usize = 16;

/// A relay with its listening socket bound but no tasks running yet.
pub struct Relay {
    config: RelayConfig,
    acceptor: Acceptor,
    local_addr: SocketAddr,
}

impl Relay {
    /// Validates `config` and binds the listening socket. Any error here
    /// means the relay can't start.
    pub async fn bind(config: RelayConfig) -> Result<Self, Error> {
        config.validate()?;
        let acceptor = Acceptor::bind(
            config.listen_addr,
            config.nodelay,
            config.accept_retry_delay,
        )
        .await?;
        let local_addr = acceptor.local_addr()?;
        Ok(Self {
            config,
            acceptor,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawns the acceptor, the coordinator and, if reporting is enabled, the
    /// stats reporter.
    pub fn start(self) -> RelayHandle {
        let Relay {
            config,
            acceptor,
            local_addr,
        } = self;
        let counter = ThroughputCounter::new();
        let live = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (new_connections_tx, new_connections_rx) =
            mpsc::channel(config.queue_capacity);

        let coordinator =
            Coordinator::new(&config, counter.clone(), live.clone());
        let coordinator = tokio::spawn(
            coordinator.run(new_connections_rx, shutdown_rx.clone()),
        );
        let mut background = vec![tokio::spawn(
            acceptor.run(new_connections_tx, shutdown_rx.clone()),
        )];

        let reports = config.report_interval.map(|interval| {
            let (reports_tx, reports_rx) = mpsc::channel(REPORT_BACKLOG);
            let reporter =
                StatsReporter::new(counter.clone(), interval, reports_tx);
            background.push(tokio::spawn(reporter.run(shutdown_rx)));
            reports_rx
        });
        debug!("relay listening on {}", local_addr);

        RelayHandle {
            local_addr,
            counter,
            live,
            reports,
            shutdown_tx,
            coordinator,
            background,
        }
    }
}

/// Controls a running relay. Dropping the handle shuts the relay down without
/// waiting for it.
pub struct RelayHandle {
    local_addr: SocketAddr,
    counter: ThroughputCounter,
    live: Arc<AtomicUsize>,
    reports: Option<mpsc::Receiver<Report>>,
    shutdown_tx: watch::Sender<bool>,
    coordinator: JoinHandle<()>,
    background: Vec<JoinHandle<()>>,
}

impl RelayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Another handle to the counter of successful writes.
    pub fn throughput(&self) -> ThroughputCounter {
        self.counter.clone()
    }

    /// Size of the connection set as of the coordinator's last change to it.
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Takes the stream of throughput reports. Returns `None` if reporting is
    /// disabled or the stream was already taken.
    pub fn reports(&mut self) -> Option<mpsc::Receiver<Report>> {
        self.reports.take()
    }

    /// Stops accepting, closes every connection and waits for all relay
    /// tasks to finish.
    pub async fn shutdown(self) -> Result<(), Error> {
        let _ = self.shutdown_tx.send(true);
        self.coordinator.await?;
        for task in join_all(self.background).await {
            task?;
        }
        debug!("relay on {} shut down", self.local_addr);
        Ok(())
    }
}

use std::{net::SocketAddr, time::Duration};

use typed_builder::TypedBuilder;

use super::error::Error;

pub const DEFAULT_PORT: u16 = 8080;
pub const READ_BUFFER_SIZE: usize = 2048;
pub const QUEUE_CAPACITY: usize = 1;
pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(1);
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// How the coordinator picks recipients for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// Every live connection receives the message.
    #[default]
    Broadcast,
    /// Exactly one uniformly random live connection receives the message.
    Relay,
}

/// Runtime settings for a relay. Build with [`RelayConfig::builder`]; every
/// field has a default matching a plain broadcast server on port 8080.
#[derive(Debug, Clone, TypedBuilder)]
pub struct RelayConfig {
    /// Address the acceptor binds to.
    #[builder(default = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)))]
    pub listen_addr: SocketAddr,
    #[builder(default)]
    pub delivery: Delivery,
    /// Whether the sender of a message is a candidate recipient of it.
    #[builder(default = true)]
    pub echo_to_sender: bool,
    /// Prefix messages with their sender and broadcast join, exit and
    /// shutdown notices.
    #[builder(default = false)]
    pub announce: bool,
    /// Enable `TCP_NODELAY` on accepted sockets.
    #[builder(default = true)]
    pub nodelay: bool,
    /// Size of each reader's reusable read buffer. A read never yields more
    /// than this many bytes, so longer lines arrive split.
    #[builder(default = READ_BUFFER_SIZE)]
    pub read_buffer_size: usize,
    /// Capacity of both the new-connection and outbound-message queues.
    #[builder(default = QUEUE_CAPACITY)]
    pub queue_capacity: usize,
    /// Upper bound on a single write to a single recipient.
    #[builder(default = WRITE_TIMEOUT)]
    pub write_timeout: Duration,
    /// Pause before retrying after a failed accept.
    #[builder(default = ACCEPT_RETRY_DELAY)]
    pub accept_retry_delay: Duration,
    /// Throughput reporting period, `None` disables the stats reporter.
    #[builder(default = Some(REPORT_INTERVAL))]
    pub report_interval: Option<Duration>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RelayConfig {
    /// Rejects settings the relay's tasks can't run with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.read_buffer_size == 0 {
            Err(Error::InvalidConfig("read buffer size must be non-zero"))?
        }
        if self.queue_capacity == 0 {
            Err(Error::InvalidConfig("queue capacity must be non-zero"))?
        }
        if self.write_timeout.is_zero() {
            Err(Error::InvalidConfig("write timeout must be non-zero"))?
        }
        if matches!(self.report_interval, Some(interval) if interval.is_zero())
        {
            Err(Error::InvalidConfig("report interval must be non-zero"))?
        }
        Ok(())
    }
}

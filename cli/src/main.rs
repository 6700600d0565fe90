use std::{net::SocketAddr, process::ExitCode, time::Duration};

use clap::{Parser, ValueEnum};
use linecast::{
    relay::{
        config::{READ_BUFFER_SIZE, QUEUE_CAPACITY},
        stats::Report,
    },
    Delivery, Relay, RelayConfig,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    select,
    sync::mpsc,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Relays newline-delimited messages between every connected TCP client.
#[derive(Debug, Parser)]
#[command(name = "linecast")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,
    /// Send each message to every client, or to one random client.
    #[arg(long, value_enum, default_value_t = Mode::Broadcast)]
    mode: Mode,
    /// Don't send messages back to their sender.
    #[arg(long)]
    no_echo: bool,
    /// Prefix messages with the sender and announce joins and exits.
    #[arg(long)]
    announce: bool,
    /// Leave Nagle's algorithm enabled on client sockets.
    #[arg(long)]
    no_nodelay: bool,
    #[arg(long, default_value_t = READ_BUFFER_SIZE)]
    buffer_size: usize,
    #[arg(long, default_value_t = QUEUE_CAPACITY)]
    queue_capacity: usize,
    #[arg(long, default_value_t = 1000)]
    write_timeout_ms: u64,
    /// Throughput report period, 0 disables reports.
    #[arg(long, default_value_t = 1000)]
    report_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Broadcast,
    Relay,
}

impl Args {
    fn config(&self) -> RelayConfig {
        let delivery = match self.mode {
            Mode::Broadcast => Delivery::Broadcast,
            Mode::Relay => Delivery::Relay,
        };
        let report_interval = (self.report_interval_ms > 0)
            .then(|| Duration::from_millis(self.report_interval_ms));
        RelayConfig::builder()
            .listen_addr(self.listen)
            .delivery(delivery)
            .echo_to_sender(!self.no_echo)
            .announce(self.announce)
            .nodelay(!self.no_nodelay)
            .read_buffer_size(self.buffer_size)
            .queue_capacity(self.queue_capacity)
            .write_timeout(Duration::from_millis(self.write_timeout_ms))
            .report_interval(report_interval)
            .build()
    }
}

async fn next_report(
    reports: &mut Option<mpsc::Receiver<Report>>,
) -> Option<Report> {
    match reports {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let relay = match Relay::bind(args.config()).await {
        Ok(relay) => relay,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("listening on {}", relay.local_addr());

    let mut relay = relay.start();
    let mut reports = relay.reports();
    let mut commands = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        select! {
            Some(report) = next_report(&mut reports) => {
                println!(
                    "{} {}",
                    report.at.format("%H:%M:%S"),
                    report.rate.round()
                );
            }
            line = commands.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim_end() == "quit" => break,
                Ok(Some(line)) => {
                    println!("Unknown command \"{}\".", line.trim_end())
                }
                Ok(None) | Err(_) => stdin_open = false,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("closing server");
    if let Err(e) = relay.shutdown().await {
        error!("{}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{
    select,
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, debug_span, trace, Instrument};

/// Shortest elapsed time a rate is normalized against.
pub const MIN_ELAPSED: Duration = Duration::from_millis(1);

/// Count of successful writes, shared between the coordinator and the stats
/// reporter.
///
/// Can be cloned to obtain another handle to the same counter.
#[derive(Debug, Clone, Default)]
pub struct ThroughputCounter(Arc<AtomicU64>);

impl ThroughputCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the count since the previous take and resets it to zero in a
    /// single atomic step.
    pub fn take(&self) -> u64 {
        self.0.swap(0, Ordering::Relaxed)
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// One reporting interval's worth of throughput.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub at: DateTime<Utc>,
    /// Writes counted during the interval.
    pub count: u64,
    /// Time that actually passed since the previous report.
    pub elapsed: Duration,
    /// `count` scaled to the nominal interval.
    pub rate: f64,
}

/// Scales `count` observed over `elapsed` to what it would be over
/// `nominal`, so a late tick doesn't inflate the rate.
pub fn normalized_rate(
    count: u64,
    nominal: Duration,
    elapsed: Duration,
) -> f64 {
    let elapsed = elapsed.max(MIN_ELAPSED);
    count as f64 * nominal.as_secs_f64() / elapsed.as_secs_f64()
}

pub struct StatsReporter {
    counter: ThroughputCounter,
    interval: Duration,
    reports_tx: mpsc::Sender<Report>,
}

impl StatsReporter {
    pub fn new(
        counter: ThroughputCounter,
        interval: Duration,
        reports_tx: mpsc::Sender<Report>,
    ) -> Self {
        Self {
            counter,
            interval,
            reports_tx,
        }
    }

    /// Emits a report every interval until shutdown is signalled or the
    /// receiving side goes away.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let span = debug_span!("stats", interval = ?self.interval);
        async move {
            let mut last = Instant::now();
            let mut ticker =
                time::interval_at(last + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                let now = Instant::now();
                let elapsed = now - last;
                last = now;
                let count = self.counter.take();
                let report = Report {
                    at: Utc::now(),
                    count,
                    elapsed,
                    rate: normalized_rate(count, self.interval, elapsed),
                };
                trace!(
                    "{} writes in {:?}, {:.1}/interval",
                    count,
                    elapsed,
                    report.rate
                );
                match self.reports_tx.try_send(report) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        trace!("report dropped, consumer is behind")
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
            debug!("stats reporter stopped");
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_is_scaled_to_the_nominal_interval() {
        let second = Duration::from_secs(1);
        assert_eq!(normalized_rate(100, second, second), 100.0);
        assert_eq!(normalized_rate(100, second, Duration::from_secs(2)), 50.0);
        let half = Duration::from_millis(500);
        assert_eq!(normalized_rate(100, second, half), 200.0);
        let slow = Duration::from_millis(1200);
        assert_eq!(normalized_rate(0, second, slow), 0.0);
    }

    #[test]
    fn tiny_elapsed_is_clamped() {
        let second = Duration::from_secs(1);
        assert_eq!(normalized_rate(1, second, Duration::ZERO), 1000.0);
        let tiny = Duration::from_nanos(10);
        assert_eq!(normalized_rate(1, second, tiny), 1000.0);
    }

    #[test]
    fn take_resets() {
        let counter = ThroughputCounter::new();
        counter.record();
        counter.record();
        assert_eq!(counter.get(), 2);
        assert_eq!(counter.take(), 2);
        assert_eq!(counter.take(), 0);
    }

    #[test]
    fn concurrent_takes_lose_nothing() {
        const WRITERS: u64 = 4;
        const PER_WRITER: u64 = 50_000;

        let counter = ThroughputCounter::new();
        let writers: Vec<_> = (0..WRITERS)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..PER_WRITER {
                        counter.record();
                    }
                })
            })
            .collect();

        let mut taken = 0;
        while writers.iter().any(|w| !w.is_finished()) {
            taken += counter.take();
        }
        for writer in writers {
            writer.join().unwrap();
        }
        taken += counter.take();

        assert_eq!(taken, WRITERS * PER_WRITER);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_each_interval() {
        let counter = ThroughputCounter::new();
        let (tx, mut rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let reporter =
            StatsReporter::new(counter.clone(), Duration::from_secs(1), tx);
        tokio::spawn(reporter.run(shutdown_rx));

        for _ in 0..10 {
            counter.record();
        }
        let report = rx.recv().await.unwrap();
        assert_eq!(report.count, 10);
        assert_eq!(report.elapsed, Duration::from_secs(1));
        assert!((report.rate - 10.0).abs() < 1e-9);

        let report = rx.recv().await.unwrap();
        assert_eq!(report.count, 0);
        assert_eq!(counter.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_consumer_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let reporter = StatsReporter::new(
            ThroughputCounter::new(),
            Duration::from_secs(1),
            tx,
        );
        let task = tokio::spawn(reporter.run(shutdown_rx));

        drop(rx);
        task.await.unwrap();
    }
}

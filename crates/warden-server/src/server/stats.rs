//! Per-method and per-consumer call counters.
//!
//! The interceptor chain bumps both counters for every authorized call.
//! `Admin.Statistics` streams read them through [`StatsAggregator::subscribe`],
//! which spawns one ticker task per stream. Each tick takes a deep copy of the
//! counters under the lock, so a snapshot handed to a client is never touched
//! again by writers.

use crate::server::telemetry::{decrement_stats_streams, increment_stats_streams};
use core::time::Duration;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use warden_core::{
    Error, Result,
    types::{Snapshot, unix_timestamp},
};

/// Infinite stream of snapshots, one per tick. Ends on shutdown.
pub type SnapshotStream = ReceiverStream<Snapshot>;

/// Longest accepted period between two snapshots.
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Default)]
struct Counters {
    by_method: HashMap<String, u64>,
    by_consumer: HashMap<String, u64>,
}

/// Running call totals since process start.
#[derive(Clone)]
pub struct StatsAggregator {
    counters: Arc<Mutex<Counters>>,
    buffer_size: usize,
    shutdown_token: CancellationToken,
}

impl StatsAggregator {
    /// `buffer_size` bounds the snapshots queued per stream; ticks that find
    /// the queue full are skipped.
    pub fn new(buffer_size: usize, shutdown_token: CancellationToken) -> Self {
        Self {
            counters: Arc::new(Mutex::new(Counters::default())),
            buffer_size: buffer_size.max(1),
            shutdown_token,
        }
    }

    /// Records one authorized call.
    pub fn increment(&self, method: &str, consumer: &str) {
        let mut counters = self.counters.lock();
        *counters.by_method.entry(method.to_string()).or_default() += 1;
        *counters.by_consumer.entry(consumer.to_string()).or_default() += 1;
    }

    pub fn snapshot(&self) -> Snapshot {
        let counters = self.counters.lock();
        Snapshot {
            timestamp: unix_timestamp(),
            by_method: counters.by_method.clone(),
            by_consumer: counters.by_consumer.clone(),
        }
    }

    /// Starts a snapshot stream ticking every `interval`. The first snapshot
    /// is taken one full interval after subscribing.
    ///
    /// The ticker stops when the stream is dropped or the service shuts down.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if `interval` is zero or longer than
    ///   [`MAX_INTERVAL`].
    /// - [`Error::ServiceShutdown`] if the service is shutting down.
    pub fn subscribe(&self, interval: Duration) -> Result<SnapshotStream> {
        if interval.is_zero() {
            return Err(Error::InvalidRequest {
                reason: "Interval must be greater than 0".to_string(),
            });
        }

        if interval > MAX_INTERVAL {
            return Err(Error::InvalidRequest {
                reason: format!(
                    "Interval {}s exceeds maximum allowed ({}s)",
                    interval.as_secs(),
                    MAX_INTERVAL.as_secs()
                ),
            });
        }

        if self.shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }

        let (tx, rx) = mpsc::channel(self.buffer_size);
        tokio::spawn(ticker_loop(self.clone(), interval, tx));

        Ok(ReceiverStream::new(rx))
    }
}

async fn ticker_loop(stats: StatsAggregator, interval: Duration, tx: mpsc::Sender<Snapshot>) {
    increment_stats_streams();
    #[cfg(feature = "tracing")]
    tracing::debug!("Statistics stream started (every {interval:?})");

    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = stats.shutdown_token.cancelled() => break,
            () = tx.closed() => break,
            _ = ticker.tick() => match tx.try_send(stats.snapshot()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Snapshots are cumulative; the next one supersedes this.
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Statistics client is slow; skipping tick");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            },
        }
    }

    decrement_stats_streams();
    #[cfg(feature = "tracing")]
    tracing::debug!("Statistics stream stopped");
}

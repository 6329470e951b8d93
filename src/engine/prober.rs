use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::probe::ProbeTransport;
use crate::state::{ProbeOutcome, Sample};

/// Extra time granted past the probe timeout before a task is forced to Timeout
pub const TIMEOUT_SLACK: Duration = Duration::from_millis(250);

/// How long `stop` waits for in-flight probes before abandoning them
pub const STOP_GRACE: Duration = Duration::from_secs(1);

/// First sequence number of every session
pub const FIRST_SEQUENCE: u64 = 1;

/// Counters shared between the prober and its readers
#[derive(Debug, Default)]
pub struct ProberStats {
    /// Probes issued so far
    pub sent: AtomicU64,
    /// Ticks dropped because the in-flight limit was reached
    pub skipped: AtomicU64,
    /// Probes abandoned at stop
    pub abandoned: AtomicU64,
}

impl ProberStats {
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.sent.store(0, Ordering::Relaxed);
        self.skipped.store(0, Ordering::Relaxed);
        self.abandoned.store(0, Ordering::Relaxed);
    }
}

/// Why the scheduling loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProberExit {
    /// Cancelled by the owner
    Stopped,
    /// Probe count or session duration reached
    Completed,
}

/// Interval-driven probe scheduler
///
/// Issues one attempt per tick, each on its own task, so a slow reply
/// never delays the next tick. Every issued attempt produces exactly one
/// [`Sample`] on the output channel unless it is abandoned at stop.
pub struct Prober<T: ProbeTransport> {
    transport: Arc<T>,
    config: watch::Receiver<Arc<SessionConfig>>,
    samples: mpsc::Sender<Sample>,
    paused: Arc<AtomicBool>,
    cancel: CancellationToken,
    stats: Arc<ProberStats>,
}

impl<T: ProbeTransport> Prober<T> {
    pub fn new(
        transport: Arc<T>,
        config: watch::Receiver<Arc<SessionConfig>>,
        samples: mpsc::Sender<Sample>,
        paused: Arc<AtomicBool>,
        cancel: CancellationToken,
        stats: Arc<ProberStats>,
    ) -> Self {
        Self {
            transport,
            config,
            samples,
            paused,
            cancel,
            stats,
        }
    }

    /// Run until cancelled or until a count/duration limit is reached
    pub async fn run(mut self) -> ProberExit {
        let started = Instant::now();
        let mut current = self.config.borrow_and_update().clone();
        let mut interval = probe_interval(current.interval, started);
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut sequence = FIRST_SEQUENCE;

        tracing::info!(host = %current.host, interval_ms = current.interval.as_millis() as u64, "prober started");

        let exit = loop {
            // Wall-clock limit, so it also fires while paused
            let deadline = current.duration.and_then(|limit| started.checked_add(limit));

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    break ProberExit::Stopped;
                }
                _ = sleep_until_deadline(deadline) => {
                    break ProberExit::Completed;
                }
                changed = self.config.changed() => {
                    if changed.is_err() {
                        // Controller dropped its sender
                        break ProberExit::Stopped;
                    }
                    let next = self.config.borrow_and_update().clone();
                    if next.interval != current.interval {
                        let now = Instant::now();
                        interval = probe_interval(next.interval, now.checked_add(next.interval).unwrap_or(now));
                    }
                    tracing::info!(host = %next.host, interval_ms = next.interval.as_millis() as u64, "prober reconfigured");
                    current = next;
                }
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    log_join_error(result);
                }
                _ = interval.tick() => {
                    if let Some(limit) = current.duration
                        && started.elapsed() >= limit
                    {
                        break ProberExit::Completed;
                    }

                    if self.paused.load(Ordering::Acquire) {
                        continue;
                    }

                    while let Some(result) = tasks.try_join_next() {
                        log_join_error(result);
                    }
                    if tasks.len() >= current.max_in_flight {
                        let skipped = self.stats.skipped.fetch_add(1, Ordering::Relaxed) + 1;
                        tracing::debug!(in_flight = tasks.len(), skipped, "in-flight limit reached, tick skipped");
                        continue;
                    }

                    self.spawn_probe(&mut tasks, sequence, current.clone());
                    sequence += 1;
                    let sent = self.stats.sent.fetch_add(1, Ordering::Relaxed) + 1;

                    if current.count.is_some_and(|count| sent >= count) {
                        break ProberExit::Completed;
                    }
                }
            }
        };

        self.finish(&mut tasks, exit, current.timeout).await;
        tracing::info!(?exit, sent = self.stats.sent(), skipped = self.stats.skipped(), "prober finished");
        exit
    }

    fn spawn_probe(&self, tasks: &mut JoinSet<()>, sequence: u64, config: Arc<SessionConfig>) {
        let transport = self.transport.clone();
        let samples = self.samples.clone();
        let sent_at = Instant::now();
        let timestamp = Utc::now();

        tasks.spawn(async move {
            let limit = config.timeout + TIMEOUT_SLACK;
            // Separate task so a panicking transport still yields a sample
            let attempt = {
                let config = config.clone();
                tokio::spawn(async move { transport.send(&config.host, config.timeout).await })
            };
            let _guard = AbortOnDrop(attempt.abort_handle());

            let outcome = match tokio::time::timeout(limit, attempt).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => ProbeOutcome::transport_error(format!("probe task failed: {}", e)),
                Err(_) => ProbeOutcome::Timeout,
            };
            // Receiver is gone only after the session has been torn down
            let _ = samples.send(Sample::new(sequence, sent_at, timestamp, outcome)).await;
        });
    }

    /// Let in-flight probes resolve, abandoning them after the stop grace
    ///
    /// A completed session waits for every probe, which the per-task
    /// timeout bounds. A stop (or a stop arriving during that wait) gives
    /// them [`STOP_GRACE`] at most.
    async fn finish(&self, tasks: &mut JoinSet<()>, exit: ProberExit, timeout: Duration) {
        let mut deadline = match exit {
            ProberExit::Stopped => Some(Instant::now() + STOP_GRACE),
            ProberExit::Completed => None,
        };

        while !tasks.is_empty() {
            tokio::select! {
                result = tasks.join_next() => {
                    if let Some(result) = result {
                        log_join_error(result);
                    }
                }
                _ = self.cancel.cancelled(), if deadline.is_none() => {
                    deadline = Some(Instant::now() + STOP_GRACE.min(timeout + TIMEOUT_SLACK));
                }
                _ = sleep_until_deadline(deadline) => {
                    let abandoned = tasks.len() as u64;
                    self.stats.abandoned.fetch_add(abandoned, Ordering::Relaxed);
                    tracing::debug!(abandoned, "abandoning in-flight probes");
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                }
            }
        }
    }
}

/// Aborts the wrapped task when the owning probe is dropped or abandoned
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Resolves at `deadline`, or never when there is none
async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Ticking interval whose first tick fires at `start`
fn probe_interval(period: Duration, start: Instant) -> Interval {
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

fn log_join_error(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result
        && e.is_panic()
    {
        tracing::warn!("probe task panicked: {}", e);
    }
}

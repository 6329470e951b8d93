use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::engine::ingest::SUBSCRIBER_CAPACITY;
use crate::engine::prober::FIRST_SEQUENCE;
use crate::engine::{IngestSinks, Prober, ProberExit, ProberStats, run_ingest};
use crate::error::{Result, SessionError};
use crate::export::SessionExport;
use crate::probe::ProbeTransport;
use crate::state::{AggregateStats, Aggregator, RollingStore, Sample};

/// Capacity of the probe-task to ingest channel
const SAMPLE_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle of a measurement session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    Paused,
    Stopped,
}

/// Cheap, cloneable read access to a session's live data
///
/// Every accessor copies out under a short read lock, so any number of
/// readers can poll on their own cadence without stalling ingestion.
#[derive(Clone)]
pub struct SessionHandle {
    config: Arc<RwLock<Arc<SessionConfig>>>,
    aggregator: Arc<RwLock<Aggregator>>,
    rolling: Arc<RwLock<RollingStore>>,
    started: Arc<RwLock<Option<(Instant, DateTime<Utc>)>>>,
    prober_stats: Arc<ProberStats>,
}

impl SessionHandle {
    fn new(config: SessionConfig) -> Self {
        Self {
            aggregator: Arc::new(RwLock::new(Aggregator::new(config.stats_window))),
            rolling: Arc::new(RwLock::new(RollingStore::new(config.window))),
            config: Arc::new(RwLock::new(Arc::new(config))),
            started: Arc::new(RwLock::new(None)),
            prober_stats: Arc::new(ProberStats::default()),
        }
    }

    /// Configuration currently in effect
    pub fn config(&self) -> Arc<SessionConfig> {
        self.config.read().clone()
    }

    /// Session-wide statistics
    pub fn stats(&self) -> AggregateStats {
        self.aggregator.read().snapshot()
    }

    /// Statistics over the recent stats window
    pub fn window_stats(&self) -> AggregateStats {
        // Same lock order as ingestion: rolling store, then aggregator
        let rolling = self.rolling.read();
        let aggregator = self.aggregator.read();
        aggregator.window_snapshot(&rolling, Instant::now())
    }

    /// Samples inside the rolling window, oldest first
    pub fn samples(&self) -> Vec<Sample> {
        self.rolling.read().snapshot()
    }

    /// Monotonic and wall-clock start of the current session
    pub fn started(&self) -> Option<(Instant, DateTime<Utc>)> {
        *self.started.read()
    }

    /// Ticks skipped because the in-flight limit was reached
    pub fn skipped_ticks(&self) -> u64 {
        self.prober_stats.skipped()
    }

    /// Serializable copy of the session's current data
    pub fn export(&self) -> SessionExport {
        let config = self.config();
        let (start, started_at) = self.started().unwrap_or_else(|| (Instant::now(), Utc::now()));
        let (samples, stats, window_stats) = {
            let rolling = self.rolling.read();
            let aggregator = self.aggregator.read();
            let now = Instant::now();
            (
                rolling.snapshot_at(now),
                aggregator.snapshot(),
                aggregator.window_snapshot(&rolling, now),
            )
        };

        SessionExport {
            host: config.host.clone(),
            started_at,
            exported_at: Utc::now(),
            config: (*config).clone(),
            stats,
            window_stats,
            skipped_ticks: self.skipped_ticks(),
            samples: samples.iter().map(|s| s.to_record(start)).collect(),
        }
    }
}

/// Handles for one running session
struct Run {
    cancel: CancellationToken,
    config_tx: watch::Sender<Arc<SessionConfig>>,
    paused: Arc<AtomicBool>,
    prober: JoinHandle<ProberExit>,
    ingest: JoinHandle<u64>,
}

impl Run {
    fn is_finished(&self) -> bool {
        self.ingest.is_finished()
    }
}

/// Owns the session lifecycle and the prober that feeds it
///
/// One controller runs at most one session at a time; independent
/// controllers never share state. Reads go through [`SessionHandle`].
/// Must be used from within a tokio runtime.
pub struct SessionController<T: ProbeTransport> {
    transport: Arc<T>,
    handle: SessionHandle,
    subscribers: Arc<Mutex<Vec<mpsc::Sender<Sample>>>>,
    state: SessionState,
    run: Option<Run>,
}

impl<T: ProbeTransport> SessionController<T> {
    pub fn new(transport: T) -> Self {
        Self::with_transport(Arc::new(transport))
    }

    pub fn with_transport(transport: Arc<T>) -> Self {
        Self {
            transport,
            handle: SessionHandle::new(SessionConfig::default()),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            state: SessionState::Idle,
            run: None,
        }
    }

    /// Current lifecycle state
    ///
    /// A session that reached its probe count or duration reports
    /// `Stopped` on its own.
    pub fn state(&self) -> SessionState {
        match (&self.run, self.state) {
            (Some(run), SessionState::Running | SessionState::Paused) if run.is_finished() => {
                SessionState::Stopped
            }
            (_, state) => state,
        }
    }

    /// Start a new session, resetting all statistics and samples
    pub fn start(&mut self, config: SessionConfig) -> Result<()> {
        if matches!(self.state(), SessionState::Running | SessionState::Paused) {
            return Err(SessionError::AlreadyRunning);
        }
        config.validate()?;
        // Left over from a session that completed on its own
        self.run = None;

        self.handle.rolling.write().reset(config.window);
        self.handle.aggregator.write().reset(config.stats_window);
        self.handle.prober_stats.reset();
        *self.handle.started.write() = Some((Instant::now(), Utc::now()));

        let config = Arc::new(config);
        *self.handle.config.write() = config.clone();

        let cancel = CancellationToken::new();
        let paused = Arc::new(AtomicBool::new(false));
        let (config_tx, config_rx) = watch::channel(config.clone());
        let (sample_tx, sample_rx) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);

        let prober = Prober::new(
            self.transport.clone(),
            config_rx,
            sample_tx,
            paused.clone(),
            cancel.clone(),
            self.handle.prober_stats.clone(),
        );
        let sinks = IngestSinks {
            aggregator: self.handle.aggregator.clone(),
            rolling: self.handle.rolling.clone(),
            subscribers: self.subscribers.clone(),
        };

        self.run = Some(Run {
            cancel,
            config_tx,
            paused,
            prober: tokio::spawn(prober.run()),
            ingest: tokio::spawn(run_ingest(sample_rx, sinks, FIRST_SEQUENCE)),
        });
        self.state = SessionState::Running;
        tracing::info!(host = %config.host, "session started");
        Ok(())
    }

    /// Suspend probing; statistics and samples are kept
    pub fn pause(&mut self) -> Result<()> {
        let run = self.active_run()?;
        run.paused.store(true, Ordering::Release);
        self.state = SessionState::Paused;
        tracing::info!("session paused");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        let run = self.active_run()?;
        run.paused.store(false, Ordering::Release);
        self.state = SessionState::Running;
        tracing::info!("session resumed");
        Ok(())
    }

    /// Swap the active configuration; effective from the next tick
    ///
    /// Totals already aggregated are kept. Start a new session for a
    /// clean baseline.
    pub fn reconfigure(&mut self, config: SessionConfig) -> Result<()> {
        config.validate()?;
        let run = self.active_run()?;

        let config = Arc::new(config);
        // Prober only exits once the run is finished, which active_run rules out
        let _ = run.config_tx.send(config.clone());

        self.handle.rolling.write().reconfigure_window(config.window);
        self.handle.aggregator.write().set_stats_window(config.stats_window);
        *self.handle.config.write() = config.clone();
        tracing::info!(host = %config.host, "session reconfigured");
        Ok(())
    }

    /// Stop probing and wait for in-flight probes up to the stop grace
    ///
    /// Nothing is ingested after this returns. Also finalizes a session
    /// that already completed on its own.
    pub async fn stop(&mut self) -> Result<ProberExit> {
        let run = self.run.take().ok_or(SessionError::NotRunning)?;
        run.cancel.cancel();

        let exit = match run.prober.await {
            Ok(exit) => exit,
            Err(e) => {
                tracing::warn!("prober task failed: {}", e);
                ProberExit::Stopped
            }
        };
        match run.ingest.await {
            Ok(ingested) => tracing::info!(ingested, ?exit, "session stopped"),
            Err(e) => tracing::warn!("ingest task failed: {}", e),
        }

        self.state = SessionState::Stopped;
        Ok(exit)
    }

    /// Subscribe to every ingested sample, in sequence order
    ///
    /// The channel closes when the session ends. A subscriber that falls
    /// more than its capacity behind misses samples rather than slowing
    /// ingestion.
    pub fn subscribe(&self) -> mpsc::Receiver<Sample> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> Arc<SessionConfig> {
        self.handle.config()
    }

    pub fn stats(&self) -> AggregateStats {
        self.handle.stats()
    }

    pub fn window_stats(&self) -> AggregateStats {
        self.handle.window_stats()
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.handle.samples()
    }

    pub fn export(&self) -> SessionExport {
        self.handle.export()
    }

    /// Run that is still probing (Running or Paused)
    fn active_run(&self) -> Result<&Run> {
        match (&self.run, self.state()) {
            (Some(run), SessionState::Running | SessionState::Paused) => Ok(run),
            _ => Err(SessionError::NotRunning),
        }
    }
}

impl<T: ProbeTransport> Drop for SessionController<T> {
    fn drop(&mut self) {
        if let Some(run) = &self.run {
            run.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::state::ProbeOutcome;
    use std::time::Duration;

    struct Fixed(f64);

    impl ProbeTransport for Fixed {
        async fn send(&self, _target: &str, _timeout: Duration) -> ProbeOutcome {
            tokio::time::sleep(Duration::from_millis(self.0 as u64)).await;
            ProbeOutcome::success(self.0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_errors() {
        let mut controller = SessionController::new(Fixed(10.0));
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(matches!(controller.pause(), Err(SessionError::NotRunning)));
        assert!(matches!(controller.stop().await, Err(SessionError::NotRunning)));

        controller.start(SessionConfig::default()).unwrap();
        assert!(matches!(
            controller.start(SessionConfig::default()),
            Err(SessionError::AlreadyRunning)
        ));
        // Lifecycle misuse wins over a bad config
        let invalid = SessionConfig {
            host: String::new(),
            ..Default::default()
        };
        assert!(matches!(controller.start(invalid), Err(SessionError::AlreadyRunning)));

        controller.pause().unwrap();
        assert_eq!(controller.state(), SessionState::Paused);
        assert!(matches!(
            controller.start(SessionConfig::default()),
            Err(SessionError::AlreadyRunning)
        ));
        controller.resume().unwrap();

        controller.stop().await.unwrap();
        assert_eq!(controller.state(), SessionState::Stopped);
        assert!(matches!(controller.stop().await, Err(SessionError::NotRunning)));
        assert!(matches!(controller.resume(), Err(SessionError::NotRunning)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_names_field() {
        let mut controller = SessionController::new(Fixed(10.0));
        let config = SessionConfig {
            host: "  ".into(),
            ..Default::default()
        };
        let err = controller.start(config).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Config(ConfigError { field: "host", .. })
        ));
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_stops_probing() {
        let mut controller = SessionController::new(Fixed(10.0));
        controller.start(SessionConfig::default()).unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(controller.stats().count, 3);

        controller.pause().unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(controller.stats().count, 3);

        controller.resume().unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(controller.stats().count, 4);
        controller.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_resets_stats() {
        let mut controller = SessionController::new(Fixed(10.0));
        controller.start(SessionConfig::default()).unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        controller.stop().await.unwrap();
        assert_eq!(controller.stats().count, 3);

        controller.start(SessionConfig::default()).unwrap();
        assert_eq!(controller.stats().count, 0);
        assert!(controller.samples().is_empty());
        controller.stop().await.unwrap();
    }
}

//! CTO Monitor - polls DexScreener for community takeovers and announces new ones

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::utils::dexscreener::DataSource;
use crate::utils::formatter::format_event;
use crate::utils::seen_store::{SeenSet, SeenStore, StoreError};
use crate::utils::telegram::Notifier;
use crate::utils::MetricsService;

/// Timing knobs for the pipeline
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub check_interval: Duration,
    pub dispatch_delay: Duration,
}

impl MonitorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            check_interval: config.check_interval,
            dispatch_delay: config.dispatch_delay,
        }
    }
}

/// Where the current run is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PipelineState {
    Idle = 0,
    Fetching = 1,
    Filtering = 2,
    Enriching = 3,
    Dispatching = 4,
    Persisting = 5,
}

impl PipelineState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Fetching,
            2 => Self::Filtering,
            3 => Self::Enriching,
            4 => Self::Dispatching,
            5 => Self::Persisting,
            _ => Self::Idle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Filtering => "filtering",
            Self::Enriching => "enriching",
            Self::Dispatching => "dispatching",
            Self::Persisting => "persisting",
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Upstream returned nothing
    NoEvents,
    /// Upstream failed; handled exactly like [`RunOutcome::NoEvents`]
    FetchFailed,
    /// Events arrived but all were known or invalid
    NothingNew,
    /// At least one event was dispatched
    Dispatched,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoEvents => "no_events",
            Self::FetchFailed => "fetch_failed",
            Self::NothingNew => "nothing_new",
            Self::Dispatched => "dispatched",
        }
    }
}

/// Summary of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub fetched: usize,
    pub skipped_invalid: usize,
    pub already_seen: usize,
    pub notified: usize,
    pub failed_deliveries: usize,
    pub persisted: bool,
}

impl RunReport {
    fn new(outcome: RunOutcome) -> Self {
        Self {
            outcome,
            fetched: 0,
            skipped_invalid: 0,
            already_seen: 0,
            notified: 0,
            failed_deliveries: 0,
            persisted: false,
        }
    }
}

/// Monitor statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStats {
    pub seen_tokens: usize,
    pub runs: u64,
    pub events_fetched: u64,
    pub notifications_sent: u64,
    pub delivery_failures: u64,
    pub fetch_failures: u64,
    pub persist_failures: u64,
    pub uptime_secs: u64,
    pub check_interval_secs: u64,
    pub state: PipelineState,
    pub is_running: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_report: Option<RunReport>,
}

/// CTO Monitor: owns the seen set and runs the fetch/filter/enrich/dispatch cycle
pub struct CtoMonitor {
    settings: MonitorSettings,
    source: Arc<dyn DataSource>,
    notifier: Arc<dyn Notifier>,
    store: Arc<SeenStore>,
    metrics: Arc<MetricsService>,

    seen: Arc<RwLock<SeenSet>>,
    run_guard: Arc<Mutex<()>>,
    state: Arc<AtomicU8>,
    is_running: Arc<AtomicBool>,
    started_at: Instant,
    last_run_at: Arc<RwLock<Option<DateTime<Utc>>>>,
    last_report: Arc<RwLock<Option<RunReport>>>,

    runs: Arc<AtomicU64>,
    events_fetched: Arc<AtomicU64>,
    notifications_sent: Arc<AtomicU64>,
    delivery_failures: Arc<AtomicU64>,
    fetch_failures: Arc<AtomicU64>,
    persist_failures: Arc<AtomicU64>,
}

impl CtoMonitor {
    /// Create a monitor, loading the seen set from `store`
    pub fn new(
        settings: MonitorSettings,
        source: Arc<dyn DataSource>,
        notifier: Arc<dyn Notifier>,
        store: Arc<SeenStore>,
        metrics: Arc<MetricsService>,
    ) -> Self {
        let seen = store.load();
        metrics.seen_tokens.set(seen.len() as i64);

        info!(
            target: "CTO_MONITOR",
            "Loaded {} seen tokens, interval={}s, dispatch_delay={}ms",
            seen.len(),
            settings.check_interval.as_secs(),
            settings.dispatch_delay.as_millis()
        );

        Self {
            settings,
            source,
            notifier,
            store,
            metrics,
            seen: Arc::new(RwLock::new(seen)),
            run_guard: Arc::new(Mutex::new(())),
            state: Arc::new(AtomicU8::new(PipelineState::Idle as u8)),
            is_running: Arc::new(AtomicBool::new(false)),
            started_at: Instant::now(),
            last_run_at: Arc::new(RwLock::new(None)),
            last_report: Arc::new(RwLock::new(None)),
            runs: Arc::new(AtomicU64::new(0)),
            events_fetched: Arc::new(AtomicU64::new(0)),
            notifications_sent: Arc::new(AtomicU64::new(0)),
            delivery_failures: Arc::new(AtomicU64::new(0)),
            fetch_failures: Arc::new(AtomicU64::new(0)),
            persist_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the periodic poller. The first run happens immediately.
    ///
    /// Returns `None` when the poller is already running.
    pub fn start(&self) -> Option<tokio::task::JoinHandle<()>> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!(target: "CTO_MONITOR", "Already running");
            return None;
        }

        let monitor = self.clone();
        Some(tokio::spawn(async move {
            info!(target: "CTO_MONITOR", "🔄 CTO Monitor active - polling every {}s", monitor.settings.check_interval.as_secs());

            let mut timer = tokio::time::interval(monitor.settings.check_interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while monitor.is_running.load(Ordering::SeqCst) {
                timer.tick().await;
                if !monitor.is_running.load(Ordering::SeqCst) {
                    break;
                }
                monitor.tick().await;
            }

            info!(target: "CTO_MONITOR", "CTO Monitor stopped");
        }))
    }

    /// Stop the periodic poller
    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        info!(target: "CTO_MONITOR", "CTO Monitor stopping...");
    }

    /// Stop polling, let an in-flight run finish within `grace`, then save.
    ///
    /// If the run outlives `grace` the current state is saved anyway.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), StoreError> {
        self.stop();
        let guard = match tokio::time::timeout(grace, self.run_guard.clone().lock_owned()).await {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!(
                    target: "CTO_MONITOR",
                    "Run still in progress after {}s, saving current state",
                    grace.as_secs()
                );
                None
            }
        };
        let result = self.persist();
        drop(guard);
        result
    }

    /// Timer entry point: skips when a run is already in flight.
    pub async fn tick(&self) -> Option<RunReport> {
        match self.run_guard.clone().try_lock_owned() {
            Ok(guard) => Some(self.run_locked(guard).await),
            Err(_) => {
                debug!(target: "CTO_MONITOR", "Previous run still in progress, skipping tick");
                None
            }
        }
    }

    /// Manual trigger: waits for any in-flight run, then runs once.
    pub async fn run_once(&self) -> RunReport {
        let guard = self.run_guard.clone().lock_owned().await;
        self.run_locked(guard).await
    }

    async fn run_locked(&self, _guard: tokio::sync::OwnedMutexGuard<()>) -> RunReport {
        let report = self.execute().await;
        self.set_state(PipelineState::Idle);

        self.runs.fetch_add(1, Ordering::SeqCst);
        self.metrics.record_run(report.outcome.as_str());
        *self.last_run_at.write() = Some(Utc::now());
        *self.last_report.write() = Some(report.clone());
        report
    }

    async fn execute(&self) -> RunReport {
        self.set_state(PipelineState::Fetching);
        let batch = match self.source.fetch_latest_events().await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(target: "CTO_MONITOR", "Fetching latest CTO events failed: {}", e);
                self.fetch_failures.fetch_add(1, Ordering::SeqCst);
                return RunReport::new(RunOutcome::FetchFailed);
            }
        };

        if batch.is_empty() {
            debug!(target: "CTO_MONITOR", "No CTO events returned");
            return RunReport::new(RunOutcome::NoEvents);
        }

        let mut report = RunReport::new(RunOutcome::NothingNew);
        report.fetched = batch.events.len() + batch.malformed;
        report.skipped_invalid = batch.malformed;
        self.events_fetched.fetch_add(report.fetched as u64, Ordering::SeqCst);
        self.metrics.events_fetched.inc_by(report.fetched as u64);

        self.set_state(PipelineState::Filtering);
        let mut fresh = Vec::new();
        let mut in_batch = HashSet::new();
        {
            let seen = self.seen.read();
            for event in batch.events {
                let Some(key) = event.identity_key() else {
                    debug!(target: "CTO_MONITOR", "Skipping event without chain/address: {:?}", event.url);
                    report.skipped_invalid += 1;
                    continue;
                };
                if seen.contains(&key) || !in_batch.insert(key.clone()) {
                    report.already_seen += 1;
                    continue;
                }
                fresh.push((key, event));
            }
        }

        for (index, (key, event)) in fresh.into_iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.settings.dispatch_delay).await;
            }

            let chain = event.chain_id.as_deref().unwrap_or_default();
            let address = event.token_address.as_deref().unwrap_or_default();

            self.set_state(PipelineState::Enriching);
            let details = self.source.fetch_details(chain, address).await;
            if details.is_none() {
                self.metrics.enrichment_misses.inc();
            }

            self.set_state(PipelineState::Dispatching);
            let notification = format_event(&event, details.as_ref(), Utc::now());
            match self.notifier.send(&notification).await {
                Ok(()) => {
                    crate::log_cto!("New CTO announced: {}", key);
                    report.notified += 1;
                    self.notifications_sent.fetch_add(1, Ordering::SeqCst);
                    self.metrics.record_notification(true);
                }
                Err(e) => {
                    error!(target: "CTO_MONITOR", "Delivery failed for {}: {}", key, e);
                    report.failed_deliveries += 1;
                    self.delivery_failures.fetch_add(1, Ordering::SeqCst);
                    self.metrics.record_notification(false);
                }
            }

            // Marked even when delivery failed: no retries, no duplicates.
            let size = {
                let mut seen = self.seen.write();
                seen.insert(key);
                seen.len()
            };
            self.metrics.seen_tokens.set(size as i64);
        }

        let dispatched = report.notified + report.failed_deliveries;
        if dispatched > 0 {
            report.outcome = RunOutcome::Dispatched;
            self.set_state(PipelineState::Persisting);
            report.persisted = self.persist().is_ok();
        }

        info!(
            target: "CTO_MONITOR",
            "Run complete: fetched={} new={} delivered={} failed={} invalid={} known={}",
            report.fetched,
            dispatched,
            report.notified,
            report.failed_deliveries,
            report.skipped_invalid,
            report.already_seen
        );

        report
    }

    /// Save the current seen set. Failures are logged and counted.
    pub fn persist(&self) -> Result<(), StoreError> {
        let snapshot = self.seen.read().clone();
        match self.store.save(&snapshot) {
            Ok(()) => {
                self.metrics.seen_saves.inc();
                Ok(())
            }
            Err(e) => {
                error!(
                    target: "CTO_MONITOR",
                    "Failed to persist seen set to {}: {} (state will be lost on restart)",
                    self.store.path().display(),
                    e
                );
                self.persist_failures.fetch_add(1, Ordering::SeqCst);
                self.metrics.persist_failures.inc();
                Err(e)
            }
        }
    }

    /// Empty the seen set and persist it. Waits for any in-flight run.
    pub async fn clear(&self) -> Result<usize, StoreError> {
        let _guard = self.run_guard.lock().await;
        let removed = {
            let mut seen = self.seen.write();
            let removed = seen.len();
            seen.clear();
            removed
        };
        self.metrics.seen_tokens.set(0);
        info!(target: "CTO_MONITOR", "Seen set cleared ({} entries)", removed);
        self.persist().map(|()| removed)
    }

    /// Snapshot of the seen set
    pub fn seen_snapshot(&self) -> SeenSet {
        self.seen.read().clone()
    }

    pub fn seen_len(&self) -> usize {
        self.seen.read().len()
    }

    /// Bounded, sorted sample of seen keys
    pub fn recent_seen(&self, limit: usize) -> Vec<String> {
        self.seen.read().sample(limit)
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: PipelineState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Get monitor statistics
    pub fn get_stats(&self) -> MonitorStats {
        MonitorStats {
            seen_tokens: self.seen_len(),
            runs: self.runs.load(Ordering::SeqCst),
            events_fetched: self.events_fetched.load(Ordering::SeqCst),
            notifications_sent: self.notifications_sent.load(Ordering::SeqCst),
            delivery_failures: self.delivery_failures.load(Ordering::SeqCst),
            fetch_failures: self.fetch_failures.load(Ordering::SeqCst),
            persist_failures: self.persist_failures.load(Ordering::SeqCst),
            uptime_secs: self.uptime().as_secs(),
            check_interval_secs: self.settings.check_interval.as_secs(),
            state: self.state(),
            is_running: self.is_running.load(Ordering::SeqCst),
            last_run_at: *self.last_run_at.read(),
            last_report: self.last_report.read().clone(),
        }
    }
}

impl Clone for CtoMonitor {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            source: Arc::clone(&self.source),
            notifier: Arc::clone(&self.notifier),
            store: Arc::clone(&self.store),
            metrics: Arc::clone(&self.metrics),
            seen: Arc::clone(&self.seen),
            run_guard: Arc::clone(&self.run_guard),
            state: Arc::clone(&self.state),
            is_running: Arc::clone(&self.is_running),
            started_at: self.started_at,
            last_run_at: Arc::clone(&self.last_run_at),
            last_report: Arc::clone(&self.last_report),
            runs: Arc::clone(&self.runs),
            events_fetched: Arc::clone(&self.events_fetched),
            notifications_sent: Arc::clone(&self.notifications_sent),
            delivery_failures: Arc::clone(&self.delivery_failures),
            fetch_failures: Arc::clone(&self.fetch_failures),
            persist_failures: Arc::clone(&self.persist_failures),
        }
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::api::DataSource;
use crate::config::SchedulerConfig;
use crate::execution::snapshot_buffer::SnapshotBuffer;
use crate::market::MarketCalendar;
use crate::notify::{Notifier, SignalFormatter};
use crate::persistence::SignalStore;
use crate::retry::RetryExecutor;

/// Result of one fetch cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchReport {
    pub skipped: bool,
    pub succeeded: Vec<&'static str>,
    pub failed: Vec<&'static str>,
    pub consecutive_failures: u32,
    pub alerted: bool,
}

impl FetchReport {
    pub fn all_succeeded(&self) -> bool {
        !self.skipped && self.failed.is_empty()
    }
}

/// Copy of scheduler state for other tasks
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub consecutive_failures: u32,
    pub max_consecutive_failures: u32,
    pub fetch_window_open: bool,
    pub cycles: u64,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_cleanup_on: Option<NaiveDate>,
}

/// Cloneable read-only view of a running scheduler
#[derive(Clone)]
pub struct SchedulerHandle {
    status: Arc<RwLock<SchedulerStatus>>,
}

impl SchedulerHandle {
    pub fn status(&self) -> SchedulerStatus {
        self.status
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

/// Periodic market data acquisition
///
/// Pulls every source through the retry executor during the fetch window and
/// publishes results into the snapshot buffer. Repeated failures raise
/// alerts but never stop the loop.
pub struct Scheduler {
    symbol: String,
    calendar: MarketCalendar,
    retry: RetryExecutor,
    sources: Vec<Arc<dyn DataSource>>,
    buffer: SnapshotBuffer,
    notifier: Arc<dyn Notifier>,
    formatter: SignalFormatter,
    store: Option<Arc<dyn SignalStore>>,
    fetch_interval: Duration,
    max_consecutive_failures: u32,
    retention: chrono::Duration,
    consecutive_failures: u32,
    cycles: u64,
    last_cleanup_on: Option<NaiveDate>,
    status: Arc<RwLock<SchedulerStatus>>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: &SchedulerConfig,
        symbol: String,
        calendar: MarketCalendar,
        retry: RetryExecutor,
        sources: Vec<Arc<dyn DataSource>>,
        buffer: SnapshotBuffer,
        notifier: Arc<dyn Notifier>,
        formatter: SignalFormatter,
    ) -> Self {
        let status = SchedulerStatus {
            max_consecutive_failures: cfg.max_consecutive_failures,
            ..SchedulerStatus::default()
        };

        Self {
            symbol,
            calendar,
            retry,
            sources,
            buffer,
            notifier,
            formatter,
            store: None,
            fetch_interval: Duration::from_secs(cfg.fetch_interval_seconds),
            max_consecutive_failures: cfg.max_consecutive_failures.max(1),
            retention: chrono::Duration::days(cfg.retention_days),
            consecutive_failures: 0,
            cycles: 0,
            last_cleanup_on: None,
            status: Arc::new(RwLock::new(status)),
        }
    }

    /// Enable daily retention cleanup on `store`
    pub fn with_retention_store(mut self, store: Arc<dyn SignalStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            status: self.status.clone(),
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Fetch every source once, unless outside the fetch window
    pub async fn fetch_all(&mut self, now: DateTime<Utc>) -> FetchReport {
        if !self.calendar.is_fetch_window(now) {
            tracing::debug!(session = ?self.calendar.session(now), "Outside fetch window, skipping");
            self.publish_status(now, false, false);
            return FetchReport {
                skipped: true,
                consecutive_failures: self.consecutive_failures,
                ..FetchReport::default()
            };
        }

        self.cycles += 1;
        let mut report = FetchReport::default();

        for source in &self.sources {
            let name = source.name();
            let symbol = self.symbol.as_str();
            let result = self.retry.execute(name, || source.fetch(symbol)).await;

            match result {
                Ok(payload) => {
                    let as_of = payload.timestamp();
                    match self.buffer.publish(payload) {
                        Ok(true) => {
                            tracing::info!("  ✓ {} fetched for {} (as of {})", name, symbol, as_of);
                            report.succeeded.push(name);
                        }
                        Ok(false) => {
                            tracing::debug!(
                                "  {} for {} is older than buffered data (as of {}), kept previous",
                                name,
                                symbol,
                                as_of
                            );
                            report.succeeded.push(name);
                        }
                        Err(e) => {
                            tracing::error!("  ✗ {} could not be buffered: {}", name, e);
                            report.failed.push(name);
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("  ✗ {} fetch failed: {}", name, e);
                    report.failed.push(name);
                }
            }
        }

        let success = report.failed.is_empty();
        if success {
            if self.consecutive_failures > 0 {
                tracing::info!(
                    "✅ Data fetch recovered after {} failed cycles",
                    self.consecutive_failures
                );
            }
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
            tracing::warn!(
                failures = self.consecutive_failures,
                "⚠️  Partial or failed data fetch (failures: {})",
                self.consecutive_failures
            );

            if self.consecutive_failures % self.max_consecutive_failures == 0 {
                tracing::error!(
                    "🚨 {} consecutive failures - system may need attention",
                    self.consecutive_failures
                );
                let text = self.formatter.fetch_alert_message(
                    self.consecutive_failures,
                    &report.failed,
                    now,
                );
                if let Err(e) = self.notifier.deliver(&text).await {
                    tracing::warn!("Failed to deliver fetch alert: {}", e);
                }
                report.alerted = true;
            }
        }

        report.consecutive_failures = self.consecutive_failures;
        self.publish_status(now, true, success);
        report
    }

    /// Remove stored signals past retention, at most once per local day
    pub async fn cleanup_if_due(&mut self, now: DateTime<Utc>) -> Option<usize> {
        let store = self.store.clone()?;
        let today = now.with_timezone(&self.calendar.window().timezone).date_naive();
        if self.last_cleanup_on == Some(today) {
            return None;
        }
        self.last_cleanup_on = Some(today);

        match store.cleanup_older_than(self.retention).await {
            Ok(removed) => {
                tracing::info!(
                    "🧹 Cleaned up {} stored signals (retention: {} days)",
                    removed,
                    self.retention.num_days()
                );
                Some(removed)
            }
            Err(e) => {
                tracing::warn!("Signal retention cleanup failed: {}", e);
                None
            }
        }
    }

    fn publish_status(&self, now: DateTime<Utc>, fetched: bool, success: bool) {
        if let Ok(mut status) = self.status.write() {
            status.consecutive_failures = self.consecutive_failures;
            status.fetch_window_open = self.calendar.is_fetch_window(now);
            status.cycles = self.cycles;
            status.last_cleanup_on = self.last_cleanup_on;
            if fetched {
                status.last_fetch_at = Some(now);
                if success {
                    status.last_success_at = Some(now);
                }
            }
        }
    }

    fn set_running(&self, running: bool) {
        if let Ok(mut status) = self.status.write() {
            status.running = running;
        }
    }

    /// Drive `fetch_all` on a fixed interval until cancelled
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            "🔄 Scheduler starting: {} sources every {}s",
            self.sources.len(),
            self.fetch_interval.as_secs()
        );
        self.set_running(true);

        let mut ticker = interval_at(Instant::now(), self.fetch_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let now = Utc::now();
            tracing::debug!("🔄 [FETCH] Tick at {}", now.format("%H:%M:%S"));

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.fetch_all(now) => {}
            }
            self.cleanup_if_due(now).await;
        }

        self.set_running(false);
        tracing::info!("🛑 Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::market::MarketWindow;
    use crate::models::{OpenInterest, OptionChainSummary, SourcePayload, UnderlyingQuote};
    use crate::notify::testing::RecordingNotifier;
    use crate::persistence::MemorySignalStore;
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use chrono_tz::Asia::Kolkata;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Monday 10:30 IST
    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 5, 0, 0).unwrap()
    }

    struct QuoteSource {
        calls: AtomicU32,
    }

    #[async_trait]
    impl DataSource for QuoteSource {
        fn name(&self) -> &'static str {
            "underlying"
        }

        async fn fetch(&self, symbol: &str) -> Result<SourcePayload, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SourcePayload::Underlying(UnderlyingQuote {
                symbol: symbol.to_string(),
                spot_price: 21_010.0,
                rsi: Some(45.0),
                previous_rsi: Some(28.0),
                timestamp: t0(),
            }))
        }
    }

    /// Fails transiently while `failing` is non-zero
    struct FlakyChain {
        failing: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl DataSource for FlakyChain {
        fn name(&self) -> &'static str {
            "option_chain"
        }

        async fn fetch(&self, symbol: &str) -> Result<SourcePayload, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) > 0 {
                return Err(FetchError::Transient {
                    source_name: "option_chain",
                    message: "timeout".to_string(),
                });
            }
            Ok(SourcePayload::OptionChain(OptionChainSummary {
                symbol: symbol.to_string(),
                atm_strike: 21_000.0,
                calls: OpenInterest {
                    total: 50_000.0,
                    change_pct: 20.0,
                },
                puts: OpenInterest {
                    total: 25_000.0,
                    change_pct: 0.0,
                },
                timestamp: t0(),
            }))
        }
    }

    struct Fixture {
        scheduler: Scheduler,
        buffer: SnapshotBuffer,
        notifier: Arc<RecordingNotifier>,
        quote: Arc<QuoteSource>,
        chain: Arc<FlakyChain>,
    }

    fn fixture(failing: bool, max_failures: u32) -> Fixture {
        let buffer = SnapshotBuffer::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let quote = Arc::new(QuoteSource {
            calls: AtomicU32::new(0),
        });
        let chain = Arc::new(FlakyChain {
            failing: AtomicU32::new(u32::from(failing)),
            calls: AtomicU32::new(0),
        });
        let cfg = SchedulerConfig {
            max_consecutive_failures: max_failures,
            ..SchedulerConfig::default()
        };
        let calendar = MarketCalendar::new(
            MarketWindow::try_from(&crate::config::MarketConfig::default()).unwrap(),
        );
        let retry = RetryExecutor::new(RetryPolicy {
            max_attempts: 2,
            initial_delay_ms: 10,
            backoff_multiplier: 2.0,
            max_delay_ms: 100,
        });

        let sources: Vec<Arc<dyn DataSource>> = vec![quote.clone(), chain.clone()];

        let scheduler = Scheduler::new(
            &cfg,
            "NIFTY".to_string(),
            calendar,
            retry,
            sources,
            buffer.clone(),
            notifier.clone(),
            SignalFormatter::new(Kolkata, 0.7, 1.3),
        );

        Fixture {
            scheduler,
            buffer,
            notifier,
            quote,
            chain,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_publishes_snapshot() {
        let mut f = fixture(false, 10);

        let report = f.scheduler.fetch_all(t0()).await;

        assert!(report.all_succeeded());
        assert_eq!(report.succeeded, vec!["underlying", "option_chain"]);
        assert!(f.buffer.snapshot("NIFTY").unwrap().is_some());
        assert_eq!(f.scheduler.handle().status().last_success_at, Some(t0()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_outside_window() {
        let mut f = fixture(false, 10);
        // 20:00 IST
        let evening = Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap();

        let report = f.scheduler.fetch_all(evening).await;

        assert!(report.skipped);
        assert_eq!(f.quote.calls.load(Ordering::SeqCst), 0);
        assert!(!f.scheduler.handle().status().fetch_window_open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_counter_and_alerts() {
        let mut f = fixture(true, 3);

        for cycle in 1..=7u32 {
            let report = f.scheduler.fetch_all(t0()).await;
            assert_eq!(report.consecutive_failures, cycle);
            assert_eq!(report.failed, vec!["option_chain"]);
            assert_eq!(report.alerted, cycle % 3 == 0);
        }

        // Retries were used on every cycle
        assert_eq!(f.chain.calls.load(Ordering::SeqCst), 14);
        // Alerts at 3 and 6
        let alerts = f.notifier.messages();
        assert_eq!(alerts.len(), 2);
        assert!(alerts[0].contains("3 consecutive failed fetch cycles"));

        // A fully successful cycle resets the counter
        f.chain.failing.store(0, Ordering::SeqCst);
        let report = f.scheduler.fetch_all(t0()).await;
        assert!(report.all_succeeded());
        assert_eq!(f.scheduler.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_once_per_day() {
        let f = fixture(false, 10);
        let store = Arc::new(MemorySignalStore::new());
        let mut scheduler = f.scheduler.with_retention_store(store.clone());

        let old = crate::models::fixtures::candidate(
            crate::models::SignalKind::BuyCe,
            Utc::now() - chrono::Duration::days(45),
            15,
        );
        store.save_signal(&old).await.unwrap();

        assert_eq!(scheduler.cleanup_if_due(t0()).await, Some(1));
        assert_eq!(scheduler.cleanup_if_due(t0() + chrono::Duration::hours(2)).await, None);
        assert_eq!(
            scheduler.cleanup_if_due(t0() + chrono::Duration::days(1)).await,
            Some(0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let f = fixture(false, 10);
        let handle = f.scheduler.handle();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(f.scheduler.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.status().running);

        cancel.cancel();
        task.await.unwrap();
        assert!(!handle.status().running);
    }
}

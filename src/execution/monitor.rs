use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::execution::engine::SignalEngine;
use crate::execution::snapshot_buffer::SnapshotProvider;
use crate::models::SignalCandidate;
use crate::notify::{MonitorState, Notifier, SignalFormatter};
use crate::retry::RetryExecutor;

/// What one monitor cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    MarketClosed,
    NoSnapshot,
    Evaluated { emitted: usize, delivered: usize },
}

/// Copy of monitor counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub cycle_count: u64,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub signals_generated: u64,
    pub delivered: u64,
    pub delivery_failures: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub last_cycle_ms: u64,
}

/// Cloneable read-only view of a running monitor
#[derive(Clone)]
pub struct MonitorHandle {
    status: Arc<RwLock<MonitorStatus>>,
}

impl MonitorHandle {
    pub fn status(&self) -> MonitorStatus {
        self.status
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

/// Single-task signal monitor
///
/// Owns the engine. Each cycle pulls the latest snapshot, runs the engine and
/// delivers whatever it emits, then sleeps for the rest of the interval.
/// Cycles never overlap and a failed cycle never stops the loop.
pub struct MonitorLoop {
    engine: SignalEngine,
    provider: Arc<dyn SnapshotProvider>,
    notifier: Arc<dyn Notifier>,
    formatter: SignalFormatter,
    retry: RetryExecutor,
    interval: Duration,
    max_error_backoff: Duration,
    status_log_every: u64,
    error_alert_every: u64,
    market_paused: bool,
    status: Arc<RwLock<MonitorStatus>>,
}

impl MonitorLoop {
    pub fn new(
        cfg: &MonitorConfig,
        engine: SignalEngine,
        provider: Arc<dyn SnapshotProvider>,
        notifier: Arc<dyn Notifier>,
        formatter: SignalFormatter,
        retry: RetryExecutor,
    ) -> Self {
        Self {
            engine,
            provider,
            notifier,
            formatter,
            retry,
            interval: Duration::from_secs(cfg.interval_seconds),
            max_error_backoff: Duration::from_secs(cfg.max_error_backoff_seconds),
            status_log_every: cfg.status_log_every_cycles.max(1),
            error_alert_every: cfg.error_alert_every.max(1),
            market_paused: false,
            status: Arc::new(RwLock::new(MonitorStatus::default())),
        }
    }

    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle {
            status: self.status.clone(),
        }
    }

    pub fn engine(&self) -> &SignalEngine {
        &self.engine
    }

    fn update(&self, f: impl FnOnce(&mut MonitorStatus)) -> Result<(), MonitorError> {
        let mut status = self.status.write().map_err(|_| MonitorError::Poisoned)?;
        f(&mut status);
        Ok(())
    }

    /// Like `update`, for callers that cannot propagate
    fn update_or_log(&self, f: impl FnOnce(&mut MonitorStatus)) {
        if let Err(e) = self.update(f) {
            tracing::error!("Monitor status not updated: {}", e);
        }
    }

    /// Wait applied after a failed cycle
    pub fn error_backoff(&self) -> Duration {
        self.max_error_backoff.min(self.interval.saturating_mul(2))
    }

    /// Run one cycle as of `now`
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleOutcome, MonitorError> {
        self.update(|s| {
            s.last_heartbeat = Some(now);
            s.cycle_count += 1;
        })?;
        let cycle = self.handle().status().cycle_count;

        if self.engine.market_gated(now) {
            tracing::debug!("💤 Market closed (cycle {})", cycle);
            if !self.market_paused {
                self.market_paused = true;
                let context = format!(
                    "Market closed, {} signals resume next session",
                    self.engine.symbol()
                );
                self.announce(MonitorState::Paused, &context).await;
            }
            return Ok(CycleOutcome::MarketClosed);
        }
        if self.market_paused {
            self.market_paused = false;
            tracing::info!("▶️  Market open, resuming signal generation");
        }

        if cycle % self.status_log_every == 0 {
            let engine = self.engine.status(now);
            tracing::info!(
                "📊 Status: cycle {} | {} active | {} in last hour | {} slots left | {} emitted total",
                cycle,
                engine.active_signals.len(),
                engine.recent_signals_count,
                engine.rate_limit_remaining,
                engine.total_emitted
            );
        }

        let symbol = self.engine.symbol().to_string();
        let snapshot = match self.provider.latest(&symbol).await? {
            Some(snapshot) => snapshot,
            None => {
                tracing::debug!("No market snapshot for {} yet", symbol);
                return Ok(CycleOutcome::NoSnapshot);
            }
        };

        let signals = self.engine.generate_at(&snapshot, now).await;
        let mut delivered = 0;
        for signal in &signals {
            if self.deliver_signal(signal).await {
                delivered += 1;
            }
        }

        let emitted = signals.len();
        if emitted > 1 {
            let summary = self.formatter.batch_message(&signals, now);
            if let Err(e) = self.notifier.deliver(&summary).await {
                tracing::warn!("Failed to send batch summary: {}", e);
            }
        }
        self.update(|s| {
            s.signals_generated += emitted as u64;
            s.delivered += delivered as u64;
            s.delivery_failures += (emitted - delivered) as u64;
        })?;

        Ok(CycleOutcome::Evaluated { emitted, delivered })
    }

    /// Deliver one signal; the outcome is recorded but never affects tracking
    async fn deliver_signal(&self, signal: &SignalCandidate) -> bool {
        let text = self.formatter.signal_message(signal);
        let notifier = self.notifier.as_ref();
        let result = self
            .retry
            .execute(notifier.name(), || notifier.deliver(&text))
            .await;

        let ok = match result {
            Ok(()) => {
                tracing::info!("📨 Delivered {} {:.0}", signal.kind, signal.strike_price);
                true
            }
            Err(e) => {
                tracing::error!("❌ Failed to deliver {} signal: {}", signal.kind, e);
                false
            }
        };

        if let Err(e) = self.engine.store().mark_delivery(signal.id, ok).await {
            tracing::warn!("Could not record delivery status for {}: {}", signal.id, e);
        }
        ok
    }

    async fn announce(&self, state: MonitorState, context: &str) {
        let text = self.formatter.status_message(state, context, Utc::now());
        if let Err(e) = self.notifier.deliver(&text).await {
            tracing::warn!("Failed to send monitor status: {}", e);
        }
    }

    async fn record_error(&self, err: &MonitorError) {
        let mut error_count = 0;
        let message = err.to_string();
        self.update_or_log(|s| {
            s.error_count += 1;
            s.last_error = Some(message.clone());
            error_count = s.error_count;
        });

        tracing::error!("❌ Monitor cycle failed ({} errors): {}", error_count, message);

        if error_count > 0 && error_count % self.error_alert_every == 0 {
            let text = self.formatter.error_message(&message, Utc::now());
            if let Err(e) = self.notifier.deliver(&text).await {
                tracing::warn!("Failed to send error alert: {}", e);
            }
        }
    }

    /// Run cycles at a steady cadence until cancelled
    pub async fn run(mut self, cancel: CancellationToken) {
        let symbol = self.engine.symbol().to_string();
        tracing::info!(
            "🔍 Signal monitor starting for {} (every {}s)",
            symbol,
            self.interval.as_secs()
        );
        self.update_or_log(|s| s.running = true);
        self.announce(
            MonitorState::Started,
            &format!("Monitoring {} every {}s", symbol, self.interval.as_secs()),
        )
        .await;

        while !cancel.is_cancelled() {
            let started = Instant::now();

            let wait = match self.run_cycle(Utc::now()).await {
                Ok(outcome) => {
                    let elapsed = started.elapsed();
                    self.update_or_log(|s| s.last_cycle_ms = elapsed.as_millis() as u64);
                    if let CycleOutcome::Evaluated { emitted, .. } = outcome {
                        if emitted > 0 {
                            tracing::info!("✅ Cycle complete: {} signals", emitted);
                        }
                    }
                    if elapsed > self.interval {
                        tracing::warn!(
                            "⚠️  Cycle took {:.1}s, longer than the {}s interval",
                            elapsed.as_secs_f64(),
                            self.interval.as_secs()
                        );
                    }
                    self.interval.saturating_sub(elapsed)
                }
                Err(e) => {
                    self.record_error(&e).await;
                    self.error_backoff()
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        self.update_or_log(|s| s.running = false);
        let cycles = self.handle().status().cycle_count;
        self.announce(MonitorState::Stopped, &format!("Completed {} cycles", cycles))
            .await;
        tracing::info!("🛑 Signal monitor stopped after {} cycles", cycles);
    }
}

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{SignalsConfig, SuppressionMode};
use crate::error::StoreError;
use crate::execution::lifecycle::SignalLifecycleStore;
use crate::market::{MarketCalendar, MarketSession};
use crate::models::{MarketSnapshot, SignalCandidate, SignalKind};
use crate::persistence::SignalStore;
use crate::risk::{EmissionBlock, EmissionLimiter, EmissionLimits};
use crate::strategy::{ScoringThresholds, SignalScorer, SignalStrategy};

/// How far back warm start looks for emitted signals
const WARM_START_LOOKBACK_MINUTES: i64 = 60;

/// Outcome of checking one scored candidate
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateDecision {
    Accept,
    BelowThreshold { confidence: f64 },
    StillActive,
    Blocked(EmissionBlock),
}

/// Copy of one active entry for status reports
#[derive(Debug, Clone, Serialize)]
pub struct ActiveSignalStatus {
    pub kind: SignalKind,
    pub strike_price: f64,
    pub generated_at: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
    pub time_remaining_secs: i64,
}

/// Point-in-time engine report, safe to hand to other tasks
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub enabled: bool,
    pub market_open: bool,
    pub session: MarketSession,
    pub renewal_mode: bool,
    pub recent_signals_count: usize,
    pub rate_limit_remaining: usize,
    pub active_signals: Vec<ActiveSignalStatus>,
    pub last_emissions: HashMap<SignalKind, DateTime<Utc>>,
    pub total_emitted: u64,
    pub last_snapshot_at: Option<DateTime<Utc>>,
}

/// Signal generation pipeline
///
/// Gate -> clear expired -> hourly cap -> score -> threshold -> suppression
/// -> persist, track, record. Owned by a single task.
pub struct SignalEngine {
    enabled: bool,
    symbol: String,
    market_hours_only: bool,
    confidence_threshold: f64,
    calendar: MarketCalendar,
    strategy: Box<dyn SignalStrategy>,
    lifecycle: SignalLifecycleStore,
    limiter: EmissionLimiter,
    store: Arc<dyn SignalStore>,
    last_snapshot_at: Option<DateTime<Utc>>,
    total_emitted: u64,
}

impl SignalEngine {
    pub fn new(cfg: &SignalsConfig, calendar: MarketCalendar, store: Arc<dyn SignalStore>) -> Self {
        Self {
            enabled: cfg.enabled,
            symbol: cfg.symbol.clone(),
            market_hours_only: cfg.market_hours_only,
            confidence_threshold: cfg.confidence_threshold,
            calendar,
            strategy: Box::new(SignalScorer::new(ScoringThresholds::from(cfg))),
            lifecycle: SignalLifecycleStore::new(Duration::seconds(cfg.expiry_buffer_seconds)),
            limiter: EmissionLimiter::new(EmissionLimits::from(cfg)),
            store,
            last_snapshot_at: None,
            total_emitted: 0,
        }
    }

    /// Replace the scoring strategy
    pub fn with_strategy(mut self, strategy: Box<dyn SignalStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn calendar(&self) -> &MarketCalendar {
        &self.calendar
    }

    /// Whether generation is gated on the regular session
    pub fn market_gated(&self, now: DateTime<Utc>) -> bool {
        self.market_hours_only && !self.calendar.is_open(now)
    }

    pub fn lifecycle(&self) -> &SignalLifecycleStore {
        &self.lifecycle
    }

    pub fn store(&self) -> Arc<dyn SignalStore> {
        self.store.clone()
    }

    /// Evaluate `snapshot` at the current wall-clock time
    pub async fn generate(&mut self, snapshot: &MarketSnapshot) -> Vec<SignalCandidate> {
        self.generate_at(snapshot, Utc::now()).await
    }

    /// Evaluate `snapshot` as of `now`
    pub async fn generate_at(
        &mut self,
        snapshot: &MarketSnapshot,
        now: DateTime<Utc>,
    ) -> Vec<SignalCandidate> {
        if !self.enabled {
            return Vec::new();
        }
        if self.market_gated(now) {
            tracing::debug!("Market closed, skipping signal generation");
            return Vec::new();
        }

        if let Some(last) = self.last_snapshot_at {
            if snapshot.timestamp < last {
                tracing::warn!(
                    snapshot_at = %snapshot.timestamp,
                    last_seen = %last,
                    "Stale snapshot ignored"
                );
                return Vec::new();
            }
        }
        self.last_snapshot_at = Some(snapshot.timestamp);

        self.lifecycle.clear_expired(now);

        if !self.limiter.has_capacity(now) {
            tracing::info!(
                "⏸️  Hourly signal cap reached ({} in last 60 min)",
                self.limiter.recent_count(now)
            );
            return Vec::new();
        }

        let candidates = self.strategy.score(snapshot, now);
        let mut accepted = Vec::new();

        for candidate in candidates {
            match self.decide(&candidate, now) {
                CandidateDecision::Accept => {
                    self.accept(candidate.clone(), now).await;
                    accepted.push(candidate);
                }
                decision => {
                    tracing::debug!(kind = %candidate.kind, ?decision, "Candidate skipped");
                }
            }
        }

        accepted
    }

    /// Check one candidate against the threshold and both suppression gates
    pub fn decide(&mut self, candidate: &SignalCandidate, now: DateTime<Utc>) -> CandidateDecision {
        if candidate.confidence < self.confidence_threshold {
            return CandidateDecision::BelowThreshold {
                confidence: candidate.confidence,
            };
        }

        if self.limiter.mode() == SuppressionMode::Renewal
            && self.lifecycle.is_active(candidate.kind, now)
        {
            return CandidateDecision::StillActive;
        }

        // Cap is re-checked per candidate so one cycle cannot overshoot it
        match self.limiter.check(candidate.kind, now) {
            Ok(()) => CandidateDecision::Accept,
            Err(block) => CandidateDecision::Blocked(block),
        }
    }

    async fn accept(&mut self, candidate: SignalCandidate, now: DateTime<Utc>) {
        if let Err(e) = self.store.save_signal(&candidate).await {
            tracing::warn!(
                store = self.store.name(),
                error = %e,
                "⚠️  Degraded persistence: signal {} not saved",
                candidate.id
            );
        }

        let kind = candidate.kind;
        tracing::info!(
            kind = %kind,
            strike = candidate.strike_price,
            confidence = candidate.confidence,
            strength = candidate.strength.as_str(),
            "🎯 Signal emitted: {} {:.0} ({:.0}% {})",
            kind,
            candidate.strike_price,
            candidate.confidence * 100.0,
            candidate.strength.as_str()
        );

        match self.limiter.mode() {
            SuppressionMode::Renewal => {
                self.lifecycle.track(candidate, now);
            }
            SuppressionMode::Cooldown => self.lifecycle.supersede(candidate, now),
        }
        self.limiter.record(kind, now);
        self.total_emitted += 1;
    }

    /// Rebuild active signals and the hourly window from the store
    pub async fn warm_start(&mut self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let recent = self
            .store
            .load_recent_signals(&self.symbol, Duration::minutes(WARM_START_LOOKBACK_MINUTES))
            .await?;

        for signal in &recent {
            self.limiter.record(signal.kind, signal.generated_at);
        }
        let restored = self.lifecycle.restore(recent, now);

        tracing::info!(
            "♻️  Warm start: {} active signals, {} emissions in the last hour",
            restored,
            self.limiter.recent_count(now)
        );
        Ok(restored)
    }

    pub fn status(&mut self, now: DateTime<Utc>) -> EngineStatus {
        let active_signals = self
            .lifecycle
            .snapshot()
            .into_iter()
            .map(|entry| ActiveSignalStatus {
                kind: entry.signal.kind,
                strike_price: entry.signal.strike_price,
                generated_at: entry.signal.generated_at,
                expiry_time: entry.expiry_time,
                time_remaining_secs: entry.time_remaining(now).num_seconds(),
            })
            .collect();

        EngineStatus {
            enabled: self.enabled,
            market_open: self.calendar.is_open(now),
            session: self.calendar.session(now),
            renewal_mode: self.limiter.mode() == SuppressionMode::Renewal,
            recent_signals_count: self.limiter.recent_count(now),
            rate_limit_remaining: self.limiter.remaining(now),
            active_signals,
            last_emissions: self.limiter.last_emissions(),
            total_emitted: self.total_emitted,
            last_snapshot_at: self.last_snapshot_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::MarketWindow;
    use crate::models::{OpenInterest, SignalStrength, SubScores};
    use crate::persistence::MemorySignalStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use uuid::Uuid;

    /// Monday 10:30 IST
    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 5, 0, 0).unwrap()
    }

    fn calendar() -> MarketCalendar {
        MarketCalendar::new(MarketWindow::try_from(&crate::config::MarketConfig::default()).unwrap())
    }

    fn bullish_snapshot(at: DateTime<Utc>) -> MarketSnapshot {
        MarketSnapshot {
            symbol: "NIFTY".to_string(),
            spot_price: 21_010.0,
            rsi: Some(45.0),
            previous_rsi: Some(28.0),
            atm_strike: 21_000.0,
            calls: OpenInterest {
                total: 50_000.0,
                change_pct: 20.0,
            },
            puts: OpenInterest {
                total: 25_000.0,
                change_pct: 0.0,
            },
            timestamp: at,
        }
    }

    fn engine(cfg: SignalsConfig) -> (SignalEngine, Arc<MemorySignalStore>) {
        let store = Arc::new(MemorySignalStore::new());
        (SignalEngine::new(&cfg, calendar(), store.clone()), store)
    }

    /// Emits one fixed-confidence candidate per listed kind
    struct FixedStrategy {
        kinds: Vec<SignalKind>,
        confidence: f64,
    }

    impl SignalStrategy for FixedStrategy {
        fn score(&self, snapshot: &MarketSnapshot, now: DateTime<Utc>) -> Vec<SignalCandidate> {
            self.kinds
                .iter()
                .map(|&kind| SignalCandidate {
                    id: Uuid::new_v4(),
                    symbol: snapshot.symbol.clone(),
                    kind,
                    strike_price: snapshot.atm_strike,
                    scores: SubScores {
                        flow: self.confidence,
                        momentum: self.confidence,
                        participation: self.confidence,
                    },
                    confidence: self.confidence,
                    strength: SignalStrength::from_confidence(self.confidence),
                    premium: 50.0,
                    target: 66.5,
                    stop_loss: 40.0,
                    spot_price: snapshot.spot_price,
                    pcr: snapshot.pcr(),
                    rsi: 50.0,
                    oi_change_pct: 0.0,
                    market_context: "Bullish momentum".to_string(),
                    generated_at: now,
                    validity_secs: 15 * 60,
                })
                .collect()
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl SignalStore for BrokenStore {
        async fn save_signal(&self, _: &SignalCandidate) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn load_recent_signals(
            &self,
            _: &str,
            _: Duration,
        ) -> Result<Vec<SignalCandidate>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn mark_delivery(&self, _: Uuid, _: bool) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn cleanup_older_than(&self, _: Duration) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_emits_and_persists() {
        let (mut engine, store) = engine(SignalsConfig::default());

        let signals = engine.generate_at(&bullish_snapshot(t0()), t0()).await;

        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::BuyCe);
        assert_eq!(store.len(), 1);
        assert!(engine.lifecycle().get(SignalKind::BuyCe).is_some());

        let status = engine.status(t0());
        assert_eq!(status.recent_signals_count, 1);
        assert_eq!(status.rate_limit_remaining, 5);
        assert_eq!(status.total_emitted, 1);
        assert_eq!(status.active_signals.len(), 1);
        assert_eq!(status.active_signals[0].time_remaining_secs, 15 * 60);
    }

    #[tokio::test]
    async fn test_renewal_suppressed_until_expiry() {
        let (mut engine, _) = engine(SignalsConfig::default());

        assert_eq!(engine.generate_at(&bullish_snapshot(t0()), t0()).await.len(), 1);

        let at = t0() + Duration::minutes(5);
        assert!(engine.generate_at(&bullish_snapshot(at), at).await.is_empty());

        let at = t0() + Duration::minutes(15) + Duration::seconds(30);
        assert_eq!(engine.generate_at(&bullish_snapshot(at), at).await.len(), 1);
    }

    #[tokio::test]
    async fn test_market_closed_and_disabled() {
        let (mut engine, store) = engine(SignalsConfig::default());
        // Saturday
        let weekend = Utc.with_ymd_and_hms(2024, 1, 20, 5, 0, 0).unwrap();
        assert!(engine
            .generate_at(&bullish_snapshot(weekend), weekend)
            .await
            .is_empty());

        let (mut disabled, _) = self::engine(SignalsConfig {
            enabled: false,
            ..SignalsConfig::default()
        });
        assert!(disabled.generate_at(&bullish_snapshot(t0()), t0()).await.is_empty());
        assert!(store.is_empty());

        // Gate can be turned off
        let (mut always_on, _) = self::engine(SignalsConfig {
            market_hours_only: false,
            ..SignalsConfig::default()
        });
        assert_eq!(
            always_on
                .generate_at(&bullish_snapshot(weekend), weekend)
                .await
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_confidence_threshold_filters() {
        let (engine, _) = engine(SignalsConfig::default());
        let mut engine = engine.with_strategy(Box::new(FixedStrategy {
            kinds: vec![SignalKind::BuyCe],
            confidence: 0.65,
        }));

        assert!(engine.generate_at(&bullish_snapshot(t0()), t0()).await.is_empty());
    }

    #[tokio::test]
    async fn test_cap_holds_within_one_cycle() {
        let (engine, store) = engine(SignalsConfig {
            max_signals_per_hour: 1,
            ..SignalsConfig::default()
        });
        let mut engine = engine.with_strategy(Box::new(FixedStrategy {
            kinds: vec![SignalKind::BuyCe, SignalKind::BuyPe],
            confidence: 0.9,
        }));

        let signals = engine.generate_at(&bullish_snapshot(t0()), t0()).await;

        assert_eq!(signals.len(), 1);
        assert_eq!(store.len(), 1);

        // Cap is exhausted for the rest of the hour
        let at = t0() + Duration::minutes(30);
        assert!(engine.generate_at(&bullish_snapshot(at), at).await.is_empty());
        let at = t0() + Duration::minutes(61);
        assert_eq!(engine.generate_at(&bullish_snapshot(at), at).await.len(), 1);
    }

    #[tokio::test]
    async fn test_cooldown_mode() {
        let (engine, _) = engine(SignalsConfig {
            mode: SuppressionMode::Cooldown,
            cooldown_minutes: 20,
            ..SignalsConfig::default()
        });
        let mut engine = engine.with_strategy(Box::new(FixedStrategy {
            kinds: vec![SignalKind::BuyCe],
            confidence: 0.9,
        }));

        assert_eq!(engine.generate_at(&bullish_snapshot(t0()), t0()).await.len(), 1);

        // Signal has expired but the cooldown has not
        let at = t0() + Duration::minutes(17);
        assert!(engine.generate_at(&bullish_snapshot(at), at).await.is_empty());

        let at = t0() + Duration::minutes(20);
        assert_eq!(engine.generate_at(&bullish_snapshot(at), at).await.len(), 1);
        assert_eq!(engine.lifecycle().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_snapshot_ignored() {
        let (mut engine, _) = engine(SignalsConfig::default());
        let now = t0() + Duration::minutes(20);

        engine.generate_at(&bullish_snapshot(t0()), now).await;
        engine.lifecycle.mark_expired(SignalKind::BuyCe);

        let older = bullish_snapshot(t0() - Duration::minutes(1));
        assert!(engine.generate_at(&older, now).await.is_empty());
        assert_eq!(engine.status(now).last_snapshot_at, Some(t0()));
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_block() {
        let cfg = SignalsConfig::default();
        let mut engine = SignalEngine::new(&cfg, calendar(), Arc::new(BrokenStore));

        let signals = engine.generate_at(&bullish_snapshot(t0()), t0()).await;

        assert_eq!(signals.len(), 1);
        assert!(engine.lifecycle().get(SignalKind::BuyCe).is_some());
        assert!(engine.warm_start().await.is_err());
    }

    #[tokio::test]
    async fn test_warm_start_restores_state() {
        let store = Arc::new(MemorySignalStore::new());
        let now = Utc::now();
        let mut previous = crate::models::fixtures::candidate(
            SignalKind::BuyCe,
            now - Duration::minutes(5),
            15,
        );
        previous.symbol = "NIFTY".to_string();
        store.save_signal(&previous).await.unwrap();

        let cfg = SignalsConfig {
            market_hours_only: false,
            ..SignalsConfig::default()
        };
        let mut engine = SignalEngine::new(&cfg, calendar(), store.clone());

        assert_eq!(engine.warm_start().await.unwrap(), 1);
        let status = engine.status(now);
        assert_eq!(status.recent_signals_count, 1);
        assert_eq!(status.active_signals.len(), 1);

        // The restored BUY_CE still suppresses a renewal
        assert!(engine.generate_at(&bullish_snapshot(now), now).await.is_empty());
    }
}

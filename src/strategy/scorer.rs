use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::SignalStrategy;
use crate::config::SignalsConfig;
use crate::models::{MarketSnapshot, OpenInterest, SignalCandidate, SignalKind, SignalStrength, SubScores};

/// Sub-score above which a component is called out in the market context
const CONTEXT_THRESHOLD: f64 = 0.7;
const RSI_PARTIAL_CREDIT: f64 = 0.6;
const OI_PARTIAL_CREDIT: f64 = 0.5;
const MIN_CORROBORATING: usize = 2;
const TARGET_MULTIPLIER: f64 = 1.33;
const STOP_LOSS_MULTIPLIER: f64 = 0.8;

/// Thresholds the scorer reads, copied out of `SignalsConfig`
#[derive(Debug, Clone)]
pub struct ScoringThresholds {
    pub pcr_bullish_max: f64,
    pub pcr_bearish_min: f64,
    pub rsi_oversold_max: f64,
    pub rsi_oversold_recovery: f64,
    pub rsi_overbought_min: f64,
    pub rsi_overbought_decline: f64,
    pub oi_significant_change_pct: f64,
    pub oi_min_level: f64,
    pub premium_floor: f64,
    pub premium_time_value: f64,
    pub validity: Duration,
}

impl From<&SignalsConfig> for ScoringThresholds {
    fn from(cfg: &SignalsConfig) -> Self {
        Self {
            pcr_bullish_max: cfg.pcr_bullish_max,
            pcr_bearish_min: cfg.pcr_bearish_min,
            rsi_oversold_max: cfg.rsi_oversold_max,
            rsi_oversold_recovery: cfg.rsi_oversold_recovery,
            rsi_overbought_min: cfg.rsi_overbought_min,
            rsi_overbought_decline: cfg.rsi_overbought_decline,
            oi_significant_change_pct: cfg.oi_significant_change_pct,
            oi_min_level: cfg.oi_min_level,
            premium_floor: cfg.premium_floor,
            premium_time_value: cfg.premium_time_value,
            validity: Duration::minutes(cfg.validity_minutes),
        }
    }
}

impl Default for ScoringThresholds {
    fn default() -> Self {
        Self::from(&SignalsConfig::default())
    }
}

/// Composite PCR / RSI / OI scorer
///
/// Pure: the same snapshot and `now` always produce the same candidates
/// (apart from the random id).
#[derive(Debug, Clone, Default)]
pub struct SignalScorer {
    thresholds: ScoringThresholds,
}

impl SignalScorer {
    pub fn new(thresholds: ScoringThresholds) -> Self {
        Self { thresholds }
    }

    /// Score both directions. Missing or degenerate data yields no candidates.
    pub fn score(&self, snapshot: &MarketSnapshot, now: DateTime<Utc>) -> Vec<SignalCandidate> {
        let Some(rsi) = snapshot.rsi.filter(|r| r.is_finite()) else {
            tracing::debug!(symbol = %snapshot.symbol, "No RSI in snapshot, skipping scoring");
            return Vec::new();
        };
        if !snapshot.spot_price.is_finite() || snapshot.spot_price <= 0.0 {
            tracing::debug!(symbol = %snapshot.symbol, spot = snapshot.spot_price, "Invalid spot price");
            return Vec::new();
        }
        let pcr = snapshot.pcr();
        if pcr <= 0.0 || !pcr.is_finite() {
            tracing::debug!(symbol = %snapshot.symbol, "PCR undefined, skipping scoring");
            return Vec::new();
        }
        // No previous sample means no observable transition
        let previous_rsi = snapshot.previous_rsi.filter(|r| r.is_finite()).unwrap_or(rsi);

        SignalKind::ALL
            .iter()
            .filter_map(|&kind| self.evaluate(kind, snapshot, pcr, rsi, previous_rsi, now))
            .collect()
    }

    fn evaluate(
        &self,
        kind: SignalKind,
        snapshot: &MarketSnapshot,
        pcr: f64,
        rsi: f64,
        previous_rsi: f64,
        now: DateTime<Utc>,
    ) -> Option<SignalCandidate> {
        let oi = match kind {
            SignalKind::BuyCe => snapshot.calls,
            SignalKind::BuyPe => snapshot.puts,
        };

        let scores = SubScores {
            flow: self.flow_score(kind, pcr),
            momentum: self.momentum_score(kind, rsi, previous_rsi),
            participation: self.participation_score(&oi),
        };

        if scores.corroborating() < MIN_CORROBORATING {
            tracing::debug!(%kind, ?scores, "Not enough corroborating components");
            return None;
        }

        let confidence = scores.mean();
        let strike = snapshot.atm_strike;
        let intrinsic = match kind {
            SignalKind::BuyCe => snapshot.spot_price - strike,
            SignalKind::BuyPe => strike - snapshot.spot_price,
        };
        let premium = self
            .thresholds
            .premium_floor
            .max(intrinsic + self.thresholds.premium_time_value);

        Some(SignalCandidate {
            id: Uuid::new_v4(),
            symbol: snapshot.symbol.clone(),
            kind,
            strike_price: strike,
            scores,
            confidence,
            strength: SignalStrength::from_confidence(confidence),
            premium,
            target: premium * TARGET_MULTIPLIER,
            stop_loss: premium * STOP_LOSS_MULTIPLIER,
            spot_price: snapshot.spot_price,
            pcr,
            rsi,
            oi_change_pct: oi.change_pct,
            market_context: market_context(kind, &scores),
            generated_at: now,
            validity_secs: self.thresholds.validity.num_seconds(),
        })
    }

    /// Flow score from the put/call ratio
    pub fn flow_score(&self, kind: SignalKind, pcr: f64) -> f64 {
        let t = &self.thresholds;
        match kind {
            SignalKind::BuyCe if pcr < t.pcr_bullish_max => {
                (0.5 + (t.pcr_bullish_max - pcr) / t.pcr_bullish_max).min(1.0)
            }
            SignalKind::BuyPe if pcr > t.pcr_bearish_min => {
                (0.5 + (pcr - t.pcr_bearish_min) / t.pcr_bearish_min).min(1.0)
            }
            _ => 0.0,
        }
    }

    /// Momentum score from the RSI transition `previous -> current`
    pub fn momentum_score(&self, kind: SignalKind, current: f64, previous: f64) -> f64 {
        let t = &self.thresholds;
        match kind {
            SignalKind::BuyCe => {
                if previous <= t.rsi_oversold_max
                    && current > t.rsi_oversold_max
                    && current <= t.rsi_oversold_recovery
                {
                    1.0
                } else if current <= t.rsi_oversold_recovery && current > previous {
                    RSI_PARTIAL_CREDIT
                } else {
                    0.0
                }
            }
            SignalKind::BuyPe => {
                if previous >= t.rsi_overbought_min
                    && current < t.rsi_overbought_min
                    && current >= t.rsi_overbought_decline
                {
                    1.0
                } else if current >= t.rsi_overbought_decline && current < previous {
                    RSI_PARTIAL_CREDIT
                } else {
                    0.0
                }
            }
        }
    }

    /// Participation score from open interest on the relevant side
    pub fn participation_score(&self, oi: &OpenInterest) -> f64 {
        if oi.change_pct <= 0.0 {
            return 0.0;
        }
        if oi.change_pct >= self.thresholds.oi_significant_change_pct
            && oi.total >= self.thresholds.oi_min_level
        {
            1.0
        } else {
            OI_PARTIAL_CREDIT
        }
    }
}

impl SignalStrategy for SignalScorer {
    fn score(&self, snapshot: &MarketSnapshot, now: DateTime<Utc>) -> Vec<SignalCandidate> {
        SignalScorer::score(self, snapshot, now)
    }

    fn name(&self) -> &str {
        "PCR/RSI/OI composite"
    }
}

fn market_context(kind: SignalKind, scores: &SubScores) -> String {
    let mut parts = Vec::new();

    if scores.flow > CONTEXT_THRESHOLD {
        parts.push(if kind.is_bullish() {
            "Strong PCR bullish"
        } else {
            "Strong PCR bearish"
        });
    }
    if scores.momentum > CONTEXT_THRESHOLD {
        parts.push(if kind.is_bullish() {
            "RSI recovery"
        } else {
            "RSI decline"
        });
    }
    if scores.participation > CONTEXT_THRESHOLD {
        parts.push("OI buildup");
    }

    if parts.is_empty() {
        return if kind.is_bullish() {
            "Bullish momentum".to_string()
        } else {
            "Bearish momentum".to_string()
        };
    }
    parts.join(" + ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 5, 0, 0).unwrap()
    }

    /// Snapshot with PCR = put_oi / call_oi
    fn snapshot(
        call_oi: f64,
        put_oi: f64,
        previous_rsi: f64,
        rsi: f64,
        call_change: f64,
        put_change: f64,
    ) -> MarketSnapshot {
        MarketSnapshot {
            symbol: "NIFTY".to_string(),
            spot_price: 21_010.0,
            rsi: Some(rsi),
            previous_rsi: Some(previous_rsi),
            atm_strike: 21_000.0,
            calls: OpenInterest {
                total: call_oi,
                change_pct: call_change,
            },
            puts: OpenInterest {
                total: put_oi,
                change_pct: put_change,
            },
            timestamp: now(),
        }
    }

    #[test]
    fn test_full_bullish_setup_is_high() {
        // PCR 0.5, RSI 28 -> 45, CE OI +20% at 50k
        let scorer = SignalScorer::default();
        let snap = snapshot(50_000.0, 25_000.0, 28.0, 45.0, 20.0, 0.0);

        let candidates = scorer.score(&snap, now());

        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.kind, SignalKind::BuyCe);
        assert!(c.scores.flow > 0.0 && c.scores.momentum > 0.0 && c.scores.participation > 0.0);
        assert!(c.confidence >= 0.8, "confidence {}", c.confidence);
        assert_eq!(c.strength, SignalStrength::High);
        assert_eq!(c.strike_price, 21_000.0);
        assert_eq!(c.market_context, "Strong PCR bullish + RSI recovery + OI buildup");
    }

    #[test]
    fn test_partial_credit_setup_is_medium() {
        // Same PCR, RSI 45 -> 48 (no crossing), CE OI +5%
        let scorer = SignalScorer::default();
        let snap = snapshot(50_000.0, 25_000.0, 45.0, 48.0, 5.0, 0.0);

        let candidates = scorer.score(&snap, now());

        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.scores.momentum, 0.6);
        assert_eq!(c.scores.participation, 0.5);
        // flow = 0.5 + 0.2/0.7
        assert!((c.scores.flow - (0.5 + 0.2 / 0.7)).abs() < 1e-9);
        assert!(c.confidence >= 0.6 && c.confidence < 0.8, "confidence {}", c.confidence);
        assert_eq!(c.strength, SignalStrength::Medium);
    }

    #[test]
    fn test_confidence_always_in_unit_range() {
        let scorer = SignalScorer::default();
        for (call, put) in [(100_000.0, 1.0), (1.0, 100_000.0), (50_000.0, 50_000.0)] {
            for (prev, cur) in [(10.0, 35.0), (90.0, 60.0), (50.0, 50.0), (0.0, 100.0)] {
                let snap = snapshot(call, put, prev, cur, 500.0, 500.0);
                for c in scorer.score(&snap, now()) {
                    assert!((0.0..=1.0).contains(&c.confidence));
                    for v in c.scores.values() {
                        assert!((0.0..=1.0).contains(&v));
                    }
                }
            }
        }
    }

    #[test]
    fn test_single_component_is_rejected() {
        // Only flow is positive: RSI flat at 60, no OI change
        let scorer = SignalScorer::default();
        let snap = snapshot(50_000.0, 25_000.0, 60.0, 60.0, 0.0, 0.0);
        assert!(scorer.score(&snap, now()).is_empty());
    }

    #[test]
    fn test_bearish_mirror() {
        // PCR 1.6, RSI 75 -> 65, PE OI +25% at 80k
        let scorer = SignalScorer::default();
        let snap = snapshot(50_000.0, 80_000.0, 75.0, 65.0, 0.0, 25.0);

        let candidates = scorer.score(&snap, now());

        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.kind, SignalKind::BuyPe);
        assert_eq!(c.scores.momentum, 1.0);
        assert_eq!(c.scores.participation, 1.0);
        assert_eq!(c.oi_change_pct, 25.0);
        assert_eq!(c.strength, SignalStrength::High);
        assert!(c.market_context.contains("RSI decline"));
    }

    #[test]
    fn test_missing_data_yields_nothing() {
        let scorer = SignalScorer::default();

        let mut no_rsi = snapshot(50_000.0, 25_000.0, 28.0, 45.0, 20.0, 0.0);
        no_rsi.rsi = None;
        assert!(scorer.score(&no_rsi, now()).is_empty());

        let zero_calls = snapshot(0.0, 25_000.0, 28.0, 45.0, 20.0, 0.0);
        assert!(scorer.score(&zero_calls, now()).is_empty());

        let mut bad_spot = snapshot(50_000.0, 25_000.0, 28.0, 45.0, 20.0, 0.0);
        bad_spot.spot_price = f64::NAN;
        assert!(scorer.score(&bad_spot, now()).is_empty());
    }

    #[test]
    fn test_missing_previous_rsi_has_no_transition() {
        let scorer = SignalScorer::default();
        let mut snap = snapshot(50_000.0, 25_000.0, 0.0, 45.0, 20.0, 0.0);
        snap.previous_rsi = None;

        let candidates = scorer.score(&snap, now());

        // flow and participation still corroborate
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].scores.momentum, 0.0);
    }

    #[test]
    fn test_flow_thresholds_are_strict() {
        let scorer = SignalScorer::default();
        assert_eq!(scorer.flow_score(SignalKind::BuyCe, 0.7), 0.0);
        assert_eq!(scorer.flow_score(SignalKind::BuyPe, 1.3), 0.0);
        assert_eq!(scorer.flow_score(SignalKind::BuyCe, 0.1), 1.0);
        assert_eq!(scorer.flow_score(SignalKind::BuyPe, 3.0), 1.0);
    }

    #[test]
    fn test_premium_and_levels() {
        let scorer = SignalScorer::default();

        // CE: intrinsic 10 + 30 < floor 50
        let snap = snapshot(50_000.0, 25_000.0, 28.0, 45.0, 20.0, 0.0);
        let c = &scorer.score(&snap, now())[0];
        assert_eq!(c.premium, 50.0);
        assert!((c.target - 66.5).abs() < 1e-9);
        assert!((c.stop_loss - 40.0).abs() < 1e-9);

        // Deep ITM call: 21100 - 21000 + 30
        let mut deep = snap.clone();
        deep.spot_price = 21_100.0;
        let c = &scorer.score(&deep, now())[0];
        assert_eq!(c.premium, 130.0);
    }

    #[test]
    fn test_validity_from_config() {
        let cfg = SignalsConfig {
            validity_minutes: 20,
            ..SignalsConfig::default()
        };
        let scorer = SignalScorer::new(ScoringThresholds::from(&cfg));
        let snap = snapshot(50_000.0, 25_000.0, 28.0, 45.0, 20.0, 0.0);
        let c = &scorer.score(&snap, now())[0];
        assert_eq!(c.generated_at, now());
        assert_eq!(c.expiry_time(), now() + Duration::minutes(20));
    }

    #[test]
    fn test_weak_context_falls_back_to_direction() {
        let scores = SubScores {
            flow: 0.6,
            momentum: 0.6,
            participation: 0.5,
        };
        assert_eq!(market_context(SignalKind::BuyCe, &scores), "Bullish momentum");
        assert_eq!(market_context(SignalKind::BuyPe, &scores), "Bearish momentum");
    }
}

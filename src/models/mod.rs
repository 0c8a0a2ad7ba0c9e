use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Open-interest aggregate for one side (calls or puts) inside the ATM window
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct OpenInterest {
    pub total: f64,
    pub change_pct: f64, // Period-over-period change, in percent
}

/// Point-in-time market features for one symbol
///
/// Produced outside the engine (underlying quote + option chain summary) and
/// consumed read-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub spot_price: f64,
    pub rsi: Option<f64>,
    pub previous_rsi: Option<f64>,
    pub atm_strike: f64,
    pub calls: OpenInterest,
    pub puts: OpenInterest,
    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Put/call open-interest ratio, 0.0 when call OI is not positive
    pub fn pcr(&self) -> f64 {
        if self.calls.total > 0.0 {
            self.puts.total / self.calls.total
        } else {
            0.0
        }
    }
}

/// Latest quote for the underlying index
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnderlyingQuote {
    pub symbol: String,
    pub spot_price: f64,
    pub rsi: Option<f64>,
    pub previous_rsi: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Open-interest aggregates inside the ATM strike window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptionChainSummary {
    pub symbol: String,
    pub atm_strike: f64,
    pub calls: OpenInterest,
    pub puts: OpenInterest,
    pub timestamp: DateTime<Utc>,
}

/// One piece of fetched market data
#[derive(Debug, Clone, PartialEq)]
pub enum SourcePayload {
    Underlying(UnderlyingQuote),
    OptionChain(OptionChainSummary),
}

impl SourcePayload {
    pub fn symbol(&self) -> &str {
        match self {
            SourcePayload::Underlying(q) => &q.symbol,
            SourcePayload::OptionChain(c) => &c.symbol,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SourcePayload::Underlying(q) => q.timestamp,
            SourcePayload::OptionChain(c) => c.timestamp,
        }
    }
}

/// Direction of a recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SignalKind {
    #[serde(rename = "BUY_CE")]
    BuyCe,
    #[serde(rename = "BUY_PE")]
    BuyPe,
}

impl SignalKind {
    pub const ALL: [SignalKind; 2] = [SignalKind::BuyCe, SignalKind::BuyPe];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::BuyCe => "BUY_CE",
            SignalKind::BuyPe => "BUY_PE",
        }
    }

    pub fn is_bullish(&self) -> bool {
        matches!(self, SignalKind::BuyCe)
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strength tier derived from confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalStrength {
    Low,
    Medium,
    High,
}

impl SignalStrength {
    pub const MEDIUM_THRESHOLD: f64 = 0.6;
    pub const HIGH_THRESHOLD: f64 = 0.8;

    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= Self::HIGH_THRESHOLD {
            SignalStrength::High
        } else if confidence >= Self::MEDIUM_THRESHOLD {
            SignalStrength::Medium
        } else {
            SignalStrength::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStrength::Low => "LOW",
            SignalStrength::Medium => "MEDIUM",
            SignalStrength::High => "HIGH",
        }
    }
}

/// Named sub-scores, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct SubScores {
    pub flow: f64,          // Put/call ratio
    pub momentum: f64,      // RSI transition
    pub participation: f64, // Open-interest build-up
}

impl SubScores {
    pub fn values(&self) -> [f64; 3] {
        [self.flow, self.momentum, self.participation]
    }

    /// Arithmetic mean of the three components
    pub fn mean(&self) -> f64 {
        self.values().iter().sum::<f64>() / 3.0
    }

    /// Number of strictly positive components
    pub fn corroborating(&self) -> usize {
        self.values().iter().filter(|v| **v > 0.0).count()
    }
}

/// A scored, immutable trading recommendation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalCandidate {
    pub id: Uuid,
    pub symbol: String,
    pub kind: SignalKind,
    pub strike_price: f64,
    pub scores: SubScores,
    pub confidence: f64,
    pub strength: SignalStrength,
    pub premium: f64,
    pub target: f64,
    pub stop_loss: f64,
    pub spot_price: f64,
    pub pcr: f64,
    pub rsi: f64,
    pub oi_change_pct: f64,
    pub market_context: String,
    pub generated_at: DateTime<Utc>,
    pub validity_secs: i64,
}

impl SignalCandidate {
    pub fn validity(&self) -> Duration {
        Duration::seconds(self.validity_secs)
    }

    /// `generated_at + validity`
    pub fn expiry_time(&self) -> DateTime<Utc> {
        self.generated_at + self.validity()
    }
}

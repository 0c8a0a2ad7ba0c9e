// Signal scoring
pub mod scorer;

pub use scorer::{ScoringThresholds, SignalScorer};

use chrono::{DateTime, Utc};

use crate::models::{MarketSnapshot, SignalCandidate};

/// Base trait for signal scoring strategies
pub trait SignalStrategy: Send + Sync {
    /// Produce zero or more candidates from one snapshot. Never fails:
    /// missing data means no candidates.
    fn score(&self, snapshot: &MarketSnapshot, now: DateTime<Utc>) -> Vec<SignalCandidate>;

    /// Get strategy name
    fn name(&self) -> &str;
}

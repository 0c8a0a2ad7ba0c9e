use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::ProviderError;
use crate::models::{MarketSnapshot, OptionChainSummary, SourcePayload, UnderlyingQuote};

/// Pull interface for the latest market snapshot
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// `Ok(None)` when data is not (yet) available. Never returns a partial snapshot.
    async fn latest(&self, symbol: &str) -> Result<Option<MarketSnapshot>, ProviderError>;
}

#[derive(Debug, Default)]
struct SymbolParts {
    quote: Option<UnderlyingQuote>,
    chain: Option<OptionChainSummary>,
}

/// Thread-safe latest-value slot per symbol
///
/// The scheduler publishes fetched parts; the monitor reads a combined
/// snapshot. Parts older than what is already held are rejected, so the
/// snapshot timestamp never moves backwards.
#[derive(Clone, Default)]
pub struct SnapshotBuffer {
    data: Arc<RwLock<HashMap<String, SymbolParts>>>,
}

impl SnapshotBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a fetched payload
    ///
    /// Returns `Ok(false)` if the payload is older than the held one.
    pub fn publish(&self, payload: SourcePayload) -> Result<bool, ProviderError> {
        let mut data = self.data.write().map_err(|_| ProviderError::Poisoned)?;
        let parts = data.entry(payload.symbol().to_string()).or_default();

        match payload {
            SourcePayload::Underlying(quote) => {
                if let Some(held) = &parts.quote {
                    if quote.timestamp < held.timestamp {
                        tracing::warn!(symbol = %quote.symbol, "Out-of-order underlying quote ignored");
                        return Ok(false);
                    }
                }
                parts.quote = Some(quote);
            }
            SourcePayload::OptionChain(chain) => {
                if let Some(held) = &parts.chain {
                    if chain.timestamp < held.timestamp {
                        tracing::warn!(symbol = %chain.symbol, "Out-of-order option chain ignored");
                        return Ok(false);
                    }
                }
                parts.chain = Some(chain);
            }
        }
        Ok(true)
    }

    /// Combined snapshot, or None until both parts have arrived
    pub fn snapshot(&self, symbol: &str) -> Result<Option<MarketSnapshot>, ProviderError> {
        let data = self.data.read().map_err(|_| ProviderError::Poisoned)?;

        let Some(SymbolParts {
            quote: Some(quote),
            chain: Some(chain),
        }) = data.get(symbol)
        else {
            return Ok(None);
        };

        Ok(Some(MarketSnapshot {
            symbol: symbol.to_string(),
            spot_price: quote.spot_price,
            rsi: quote.rsi,
            previous_rsi: quote.previous_rsi,
            atm_strike: chain.atm_strike,
            calls: chain.calls,
            puts: chain.puts,
            timestamp: quote.timestamp.max(chain.timestamp),
        }))
    }
}

#[async_trait]
impl SnapshotProvider for SnapshotBuffer {
    async fn latest(&self, symbol: &str) -> Result<Option<MarketSnapshot>, ProviderError> {
        self.snapshot(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OpenInterest;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 5, 0, 0).unwrap()
    }

    fn quote(spot: f64, at: DateTime<Utc>) -> SourcePayload {
        SourcePayload::Underlying(UnderlyingQuote {
            symbol: "NIFTY".to_string(),
            spot_price: spot,
            rsi: Some(45.0),
            previous_rsi: Some(28.0),
            timestamp: at,
        })
    }

    fn chain(at: DateTime<Utc>) -> SourcePayload {
        SourcePayload::OptionChain(OptionChainSummary {
            symbol: "NIFTY".to_string(),
            atm_strike: 21_000.0,
            calls: OpenInterest {
                total: 50_000.0,
                change_pct: 20.0,
            },
            puts: OpenInterest {
                total: 25_000.0,
                change_pct: 1.0,
            },
            timestamp: at,
        })
    }

    #[test]
    fn test_no_partial_snapshots() {
        let buffer = SnapshotBuffer::new();
        assert!(buffer.snapshot("NIFTY").unwrap().is_none());

        buffer.publish(quote(21_010.0, t0())).unwrap();
        assert!(buffer.snapshot("NIFTY").unwrap().is_none());

        buffer.publish(chain(t0())).unwrap();
        let snap = buffer.snapshot("NIFTY").unwrap().unwrap();
        assert_eq!(snap.spot_price, 21_010.0);
        assert_eq!(snap.pcr(), 0.5);
    }

    #[test]
    fn test_rejects_older_parts() {
        let buffer = SnapshotBuffer::new();
        buffer.publish(quote(21_010.0, t0())).unwrap();
        buffer.publish(chain(t0())).unwrap();

        let accepted = buffer
            .publish(quote(20_000.0, t0() - Duration::minutes(5)))
            .unwrap();
        assert!(!accepted);
        assert_eq!(buffer.snapshot("NIFTY").unwrap().unwrap().spot_price, 21_010.0);
    }

    #[test]
    fn test_timestamp_is_newest_part() {
        let buffer = SnapshotBuffer::new();
        buffer.publish(quote(21_010.0, t0())).unwrap();
        buffer.publish(chain(t0() + Duration::minutes(1))).unwrap();

        let snap = buffer.snapshot("NIFTY").unwrap().unwrap();
        assert_eq!(snap.timestamp, t0() + Duration::minutes(1));
    }

    #[tokio::test]
    async fn test_provider_trait() {
        let buffer = SnapshotBuffer::new();
        let provider: Arc<dyn SnapshotProvider> = Arc::new(buffer.clone());
        assert!(provider.latest("NIFTY").await.unwrap().is_none());

        buffer.publish(quote(21_010.0, t0())).unwrap();
        buffer.publish(chain(t0())).unwrap();
        assert!(provider.latest("NIFTY").await.unwrap().is_some());
    }
}

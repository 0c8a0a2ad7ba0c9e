use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::SignalCandidate;
use crate::persistence::SignalStore;
use crate::Result;

/// Postgres signal history (`trading_signals` table)
pub struct PostgresSignalStore {
    pool: PgPool,
}

impl PostgresSignalStore {
    /// Connect to Postgres and run pending migrations
    ///
    /// # Arguments
    /// * `database_url` - Postgres connection URL
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres");

        Ok(Self { pool })
    }

    /// Count signals per delivery outcome: (delivered, failed, pending)
    pub async fn delivery_summary(&self) -> std::result::Result<(i64, i64, i64), StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE delivered = TRUE) AS delivered,
                COUNT(*) FILTER (WHERE delivered = FALSE) AS failed,
                COUNT(*) FILTER (WHERE delivered IS NULL) AS pending
            FROM trading_signals
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok((row.get("delivered"), row.get("failed"), row.get("pending")))
    }

    #[cfg(test)]
    pub async fn clear_all_signals(&self) -> std::result::Result<(), StoreError> {
        sqlx::query("DELETE FROM trading_signals")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SignalStore for PostgresSignalStore {
    async fn save_signal(&self, signal: &SignalCandidate) -> std::result::Result<(), StoreError> {
        let payload = serde_json::to_string(signal)?;

        sqlx::query(
            r#"
            INSERT INTO trading_signals (
                id, symbol, signal_type, strike_price, signal_strength,
                confidence_score, pcr_value, rsi_value, oi_change_pct, spot_price,
                premium_price, target_price, stop_loss, market_context,
                generated_at, validity_minutes, payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(signal.id)
        .bind(&signal.symbol)
        .bind(signal.kind.as_str())
        .bind(signal.strike_price)
        .bind(signal.strength.as_str())
        .bind(signal.confidence)
        .bind(signal.pcr)
        .bind(signal.rsi)
        .bind(signal.oi_change_pct)
        .bind(signal.spot_price)
        .bind(signal.premium)
        .bind(signal.target)
        .bind(signal.stop_loss)
        .bind(&signal.market_context)
        .bind(signal.generated_at)
        .bind((signal.validity_secs / 60) as i32)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Saved signal {} ({}) to Postgres", signal.id, signal.kind);

        Ok(())
    }

    async fn load_recent_signals(
        &self,
        symbol: &str,
        window: Duration,
    ) -> std::result::Result<Vec<SignalCandidate>, StoreError> {
        let cutoff = Utc::now() - window;

        let rows = sqlx::query(
            r#"
            SELECT payload
            FROM trading_signals
            WHERE symbol = $1 AND generated_at >= $2
            ORDER BY generated_at ASC
            "#,
        )
        .bind(symbol)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut signals = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.get("payload");
            signals.push(serde_json::from_str(&payload)?);
        }

        Ok(signals)
    }

    async fn mark_delivery(&self, id: Uuid, delivered: bool) -> std::result::Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE trading_signals
            SET delivered = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(delivered)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn cleanup_older_than(&self, keep: Duration) -> std::result::Result<usize, StoreError> {
        let cutoff = Utc::now() - keep;

        let result = sqlx::query("DELETE FROM trading_signals WHERE generated_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() as usize;
        if removed > 0 {
            tracing::info!("Removed {} signals older than {} days", removed, keep.num_days());
        }

        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

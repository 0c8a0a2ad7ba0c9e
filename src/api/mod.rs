pub mod feature_service;
pub mod telegram;

pub use feature_service::{FeatureServiceClient, OptionChainSource, UnderlyingSource};
pub use telegram::TelegramNotifier;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::models::SourcePayload;

/// One upstream market data feed polled by the scheduler
#[async_trait]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, symbol: &str) -> Result<SourcePayload, FetchError>;
}

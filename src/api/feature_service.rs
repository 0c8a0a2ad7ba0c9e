use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use super::DataSource;
use crate::error::FetchError;
use crate::models::{OptionChainSummary, SourcePayload, UnderlyingQuote};

const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Client for the feature service that serves pre-computed market features
///
/// Endpoints:
/// * `GET {base}/underlying/{symbol}` - spot price and the last two RSI samples
/// * `GET {base}/option-chain/{symbol}` - ATM-window open-interest aggregates
#[derive(Clone)]
pub struct FeatureServiceClient {
    client: Client,
    base_url: String,
}

impl FeatureServiceClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        source_name: &'static str,
        path: &str,
    ) -> Result<T, FetchError> {
        let url = format!("{}/{}", self.base_url, path);

        let response = self.client.get(&url).send().await.map_err(|e| FetchError::Transient {
            source_name,
            message: e.without_url().to_string(),
        })?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_FOUND {
            return Err(FetchError::Empty { source_name });
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(FetchError::Transient {
                source_name,
                message: format!("HTTP {}", status),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Rejected {
                source_name,
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| FetchError::Transient {
            source_name,
            message: e.without_url().to_string(),
        })?;
        if body.trim().is_empty() {
            return Err(FetchError::Empty { source_name });
        }

        serde_json::from_str(&body).map_err(|e| FetchError::Malformed {
            source_name,
            message: e.to_string(),
        })
    }

    pub async fn underlying(&self, symbol: &str) -> Result<UnderlyingQuote, FetchError> {
        let quote: UnderlyingQuote = self
            .get_json("underlying", &format!("underlying/{}", symbol))
            .await?;
        if !quote.spot_price.is_finite() || quote.spot_price <= 0.0 {
            return Err(FetchError::Malformed {
                source_name: "underlying",
                message: format!("invalid spot price {}", quote.spot_price),
            });
        }
        Ok(quote)
    }

    pub async fn option_chain(&self, symbol: &str) -> Result<OptionChainSummary, FetchError> {
        let chain: OptionChainSummary = self
            .get_json("option_chain", &format!("option-chain/{}", symbol))
            .await?;
        // An all-zero chain means the exchange has not published yet
        if chain.calls.total <= 0.0 && chain.puts.total <= 0.0 {
            return Err(FetchError::Empty {
                source_name: "option_chain",
            });
        }
        Ok(chain)
    }
}

/// Underlying spot + RSI source
#[derive(Clone)]
pub struct UnderlyingSource {
    client: FeatureServiceClient,
}

impl UnderlyingSource {
    pub fn new(client: FeatureServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DataSource for UnderlyingSource {
    fn name(&self) -> &'static str {
        "underlying"
    }

    async fn fetch(&self, symbol: &str) -> Result<SourcePayload, FetchError> {
        self.client.underlying(symbol).await.map(SourcePayload::Underlying)
    }
}

/// Option chain open-interest source
#[derive(Clone)]
pub struct OptionChainSource {
    client: FeatureServiceClient,
}

impl OptionChainSource {
    pub fn new(client: FeatureServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DataSource for OptionChainSource {
    fn name(&self) -> &'static str {
        "option_chain"
    }

    async fn fetch(&self, symbol: &str) -> Result<SourcePayload, FetchError> {
        self.client
            .option_chain(symbol)
            .await
            .map(SourcePayload::OptionChain)
    }
}

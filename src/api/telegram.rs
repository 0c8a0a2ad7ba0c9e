use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::error::NotifyError;
use crate::notify::Notifier;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const RATE_LIMIT_PER_MINUTE: u32 = 20; // Bot API limit for a single group chat

// Type alias for the rate limiter to simplify signatures
type TelegramRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram Bot API notifier
///
/// Cloneable; all clones share one rate limiter.
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    base_url: String,
    bot_token: String,
    chat_id: String,
    rate_limiter: Arc<TelegramRateLimiter>,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> anyhow::Result<Self> {
        Self::with_base_url(TELEGRAM_API_BASE.to_string(), bot_token, chat_id)
    }

    /// Point the client at another API host (used by tests)
    pub fn with_base_url(base_url: String, bot_token: String, chat_id: String) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        let per_minute = NonZeroU32::new(RATE_LIMIT_PER_MINUTE).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)));

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bot_token,
            chat_id,
            rate_limiter,
        })
    }

    /// Build from `TELEGRAM_BOT_TOKEN` / `TELEGRAM_CHAT_ID`, None if either is unset
    pub fn from_env() -> Option<anyhow::Result<Self>> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN").ok().filter(|t| !t.is_empty())?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok().filter(|c| !c.is_empty())?;
        Some(Self::new(token, chat_id))
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn deliver(&self, text: &str) -> Result<(), NotifyError> {
        // Wait for rate limiter
        self.rate_limiter.until_ready().await;

        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        let payload = response
            .text()
            .await
            .map_err(|e| NotifyError::Transport(e.without_url().to_string()))?;

        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body: payload,
            });
        }

        match serde_json::from_str::<TelegramResponse>(&payload) {
            Ok(TelegramResponse { ok: true, .. }) => {
                tracing::debug!("Telegram message delivered");
                Ok(())
            }
            Ok(TelegramResponse { description, .. }) => Err(NotifyError::Rejected {
                status: status.as_u16(),
                body: description.unwrap_or_default(),
            }),
            Err(e) => Err(NotifyError::Transport(format!("unexpected Telegram response: {}", e))),
        }
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}

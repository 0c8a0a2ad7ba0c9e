use std::path::Path;

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::market::MarketWindow;
use crate::retry::RetryPolicy;

const DEFAULT_CONFIG_FILE: &str = "config/settings";
const ENV_PREFIX: &str = "FNOBOT";

/// Upper bounds that keep every derived duration and timestamp in range
const MAX_SIGNAL_MINUTES: i64 = 24 * 60;
const MAX_EXPIRY_BUFFER_SECONDS: i64 = 60 * 60;
const MAX_INTERVAL_SECONDS: u64 = 24 * 60 * 60;
const MAX_RETENTION_DAYS: i64 = 3650;

/// Exchange session settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub start_time: String,
    pub end_time: String,
    pub timezone: String,
    pub pre_market_fetch: bool,
    pub post_market_fetch: bool,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            start_time: "09:15".to_string(),
            end_time: "15:30".to_string(),
            timezone: "Asia/Kolkata".to_string(),
            pre_market_fetch: false,
            post_market_fetch: false,
        }
    }
}

/// How repeat signals of the same kind are suppressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuppressionMode {
    /// A kind may not be re-emitted while its previous signal is still active
    #[default]
    Renewal,
    /// A kind may not be re-emitted until `cooldown_minutes` after its last emission
    Cooldown,
}

/// Scoring thresholds and emission limits
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SignalsConfig {
    pub enabled: bool,
    pub symbol: String,
    pub market_hours_only: bool,
    pub confidence_threshold: f64,

    // PCR thresholds
    pub pcr_bullish_max: f64,
    pub pcr_bearish_min: f64,

    // RSI thresholds
    pub rsi_oversold_max: f64,
    pub rsi_oversold_recovery: f64,
    pub rsi_overbought_min: f64,
    pub rsi_overbought_decline: f64,

    // OI thresholds
    pub oi_significant_change_pct: f64,
    pub oi_min_level: f64,

    pub mode: SuppressionMode,
    pub cooldown_minutes: i64,
    pub validity_minutes: i64,
    pub expiry_buffer_seconds: i64,
    pub max_signals_per_hour: usize,

    // Premium estimate
    pub premium_floor: f64,
    pub premium_time_value: f64,
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            symbol: "NIFTY".to_string(),
            market_hours_only: true,
            confidence_threshold: 0.7,
            pcr_bullish_max: 0.7,
            pcr_bearish_min: 1.3,
            rsi_oversold_max: 30.0,
            rsi_oversold_recovery: 50.0,
            rsi_overbought_min: 70.0,
            rsi_overbought_decline: 50.0,
            oi_significant_change_pct: 15.0,
            oi_min_level: 10_000.0,
            mode: SuppressionMode::Renewal,
            cooldown_minutes: 15,
            validity_minutes: 15,
            expiry_buffer_seconds: 30,
            max_signals_per_hour: 6,
            premium_floor: 50.0,
            premium_time_value: 30.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_seconds: u64,
    pub max_error_backoff_seconds: u64,
    pub status_log_every_cycles: u64,
    pub error_alert_every: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 120,
            max_error_backoff_seconds: 60,
            status_log_every_cycles: 10,
            error_alert_every: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub fetch_interval_seconds: u64,
    pub max_consecutive_failures: u32,
    pub retention_days: i64,
    pub feature_service_url: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            fetch_interval_seconds: 300,
            max_consecutive_failures: 10,
            retention_days: 30,
            feature_service_url: "http://127.0.0.1:8000".to_string(),
        }
    }
}

/// Complete runtime configuration, validated once at startup
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub market: MarketConfig,
    pub retry: RetryPolicy,
    pub signals: SignalsConfig,
    pub monitor: MonitorConfig,
    pub scheduler: SchedulerConfig,
}

impl AppConfig {
    /// Load defaults, then the settings file, then `FNOBOT__SECTION__KEY` env vars
    ///
    /// When `path` is given the file must exist; otherwise `config/settings.*`
    /// is read if present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let builder = config::Config::builder().add_source(file).add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        Self::from_builder(builder)
    }

    /// Parse a TOML document on top of the defaults
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Self::from_builder(
            config::Config::builder().add_source(File::from_str(contents, FileFormat::Toml)),
        )
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let cfg: AppConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check cross-field consistency. Any violation is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.signals;

        if s.pcr_bullish_max >= s.pcr_bearish_min {
            return invalid(format!(
                "pcr_bullish_max ({}) must be below pcr_bearish_min ({})",
                s.pcr_bullish_max, s.pcr_bearish_min
            ));
        }
        if s.pcr_bullish_max <= 0.0 {
            return invalid("pcr_bullish_max must be positive".to_string());
        }
        if !(0.0 <= s.rsi_oversold_max
            && s.rsi_oversold_max < s.rsi_oversold_recovery
            && s.rsi_oversold_recovery <= 100.0)
        {
            return invalid(format!(
                "expected 0 <= rsi_oversold_max ({}) < rsi_oversold_recovery ({}) <= 100",
                s.rsi_oversold_max, s.rsi_oversold_recovery
            ));
        }
        if !(0.0 <= s.rsi_overbought_decline
            && s.rsi_overbought_decline < s.rsi_overbought_min
            && s.rsi_overbought_min <= 100.0)
        {
            return invalid(format!(
                "expected 0 <= rsi_overbought_decline ({}) < rsi_overbought_min ({}) <= 100",
                s.rsi_overbought_decline, s.rsi_overbought_min
            ));
        }
        if !(s.confidence_threshold > 0.0 && s.confidence_threshold <= 1.0) {
            return invalid(format!(
                "confidence_threshold ({}) must be in (0, 1]",
                s.confidence_threshold
            ));
        }
        if s.max_signals_per_hour == 0 {
            return invalid("max_signals_per_hour must be greater than 0".to_string());
        }
        if s.validity_minutes <= 0 {
            return invalid("validity_minutes must be greater than 0".to_string());
        }
        if s.validity_minutes > MAX_SIGNAL_MINUTES {
            return invalid(format!(
                "validity_minutes ({}) must not exceed {}",
                s.validity_minutes, MAX_SIGNAL_MINUTES
            ));
        }
        if s.expiry_buffer_seconds < 0 || s.cooldown_minutes < 0 {
            return invalid("expiry_buffer_seconds and cooldown_minutes must not be negative".to_string());
        }
        if s.cooldown_minutes > MAX_SIGNAL_MINUTES {
            return invalid(format!(
                "cooldown_minutes ({}) must not exceed {}",
                s.cooldown_minutes, MAX_SIGNAL_MINUTES
            ));
        }
        if s.expiry_buffer_seconds > MAX_EXPIRY_BUFFER_SECONDS {
            return invalid(format!(
                "expiry_buffer_seconds ({}) must not exceed {}",
                s.expiry_buffer_seconds, MAX_EXPIRY_BUFFER_SECONDS
            ));
        }
        if s.symbol.trim().is_empty() {
            return invalid("signals.symbol must not be empty".to_string());
        }

        if self.retry.max_attempts < 1 {
            return invalid("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.backoff_multiplier < 1.0 {
            return invalid(format!(
                "retry.backoff_multiplier ({}) must be >= 1",
                self.retry.backoff_multiplier
            ));
        }

        if self.monitor.interval_seconds == 0 {
            return invalid("monitor.interval_seconds must be greater than 0".to_string());
        }
        if self.monitor.interval_seconds > MAX_INTERVAL_SECONDS
            || self.monitor.max_error_backoff_seconds > MAX_INTERVAL_SECONDS
        {
            return invalid(format!(
                "monitor.interval_seconds and max_error_backoff_seconds must not exceed {}",
                MAX_INTERVAL_SECONDS
            ));
        }
        if self.scheduler.fetch_interval_seconds == 0 {
            return invalid("scheduler.fetch_interval_seconds must be greater than 0".to_string());
        }
        if self.scheduler.fetch_interval_seconds > MAX_INTERVAL_SECONDS {
            return invalid(format!(
                "scheduler.fetch_interval_seconds ({}) must not exceed {}",
                self.scheduler.fetch_interval_seconds, MAX_INTERVAL_SECONDS
            ));
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.scheduler.retention_days) {
            return invalid(format!(
                "scheduler.retention_days ({}) must be in 1..={}",
                self.scheduler.retention_days, MAX_RETENTION_DAYS
            ));
        }

        MarketWindow::try_from(&self.market)?;
        Ok(())
    }
}

fn invalid(message: String) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid(message))
}

// Exchange trading-hours calendar
use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::config::MarketConfig;
use crate::error::ConfigError;

const PRE_MARKET_LEAD_HOURS: i64 = 1;
const POST_MARKET_TAIL_HOURS: i64 = 2;

/// Where an instant falls relative to the trading session (flags ignored)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MarketSession {
    Closed,
    PreMarket,
    Open,
    PostMarket,
}

/// Trading session boundaries in exchange-local time
#[derive(Debug, Clone, PartialEq)]
pub struct MarketWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub timezone: Tz,
    pub pre_market: bool,
    pub post_market: bool,
}

impl MarketWindow {
    pub fn new(start: NaiveTime, end: NaiveTime, timezone: Tz) -> Self {
        Self {
            start,
            end,
            timezone,
            pre_market: false,
            post_market: false,
        }
    }

    pub fn with_extended_hours(mut self, pre_market: bool, post_market: bool) -> Self {
        self.pre_market = pre_market;
        self.post_market = post_market;
        self
    }
}

impl TryFrom<&MarketConfig> for MarketWindow {
    type Error = ConfigError;

    fn try_from(cfg: &MarketConfig) -> Result<Self, Self::Error> {
        let start = parse_hhmm(&cfg.start_time)?;
        let end = parse_hhmm(&cfg.end_time)?;
        if start >= end {
            return Err(ConfigError::Invalid(format!(
                "market start_time ({}) must be before end_time ({})",
                cfg.start_time, cfg.end_time
            )));
        }

        let timezone: Tz = cfg.timezone.parse().map_err(|_| {
            ConfigError::Invalid(format!("unknown market timezone '{}'", cfg.timezone))
        })?;

        Ok(MarketWindow::new(start, end, timezone)
            .with_extended_hours(cfg.pre_market_fetch, cfg.post_market_fetch))
    }
}

fn parse_hhmm(value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|e| ConfigError::Invalid(format!("invalid market time '{}': {}", value, e)))
}

/// Answers "is the exchange trading now" and "should we be fetching now"
#[derive(Debug, Clone)]
pub struct MarketCalendar {
    window: MarketWindow,
}

impl MarketCalendar {
    pub fn new(window: MarketWindow) -> Self {
        Self { window }
    }

    pub fn window(&self) -> &MarketWindow {
        &self.window
    }

    /// Classify `now` against the session in exchange-local time
    pub fn session(&self, now: DateTime<Utc>) -> MarketSession {
        let local = now.with_timezone(&self.window.timezone);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return MarketSession::Closed;
        }

        let t = local.time();
        let start = self.window.start;
        let end = self.window.end;

        if t >= start && t <= end {
            return MarketSession::Open;
        }

        let (pre_start, wrapped) = start.overflowing_sub_signed(Duration::hours(PRE_MARKET_LEAD_HOURS));
        let pre_start = if wrapped != 0 {
            NaiveTime::from_hms_opt(0, 0, 0).unwrap_or(start)
        } else {
            pre_start
        };
        if t >= pre_start && t < start {
            return MarketSession::PreMarket;
        }

        let (post_end, wrapped) = end.overflowing_add_signed(Duration::hours(POST_MARKET_TAIL_HOURS));
        let post_end = if wrapped != 0 {
            NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(end)
        } else {
            post_end
        };
        if t > end && t <= post_end {
            return MarketSession::PostMarket;
        }

        MarketSession::Closed
    }

    /// True on weekdays when local time is in `[start, end]` (closed interval)
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.session(now) == MarketSession::Open
    }

    /// Trading hours plus the enabled pre/post-market extensions
    pub fn is_fetch_window(&self, now: DateTime<Utc>) -> bool {
        match self.session(now) {
            MarketSession::Open => true,
            MarketSession::PreMarket => self.window.pre_market,
            MarketSession::PostMarket => self.window.post_market,
            MarketSession::Closed => false,
        }
    }
}

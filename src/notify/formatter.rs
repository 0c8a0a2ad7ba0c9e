use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::models::{SignalCandidate, SignalKind, SignalStrength};

/// Monitor lifecycle states announced to the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Started,
    Stopped,
    Paused,
}

impl MonitorState {
    fn label(&self) -> (&'static str, &'static str) {
        match self {
            MonitorState::Started => ("✅", "STARTED"),
            MonitorState::Stopped => ("🛑", "STOPPED"),
            MonitorState::Paused => ("⏸️", "PAUSED"),
        }
    }
}

/// Renders signals and operational events as chat messages
///
/// Times are shown in the exchange timezone.
#[derive(Debug, Clone)]
pub struct SignalFormatter {
    timezone: Tz,
    pcr_bullish_max: f64,
    pcr_bearish_min: f64,
}

impl SignalFormatter {
    pub fn new(timezone: Tz, pcr_bullish_max: f64, pcr_bearish_min: f64) -> Self {
        Self {
            timezone,
            pcr_bullish_max,
            pcr_bearish_min,
        }
    }

    fn kind_emoji(kind: SignalKind) -> &'static str {
        match kind {
            SignalKind::BuyCe => "🚀",
            SignalKind::BuyPe => "🔻",
        }
    }

    fn strength_emoji(strength: SignalStrength) -> &'static str {
        match strength {
            SignalStrength::High => "🔥",
            SignalStrength::Medium => "⚡",
            SignalStrength::Low => "💫",
        }
    }

    /// Full five-line signal message
    pub fn signal_message(&self, signal: &SignalCandidate) -> String {
        let header = format!(
            "{} {} {:.0} @ ₹{:.1}",
            Self::kind_emoji(signal.kind),
            signal.kind.as_str().replace('_', " "),
            signal.strike_price,
            signal.premium
        );

        [
            header,
            self.technical_line(signal),
            format!("🎯 Target: ₹{:.1} | SL: ₹{:.1}", signal.target, signal.stop_loss),
            self.context_line(signal),
            self.timing_line(signal),
        ]
        .into_iter()
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
    }

    fn technical_line(&self, signal: &SignalCandidate) -> String {
        let pcr_trend = if signal.pcr <= self.pcr_bullish_max {
            "📈 Bullish"
        } else if signal.pcr >= self.pcr_bearish_min {
            "📉 Bearish"
        } else {
            "➡️ Neutral"
        };

        let mut parts = vec![
            format!("PCR: {:.2} {}", signal.pcr, pcr_trend),
            match signal.rsi {
                r if r <= 30.0 => format!("RSI: {:.1} (Oversold)", r),
                r if r >= 70.0 => format!("RSI: {:.1} (Overbought)", r),
                r => format!("RSI: {:.1}", r),
            },
        ];
        if signal.oi_change_pct != 0.0 {
            let arrow = if signal.oi_change_pct > 0.0 { "↗️" } else { "↘️" };
            parts.push(format!("OI Change: {}{:.1}%", arrow, signal.oi_change_pct.abs()));
        }

        format!("📊 {}", parts.join(" | "))
    }

    fn context_line(&self, signal: &SignalCandidate) -> String {
        let pct = (signal.confidence * 100.0).clamp(0.0, 100.0) as usize;
        let filled = (pct / 20).min(5);
        let bar = format!("{}{}", "█".repeat(filled), "░".repeat(5 - filled));

        let mut parts = vec![
            format!("Confidence: {}% {}", pct, bar),
            format!("Spot: ₹{:.1}", signal.spot_price),
        ];
        if !signal.market_context.is_empty() {
            parts.push(signal.market_context.clone());
        }

        format!("{} {}", Self::strength_emoji(signal.strength), parts.join(" | "))
    }

    fn timing_line(&self, signal: &SignalCandidate) -> String {
        let generated = signal.generated_at.with_timezone(&self.timezone);
        let valid_till = signal.expiry_time().with_timezone(&self.timezone);
        let urgency = match signal.strength {
            SignalStrength::High => "HIGH ⚡",
            other => other.as_str(),
        };

        format!(
            "⏰ Generated: {} | Valid till: {} | Urgency: {}",
            generated.format("%H:%M:%S"),
            valid_till.format("%H:%M"),
            urgency
        )
    }

    /// One message for several signals; a single signal gets the full format
    pub fn batch_message(&self, signals: &[SignalCandidate], now: DateTime<Utc>) -> String {
        match signals {
            [] => "📊 No signals generated".to_string(),
            [single] => self.signal_message(single),
            many => {
                let strikes = |kind: SignalKind| -> Vec<String> {
                    many.iter()
                        .filter(|s| s.kind == kind)
                        .map(|s| format!("{:.0}", s.strike_price))
                        .collect()
                };

                let mut lines = vec![format!("📊 SIGNAL BATCH ({} signals)", many.len())];
                let ce = strikes(SignalKind::BuyCe);
                if !ce.is_empty() {
                    lines.push(format!("🚀 CE: {}", ce.join(", ")));
                }
                let pe = strikes(SignalKind::BuyPe);
                if !pe.is_empty() {
                    lines.push(format!("🔻 PE: {}", pe.join(", ")));
                }
                lines.push(format!("⏰ {}", self.local(now, "%H:%M:%S")));
                lines.join("\n")
            }
        }
    }

    pub fn error_message(&self, context: &str, now: DateTime<Utc>) -> String {
        let mut msg = "❌ Signal Generation Error".to_string();
        if !context.is_empty() {
            msg.push_str(&format!("\n🔍 Context: {}", context));
        }
        msg.push_str(&format!("\n⏰ {}", self.local(now, "%H:%M:%S")));
        msg
    }

    pub fn status_message(&self, state: MonitorState, context: &str, now: DateTime<Utc>) -> String {
        let (emoji, label) = state.label();
        let mut msg = format!("{} Signal Monitor: {}", emoji, label);
        if !context.is_empty() {
            msg.push('\n');
            msg.push_str(context);
        }
        msg.push_str(&format!("\n⏰ {}", self.local(now, "%Y-%m-%d %H:%M:%S")));
        msg
    }

    pub fn fetch_alert_message(
        &self,
        consecutive_failures: u32,
        failed_sources: &[&str],
        now: DateTime<Utc>,
    ) -> String {
        format!(
            "🚨 Data Fetch Alert\n{} consecutive failed fetch cycles ({})\n⏰ {}",
            consecutive_failures,
            failed_sources.join(", "),
            self.local(now, "%Y-%m-%d %H:%M:%S")
        )
    }

    fn local(&self, at: DateTime<Utc>, fmt: &str) -> String {
        at.with_timezone(&self.timezone).format(fmt).to_string()
    }
}

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};

use crate::config::{SignalsConfig, SuppressionMode};
use crate::models::SignalKind;

const WINDOW_MINUTES: i64 = 60;

/// Emission limits
#[derive(Debug, Clone)]
pub struct EmissionLimits {
    pub max_signals_per_hour: usize,
    pub mode: SuppressionMode,
    pub cooldown: Duration,
}

impl Default for EmissionLimits {
    fn default() -> Self {
        Self::from(&SignalsConfig::default())
    }
}

impl From<&SignalsConfig> for EmissionLimits {
    fn from(cfg: &SignalsConfig) -> Self {
        Self {
            max_signals_per_hour: cfg.max_signals_per_hour,
            mode: cfg.mode,
            cooldown: Duration::minutes(cfg.cooldown_minutes),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EmissionBlock {
    HourlyCap { emitted: usize },
    Cooldown { remaining: Duration },
}

/// Hourly emission cap plus optional per-kind cooldown
///
/// History is in-memory only and pruned lazily to the trailing hour.
#[derive(Debug)]
pub struct EmissionLimiter {
    limits: EmissionLimits,
    history: VecDeque<DateTime<Utc>>, // All kinds, oldest first
    last_emission: HashMap<SignalKind, DateTime<Utc>>,
}

impl EmissionLimiter {
    pub fn new(limits: EmissionLimits) -> Self {
        Self {
            limits,
            history: VecDeque::new(),
            last_emission: HashMap::new(),
        }
    }

    pub fn mode(&self) -> SuppressionMode {
        self.limits.mode
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::minutes(WINDOW_MINUTES);
        while self.history.front().is_some_and(|t| *t <= cutoff) {
            self.history.pop_front();
        }
    }

    /// Check both gates for `kind` at `now`
    pub fn check(&mut self, kind: SignalKind, now: DateTime<Utc>) -> Result<(), EmissionBlock> {
        self.prune(now);

        if self.history.len() >= self.limits.max_signals_per_hour {
            return Err(EmissionBlock::HourlyCap {
                emitted: self.history.len(),
            });
        }

        if self.limits.mode == SuppressionMode::Cooldown {
            if let Some(last) = self.last_emission.get(&kind) {
                let since = now - *last;
                if since < self.limits.cooldown {
                    return Err(EmissionBlock::Cooldown {
                        remaining: self.limits.cooldown - since,
                    });
                }
            }
        }

        Ok(())
    }

    pub fn allow(&mut self, kind: SignalKind, now: DateTime<Utc>) -> bool {
        self.check(kind, now).is_ok()
    }

    /// True while the trailing-hour count is below the cap
    pub fn has_capacity(&mut self, now: DateTime<Utc>) -> bool {
        self.prune(now);
        self.history.len() < self.limits.max_signals_per_hour
    }

    pub fn record(&mut self, kind: SignalKind, at: DateTime<Utc>) {
        self.prune(at);
        self.history.push_back(at);
        self.last_emission.insert(kind, at);
    }

    /// Emissions left in the current window
    pub fn remaining(&mut self, now: DateTime<Utc>) -> usize {
        self.prune(now);
        self.limits
            .max_signals_per_hour
            .saturating_sub(self.history.len())
    }

    pub fn recent_count(&mut self, now: DateTime<Utc>) -> usize {
        self.prune(now);
        self.history.len()
    }

    pub fn last_emissions(&self) -> HashMap<SignalKind, DateTime<Utc>> {
        self.last_emission.clone()
    }
}

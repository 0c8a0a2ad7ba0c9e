use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::models::{SignalCandidate, SignalKind};

/// A tracked recommendation with its fixed expiry
#[derive(Debug, Clone, Serialize)]
pub struct ActiveSignal {
    pub signal: SignalCandidate,
    pub tracked_at: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
}

impl ActiveSignal {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry_time
    }

    pub fn time_remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expiry_time - now).max(Duration::zero())
    }
}

/// Per-kind active signal table
///
/// Holds at most one entry per `SignalKind`. An entry's expiry is fixed when
/// it is inserted; renewal always replaces the entry.
pub struct SignalLifecycleStore {
    active: HashMap<SignalKind, ActiveSignal>,
    expiry_buffer: Duration,
}

impl SignalLifecycleStore {
    pub fn new(expiry_buffer: Duration) -> Self {
        Self {
            active: HashMap::new(),
            expiry_buffer,
        }
    }

    /// Start tracking `candidate` unless a live signal of the same kind exists
    ///
    /// Returns true if the candidate was inserted.
    pub fn track(&mut self, candidate: SignalCandidate, now: DateTime<Utc>) -> bool {
        self.clear_expired(now);

        if let Some(existing) = self.active.get(&candidate.kind) {
            if !existing.is_expired(now) {
                tracing::debug!(
                    kind = %candidate.kind,
                    expires = %existing.expiry_time,
                    "Signal still active, renewal suppressed"
                );
                return false;
            }
        }

        self.insert(candidate, now);
        true
    }

    /// Replace whatever is tracked for the candidate's kind
    ///
    /// Only used when repeats are governed by a cooldown instead of expiry.
    pub fn supersede(&mut self, candidate: SignalCandidate, now: DateTime<Utc>) {
        self.clear_expired(now);
        if let Some(old) = self.active.get(&candidate.kind) {
            tracing::debug!(kind = %candidate.kind, old_id = %old.signal.id, "Superseding active signal");
        }
        self.insert(candidate, now);
    }

    fn insert(&mut self, candidate: SignalCandidate, now: DateTime<Utc>) {
        let expiry_time = now + candidate.validity();
        tracing::info!(
            kind = %candidate.kind,
            strike = candidate.strike_price,
            expires = %expiry_time,
            "📌 Tracking active signal {} @ {:.0}",
            candidate.kind,
            candidate.strike_price
        );
        self.active.insert(
            candidate.kind,
            ActiveSignal {
                signal: candidate,
                tracked_at: now,
                expiry_time,
            },
        );
    }

    /// True iff an entry exists for `kind` and `now < expiry_time`
    pub fn is_active(&mut self, kind: SignalKind, now: DateTime<Utc>) -> bool {
        self.clear_expired(now);
        self.active
            .get(&kind)
            .map(|entry| !entry.is_expired(now))
            .unwrap_or(false)
    }

    /// Remove every entry with `now >= expiry_time + buffer`
    pub fn clear_expired(&mut self, now: DateTime<Utc>) -> Vec<SignalKind> {
        let buffer = self.expiry_buffer;
        let expired: Vec<SignalKind> = self
            .active
            .iter()
            .filter(|(_, entry)| now >= entry.expiry_time + buffer)
            .map(|(kind, _)| *kind)
            .collect();

        for kind in &expired {
            if let Some(entry) = self.active.remove(kind) {
                tracing::info!(
                    kind = %kind,
                    strike = entry.signal.strike_price,
                    expired_at = %entry.expiry_time,
                    "⌛ Signal expired: {}",
                    kind
                );
            }
        }
        expired
    }

    /// Drop the entry for `kind` regardless of its expiry
    pub fn mark_expired(&mut self, kind: SignalKind) -> bool {
        let removed = self.active.remove(&kind).is_some();
        if removed {
            tracing::info!(kind = %kind, "Signal manually expired");
        }
        removed
    }

    /// Rebuild the table from persisted signals after a restart
    ///
    /// Newest candidate per kind wins; entries already past their expiry are ignored.
    pub fn restore(&mut self, candidates: Vec<SignalCandidate>, now: DateTime<Utc>) -> usize {
        let mut restored = 0;
        for candidate in candidates {
            let expiry_time = candidate.expiry_time();
            if now >= expiry_time {
                continue;
            }
            let newer = self
                .active
                .get(&candidate.kind)
                .map(|existing| candidate.generated_at > existing.signal.generated_at)
                .unwrap_or(true);
            if newer {
                self.active.insert(
                    candidate.kind,
                    ActiveSignal {
                        tracked_at: candidate.generated_at,
                        signal: candidate,
                        expiry_time,
                    },
                );
                restored += 1;
            }
        }

        if restored > 0 {
            tracing::info!("Restored {} active signals from persistence", self.active.len());
        }
        restored
    }

    pub fn get(&self, kind: SignalKind) -> Option<&ActiveSignal> {
        self.active.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Copy of the current table, ordered by kind
    pub fn snapshot(&self) -> Vec<ActiveSignal> {
        let mut entries: Vec<ActiveSignal> = self.active.values().cloned().collect();
        entries.sort_by_key(|e| e.signal.kind);
        entries
    }
}

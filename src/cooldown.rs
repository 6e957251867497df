//! Escalating cooldown bookkeeping per (target, trigger) pair.
//!
//! Every enforced disconnect bumps an attempt counter and extends a
//! "cooldown-until" timestamp along a fixed multiplier series. The
//! tracker is observational: the router never consults it to suppress
//! enforcement, it only records and reports escalation. A pair that
//! stays quiet for [`QUIET_PERIOD`] is purged and restarts from the base.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::registry::PairKey;

/// Base cooldown applied on the first disconnect.
pub const BASE_COOLDOWN: Duration = Duration::from_secs(5);

/// Escalation series applied to [`BASE_COOLDOWN`]: 5s, 10s, 30s, 1min, 5min.
pub const MULTIPLIERS: [u32; 5] = [1, 2, 6, 12, 60];

/// Quiet period after which a pair's escalation state is purged.
pub const QUIET_PERIOD: Duration = Duration::from_secs(300);

/// Cooldown state reported for a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownStatus {
    /// Whether the pair is currently inside a cooldown window.
    pub in_cooldown: bool,
    /// Time remaining until the cooldown elapses; zero when not in
    /// cooldown.
    pub remaining: Duration,
}

#[derive(Debug)]
struct CooldownEntry {
    attempts: u32,
    cooldown_until: Instant,
    last_attempt: Instant,
}

/// Returns the cooldown duration for the given attempt count.
///
/// Attempts are capped at the end of the multiplier series, so the sixth
/// and later attempts all yield the 5-minute cap.
#[must_use]
pub fn cooldown_for_attempts(attempts: u32) -> Duration {
    if attempts == 0 {
        return Duration::ZERO;
    }
    let idx = (attempts.min(MULTIPLIERS.len() as u32) - 1) as usize;
    BASE_COOLDOWN * MULTIPLIERS[idx]
}

/// Per-community escalation tracker.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    entries: DashMap<PairKey, CooldownEntry>,
}

impl CooldownTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports the current cooldown state for a pair.
    #[must_use]
    pub fn status(&self, pair: PairKey) -> CooldownStatus {
        let now = Instant::now();
        self.entries.get(&pair).map_or(
            CooldownStatus {
                in_cooldown: false,
                remaining: Duration::ZERO,
            },
            |entry| {
                let remaining = entry.cooldown_until.saturating_duration_since(now);
                CooldownStatus {
                    in_cooldown: !remaining.is_zero(),
                    remaining,
                }
            },
        )
    }

    /// Records an enforced disconnect and escalates the pair's cooldown.
    ///
    /// Returns the attempt count after escalation. A pair that has been
    /// quiet longer than [`QUIET_PERIOD`] restarts from attempt 1.
    pub fn record_disconnect(&self, pair: PairKey) -> u32 {
        let now = Instant::now();
        let mut entry = self.entries.entry(pair).or_insert_with(|| CooldownEntry {
            attempts: 0,
            cooldown_until: now,
            last_attempt: now,
        });

        if now.saturating_duration_since(entry.last_attempt) >= QUIET_PERIOD {
            entry.attempts = 0;
        }

        entry.attempts = entry.attempts.saturating_add(1);
        entry.last_attempt = now;
        entry.cooldown_until = now + cooldown_for_attempts(entry.attempts);
        entry.attempts
    }

    /// Drops entries whose pairs have been quiet for [`QUIET_PERIOD`].
    ///
    /// Returns the number of purged entries. Called from the engine's
    /// maintenance sweep.
    pub fn purge_stale(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.last_attempt) < QUIET_PERIOD);
        before - self.entries.len()
    }

    /// Returns the number of tracked pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether no pair is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns whether a pair currently has escalation state.
    #[must_use]
    pub fn contains(&self, pair: PairKey) -> bool {
        self.entries.contains_key(&pair)
    }
}

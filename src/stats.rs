//! Activation and disconnect counters for observability.
//!
//! Pure bookkeeping; nothing here influences control flow. Per-rule
//! counters use atomics inside a concurrent map; community rollups are
//! computed on read.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::registry::RuleKey;

#[derive(Debug, Default)]
struct RuleCounters {
    activations: AtomicU64,
    disconnects: AtomicU64,
    last_activated_at: Mutex<Option<DateTime<Utc>>>,
}

/// Snapshot of one rule's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuleStats {
    /// Number of times the rule fired.
    pub activation_count: u64,
    /// Number of removals performed for the rule.
    pub total_disconnects: u64,
    /// Wall-clock time of the most recent activation.
    pub last_activated_at: Option<DateTime<Utc>>,
}

/// Community-wide rollup of all rule counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommunityStats {
    /// Number of configured rules.
    pub total_protections: usize,
    /// Sum of activations across all rules.
    pub total_activations: u64,
    /// Sum of disconnects across all rules.
    pub total_disconnects: u64,
    /// Most recent activation across all rules.
    pub last_activation: Option<DateTime<Utc>>,
}

/// One entry of the top-N activation ranking.
#[derive(Debug, Clone, Serialize)]
pub struct TopRule {
    /// The ranked rule's identity.
    #[serde(skip)]
    pub key: RuleKey,
    /// Counters at ranking time.
    #[serde(flatten)]
    pub stats: RuleStats,
}

/// Per-community stats aggregator.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    rules: DashMap<RuleKey, RuleCounters>,
}

impl StatsAggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a protection activation for a rule.
    pub fn record_activation(&self, key: RuleKey) {
        let counters = self.rules.entry(key).or_default();
        counters.activations.fetch_add(1, Ordering::SeqCst);
        *counters
            .last_activated_at
            .lock()
            .expect("stats lock poisoned") = Some(Utc::now());
    }

    /// Records a performed removal for a rule.
    pub fn record_disconnect(&self, key: RuleKey) {
        self.rules
            .entry(key)
            .or_default()
            .disconnects
            .fetch_add(1, Ordering::SeqCst);
    }

    /// Drops counters for a removed rule.
    pub fn forget(&self, key: &RuleKey) {
        self.rules.remove(key);
    }

    /// Returns a snapshot of one rule's counters, if any were recorded.
    #[must_use]
    pub fn rule_stats(&self, key: &RuleKey) -> Option<RuleStats> {
        self.rules.get(key).map(|c| snapshot(&c))
    }

    /// Computes the community rollup.
    ///
    /// `total_protections` comes from the registry; the aggregator only
    /// knows about rules that have fired at least once.
    #[must_use]
    pub fn community_stats(&self, total_protections: usize) -> CommunityStats {
        let mut total_activations = 0;
        let mut total_disconnects = 0;
        let mut last_activation: Option<DateTime<Utc>> = None;

        for entry in &self.rules {
            let s = snapshot(entry.value());
            total_activations += s.activation_count;
            total_disconnects += s.total_disconnects;
            if let Some(at) = s.last_activated_at {
                if last_activation.is_none_or(|prev| at > prev) {
                    last_activation = Some(at);
                }
            }
        }

        CommunityStats {
            total_protections,
            total_activations,
            total_disconnects,
            last_activation,
        }
    }

    /// Returns the `limit` most-activated rules, descending.
    #[must_use]
    pub fn top_rules(&self, limit: usize) -> Vec<TopRule> {
        let mut ranked: Vec<TopRule> = self
            .rules
            .iter()
            .map(|entry| TopRule {
                key: *entry.key(),
                stats: snapshot(entry.value()),
            })
            .collect();
        ranked.sort_by(|a, b| b.stats.activation_count.cmp(&a.stats.activation_count));
        ranked.truncate(limit);
        ranked
    }
}

fn snapshot(counters: &RuleCounters) -> RuleStats {
    RuleStats {
        activation_count: counters.activations.load(Ordering::SeqCst),
        total_disconnects: counters.disconnects.load(Ordering::SeqCst),
        last_activated_at: *counters
            .last_activated_at
            .lock()
            .expect("stats lock poisoned"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::UserId;
    use crate::registry::ProtectionMode;

    fn key(target: u64, trigger: u64) -> RuleKey {
        RuleKey {
            target: UserId(target),
            trigger: UserId(trigger),
            mode: ProtectionMode::Instant,
            channel: None,
        }
    }

    #[test]
    fn counters_accumulate() {
        let stats = StatsAggregator::new();
        let k = key(1, 2);

        stats.record_activation(k);
        stats.record_activation(k);
        stats.record_disconnect(k);

        let s = stats.rule_stats(&k).unwrap();
        assert_eq!(s.activation_count, 2);
        assert_eq!(s.total_disconnects, 1);
        assert!(s.last_activated_at.is_some());
    }

    #[test]
    fn unknown_rule_has_no_stats() {
        let stats = StatsAggregator::new();
        assert!(stats.rule_stats(&key(1, 2)).is_none());
    }

    #[test]
    fn community_rollup_sums_rules() {
        let stats = StatsAggregator::new();
        stats.record_activation(key(1, 2));
        stats.record_activation(key(1, 3));
        stats.record_disconnect(key(1, 2));
        stats.record_disconnect(key(1, 3));

        let rollup = stats.community_stats(5);
        assert_eq!(rollup.total_protections, 5);
        assert_eq!(rollup.total_activations, 2);
        assert_eq!(rollup.total_disconnects, 2);
        assert!(rollup.last_activation.is_some());
    }

    #[test]
    fn top_rules_ranked_and_truncated() {
        let stats = StatsAggregator::new();
        for _ in 0..3 {
            stats.record_activation(key(1, 2));
        }
        stats.record_activation(key(1, 3));
        for _ in 0..2 {
            stats.record_activation(key(1, 4));
        }

        let top = stats.top_rules(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].key.trigger, UserId(2));
        assert_eq!(top[0].stats.activation_count, 3);
        assert_eq!(top[1].key.trigger, UserId(4));
    }

    #[test]
    fn forget_drops_counters() {
        let stats = StatsAggregator::new();
        let k = key(1, 2);
        stats.record_activation(k);
        stats.forget(&k);
        assert!(stats.rule_stats(&k).is_none());
        assert_eq!(stats.community_stats(0).total_activations, 0);
    }
}

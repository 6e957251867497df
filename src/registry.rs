//! Protection rule catalog.
//!
//! The registry is the per-community source of truth for configured
//! protection rules. It validates mode/window/channel combinations,
//! rejects duplicates, and serves insertion-ordered snapshots to the
//! router and the admin surface. It never holds ephemeral state; armed
//! windows and monitors belong to the router.

use std::collections::HashSet;
use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::platform::{ChannelId, CommunityId, UserId};

/// Default instant-mode protection window in milliseconds.
pub const DEFAULT_WINDOW_MS: u64 = 2_000;

/// Smallest accepted instant-mode window.
pub const MIN_WINDOW_MS: u64 = 1_000;

/// Largest accepted instant-mode window.
pub const MAX_WINDOW_MS: u64 = 10_000;

/// How a protection rule reacts to co-presence of target and trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionMode {
    /// Time-boxed window armed when the target enters a channel; the
    /// trigger is removed if it arrives within the window.
    Instant,
    /// Unbounded protection while the target occupies a channel; the
    /// trigger is removed every time it enters.
    Persistent,
    /// Protection bound to one specific channel; the target (not the
    /// trigger) is removed whenever both are present there.
    Channel,
}

impl std::fmt::Display for ProtectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Instant => "instant",
            Self::Persistent => "persistent",
            Self::Channel => "channel",
        };
        write!(f, "{s}")
    }
}

/// Identity of a (target, trigger) pair within a community.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairKey {
    /// The protected participant.
    pub target: UserId,
    /// The participant disallowed from co-presence with the target.
    pub trigger: UserId,
}

/// Identity of a rule: unique per (target, trigger, mode, channel when
/// mode is channel-bound).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleKey {
    /// The protected participant.
    pub target: UserId,
    /// The triggering participant.
    pub trigger: UserId,
    /// Protection mode.
    pub mode: ProtectionMode,
    /// Bound channel, significant only for channel mode.
    pub channel: Option<ChannelId>,
}

/// A configured protection rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionRule {
    /// Community the rule belongs to.
    pub community: CommunityId,
    /// The protected participant.
    pub target: UserId,
    /// The triggering participant.
    pub trigger: UserId,
    /// Protection mode.
    pub mode: ProtectionMode,
    /// Instant-mode window in milliseconds. Always `None` for persistent
    /// and channel modes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window_ms: Option<u64>,
    /// Bound channel for channel mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelId>,
}

impl ProtectionRule {
    /// Returns the rule's identity key.
    #[must_use]
    pub const fn key(&self) -> RuleKey {
        RuleKey {
            target: self.target,
            trigger: self.trigger,
            mode: self.mode,
            channel: match self.mode {
                ProtectionMode::Channel => self.channel,
                ProtectionMode::Instant | ProtectionMode::Persistent => None,
            },
        }
    }

    /// Returns the (target, trigger) pair key.
    #[must_use]
    pub const fn pair(&self) -> PairKey {
        PairKey {
            target: self.target,
            trigger: self.trigger,
        }
    }

    /// Returns the instant-mode window as a duration.
    ///
    /// Falls back to [`DEFAULT_WINDOW_MS`]; only meaningful for instant
    /// rules.
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_millis(match self.time_window_ms {
            Some(ms) => ms,
            None => DEFAULT_WINDOW_MS,
        })
    }
}

/// Parameters for creating a rule through [`ProtectionRegistry::add_rule`].
#[derive(Debug, Clone)]
pub struct RuleSpec {
    /// The protected participant.
    pub target: UserId,
    /// The triggering participant.
    pub trigger: UserId,
    /// Protection mode.
    pub mode: ProtectionMode,
    /// Instant-mode window in milliseconds; defaulted when omitted.
    pub time_window_ms: Option<u64>,
    /// Bound channel, required for channel mode.
    pub channel: Option<ChannelId>,
}

impl RuleSpec {
    /// Creates an instant-mode spec with the default window.
    #[must_use]
    pub const fn instant(target: UserId, trigger: UserId) -> Self {
        Self {
            target,
            trigger,
            mode: ProtectionMode::Instant,
            time_window_ms: None,
            channel: None,
        }
    }

    /// Creates a persistent-mode spec.
    #[must_use]
    pub const fn persistent(target: UserId, trigger: UserId) -> Self {
        Self {
            target,
            trigger,
            mode: ProtectionMode::Persistent,
            time_window_ms: None,
            channel: None,
        }
    }

    /// Creates a channel-mode spec bound to `channel`.
    #[must_use]
    pub const fn channel(target: UserId, trigger: UserId, channel: ChannelId) -> Self {
        Self {
            target,
            trigger,
            mode: ProtectionMode::Channel,
            time_window_ms: None,
            channel: Some(channel),
        }
    }

    /// Sets an explicit instant-mode window.
    #[must_use]
    pub const fn with_window_ms(mut self, window_ms: u64) -> Self {
        self.time_window_ms = Some(window_ms);
        self
    }
}

/// Patch applied through [`ProtectionRegistry::update_rule`].
#[derive(Debug, Clone, Default)]
pub struct RuleUpdate {
    /// New mode, if changing.
    pub mode: Option<ProtectionMode>,
    /// New instant-mode window in milliseconds, if changing.
    pub time_window_ms: Option<u64>,
    /// New bound channel, if changing.
    pub channel: Option<ChannelId>,
}

/// Per-community catalog of protection rules.
///
/// Reads return cloned snapshots preserving insertion order; callers
/// never observe partial mutations.
#[derive(Debug)]
pub struct ProtectionRegistry {
    community: CommunityId,
    rules: RwLock<Vec<ProtectionRule>>,
}

impl ProtectionRegistry {
    /// Creates an empty registry for `community`.
    #[must_use]
    pub const fn new(community: CommunityId) -> Self {
        Self {
            community,
            rules: RwLock::new(Vec::new()),
        }
    }

    /// Returns the community this registry belongs to.
    #[must_use]
    pub const fn community(&self) -> CommunityId {
        self.community
    }

    /// Replaces the catalog with rules loaded from the config store.
    ///
    /// Rules belonging to other communities are ignored, and only the
    /// first rule for each identity is kept regardless of where a
    /// duplicate sits in the stored snapshot.
    pub fn hydrate(&self, rules: Vec<ProtectionRule>) -> usize {
        let mut seen = HashSet::new();
        let mut kept: Vec<ProtectionRule> = rules
            .into_iter()
            .filter(|r| r.community == self.community)
            .collect();
        kept.retain(|r| seen.insert(r.key()));
        let count = kept.len();
        *self.rules.write().expect("registry lock poisoned") = kept;
        count
    }

    /// Adds a rule after validating it.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::InvalidArgument`] for a bad mode/window/channel
    ///   combination (channel mode without a channel id, a window outside
    ///   `[MIN_WINDOW_MS, MAX_WINDOW_MS]`, or any window on a
    ///   persistent/channel rule).
    /// - [`RegistryError::DuplicateRule`] when an equivalent rule exists.
    pub fn add_rule(&self, spec: RuleSpec) -> Result<ProtectionRule, RegistryError> {
        validate_combination(spec.mode, spec.time_window_ms, spec.channel, false)?;

        let rule = ProtectionRule {
            community: self.community,
            target: spec.target,
            trigger: spec.trigger,
            mode: spec.mode,
            time_window_ms: match spec.mode {
                ProtectionMode::Instant => Some(spec.time_window_ms.unwrap_or(DEFAULT_WINDOW_MS)),
                ProtectionMode::Persistent | ProtectionMode::Channel => None,
            },
            channel: match spec.mode {
                ProtectionMode::Channel => spec.channel,
                ProtectionMode::Instant | ProtectionMode::Persistent => None,
            },
        };

        let mut rules = self.rules.write().expect("registry lock poisoned");
        if rules.iter().any(|r| r.key() == rule.key()) {
            return Err(RegistryError::DuplicateRule {
                target: rule.target,
                trigger: rule.trigger,
            });
        }
        rules.push(rule.clone());
        Ok(rule)
    }

    /// Removes rules matching the selector and returns them.
    ///
    /// Omitting `mode` removes every rule for the pair; `channel` further
    /// narrows channel-mode selectors.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::RuleNotFound`] when nothing matched.
    pub fn remove_rules(
        &self,
        target: UserId,
        trigger: UserId,
        mode: Option<ProtectionMode>,
        channel: Option<ChannelId>,
    ) -> Result<Vec<ProtectionRule>, RegistryError> {
        let mut rules = self.rules.write().expect("registry lock poisoned");
        let matches = |r: &ProtectionRule| {
            r.target == target
                && r.trigger == trigger
                && mode.is_none_or(|m| r.mode == m)
                && (channel.is_none() || r.channel == channel)
        };

        let removed: Vec<ProtectionRule> = rules.iter().filter(|r| matches(r)).cloned().collect();
        if removed.is_empty() {
            return Err(RegistryError::RuleNotFound { target, trigger });
        }
        rules.retain(|r| !matches(r));
        Ok(removed)
    }

    /// Applies a mode/window patch to the rule identified by `key`,
    /// atomically: either the whole patch applies or nothing changes.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::RuleNotFound`] when `key` matches nothing.
    /// - [`RegistryError::InvalidState`] for a window on a resulting
    ///   persistent/channel rule.
    /// - [`RegistryError::InvalidArgument`] for an out-of-range window or
    ///   a channel-mode result without a channel id.
    /// - [`RegistryError::DuplicateRule`] when the patched identity
    ///   collides with another rule.
    pub fn update_rule(
        &self,
        key: RuleKey,
        update: RuleUpdate,
    ) -> Result<ProtectionRule, RegistryError> {
        let mut rules = self.rules.write().expect("registry lock poisoned");
        let idx = rules
            .iter()
            .position(|r| r.key() == key)
            .ok_or(RegistryError::RuleNotFound {
                target: key.target,
                trigger: key.trigger,
            })?;

        let mut patched = rules[idx].clone();
        if let Some(mode) = update.mode {
            patched.mode = mode;
        }
        if let Some(window) = update.time_window_ms {
            patched.time_window_ms = Some(window);
        }
        if let Some(channel) = update.channel {
            patched.channel = Some(channel);
        }

        validate_combination(patched.mode, patched.time_window_ms, patched.channel, true)?;

        // Normalize fields that the resulting mode does not carry.
        match patched.mode {
            ProtectionMode::Instant => {
                patched.channel = None;
                if patched.time_window_ms.is_none() {
                    patched.time_window_ms = Some(DEFAULT_WINDOW_MS);
                }
            }
            ProtectionMode::Persistent => {
                patched.channel = None;
                patched.time_window_ms = None;
            }
            ProtectionMode::Channel => {
                patched.time_window_ms = None;
            }
        }

        let new_key = patched.key();
        if new_key != key && rules.iter().any(|r| r.key() == new_key) {
            return Err(RegistryError::DuplicateRule {
                target: patched.target,
                trigger: patched.trigger,
            });
        }

        rules[idx] = patched.clone();
        Ok(patched)
    }

    /// Finds the rule with the given identity key.
    #[must_use]
    pub fn find(&self, key: RuleKey) -> Option<ProtectionRule> {
        self.rules
            .read()
            .expect("registry lock poisoned")
            .iter()
            .find(|r| r.key() == key)
            .cloned()
    }

    /// Returns all rules in insertion order.
    #[must_use]
    pub fn rules(&self) -> Vec<ProtectionRule> {
        self.rules.read().expect("registry lock poisoned").clone()
    }

    /// Returns rules protecting `target`, in insertion order.
    #[must_use]
    pub fn rules_for_target(&self, target: UserId) -> Vec<ProtectionRule> {
        self.rules
            .read()
            .expect("registry lock poisoned")
            .iter()
            .filter(|r| r.target == target)
            .cloned()
            .collect()
    }

    /// Returns channel-mode rules bound to `channel`, in insertion order.
    #[must_use]
    pub fn rules_for_channel(&self, channel: ChannelId) -> Vec<ProtectionRule> {
        self.rules
            .read()
            .expect("registry lock poisoned")
            .iter()
            .filter(|r| r.mode == ProtectionMode::Channel && r.channel == Some(channel))
            .cloned()
            .collect()
    }

    /// Returns the number of configured rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.read().expect("registry lock poisoned").len()
    }

    /// Returns whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Validates a mode/window/channel combination.
///
/// `is_update` selects the error variant for a window on a
/// persistent/channel rule: `InvalidArgument` at creation, `InvalidState`
/// when patching an existing rule.
fn validate_combination(
    mode: ProtectionMode,
    window_ms: Option<u64>,
    channel: Option<ChannelId>,
    is_update: bool,
) -> Result<(), RegistryError> {
    match mode {
        ProtectionMode::Instant => {
            if let Some(ms) = window_ms {
                if !(MIN_WINDOW_MS..=MAX_WINDOW_MS).contains(&ms) {
                    return Err(RegistryError::InvalidArgument(format!(
                        "instant window must be between {MIN_WINDOW_MS} and {MAX_WINDOW_MS} ms, got {ms}"
                    )));
                }
            }
        }
        ProtectionMode::Persistent | ProtectionMode::Channel => {
            if window_ms.is_some() {
                let msg = format!("{mode} mode does not accept a cooldown window");
                return Err(if is_update {
                    RegistryError::InvalidState(msg)
                } else {
                    RegistryError::InvalidArgument(msg)
                });
            }
            if mode == ProtectionMode::Channel && channel.is_none() {
                return Err(RegistryError::InvalidArgument(
                    "channel mode requires a channel id".to_owned(),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMUNITY: CommunityId = CommunityId(1);
    const TARGET: UserId = UserId(10);
    const TRIGGER: UserId = UserId(20);

    fn registry() -> ProtectionRegistry {
        ProtectionRegistry::new(COMMUNITY)
    }

    #[test]
    fn add_instant_defaults_window() {
        let reg = registry();
        let rule = reg.add_rule(RuleSpec::instant(TARGET, TRIGGER)).unwrap();
        assert_eq!(rule.time_window_ms, Some(DEFAULT_WINDOW_MS));
        assert_eq!(rule.window(), Duration::from_millis(2000));
    }

    #[test]
    fn add_duplicate_rejected() {
        let reg = registry();
        reg.add_rule(RuleSpec::instant(TARGET, TRIGGER)).unwrap();
        let err = reg
            .add_rule(RuleSpec::instant(TARGET, TRIGGER))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateRule { .. }));
    }

    #[test]
    fn same_pair_different_modes_allowed() {
        let reg = registry();
        reg.add_rule(RuleSpec::instant(TARGET, TRIGGER)).unwrap();
        reg.add_rule(RuleSpec::persistent(TARGET, TRIGGER)).unwrap();
        reg.add_rule(RuleSpec::channel(TARGET, TRIGGER, ChannelId(5)))
            .unwrap();
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn channel_mode_unique_per_channel() {
        let reg = registry();
        reg.add_rule(RuleSpec::channel(TARGET, TRIGGER, ChannelId(5)))
            .unwrap();
        reg.add_rule(RuleSpec::channel(TARGET, TRIGGER, ChannelId(6)))
            .unwrap();
        let err = reg
            .add_rule(RuleSpec::channel(TARGET, TRIGGER, ChannelId(5)))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateRule { .. }));
    }

    #[test]
    fn channel_mode_requires_channel() {
        let reg = registry();
        let spec = RuleSpec {
            channel: None,
            ..RuleSpec::channel(TARGET, TRIGGER, ChannelId(5))
        };
        let err = reg.add_rule(spec).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArgument(_)));
    }

    #[test]
    fn window_out_of_range_rejected() {
        let reg = registry();
        for ms in [0, 999, 10_001, u64::MAX] {
            let err = reg
                .add_rule(RuleSpec::instant(TARGET, TRIGGER).with_window_ms(ms))
                .unwrap_err();
            assert!(matches!(err, RegistryError::InvalidArgument(_)), "{ms}");
        }
        reg.add_rule(RuleSpec::instant(TARGET, TRIGGER).with_window_ms(1_000))
            .unwrap();
    }

    #[test]
    fn window_on_persistent_rejected_at_creation() {
        let reg = registry();
        let spec = RuleSpec {
            time_window_ms: Some(2_000),
            ..RuleSpec::persistent(TARGET, TRIGGER)
        };
        let err = reg.add_rule(spec).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArgument(_)));
        assert!(err.to_string().contains("does not accept a cooldown"));
    }

    #[test]
    fn remove_specific_mode() {
        let reg = registry();
        reg.add_rule(RuleSpec::instant(TARGET, TRIGGER)).unwrap();
        reg.add_rule(RuleSpec::persistent(TARGET, TRIGGER)).unwrap();

        let removed = reg
            .remove_rules(TARGET, TRIGGER, Some(ProtectionMode::Instant), None)
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.rules()[0].mode, ProtectionMode::Persistent);
    }

    #[test]
    fn remove_without_mode_removes_all_for_pair() {
        let reg = registry();
        reg.add_rule(RuleSpec::instant(TARGET, TRIGGER)).unwrap();
        reg.add_rule(RuleSpec::persistent(TARGET, TRIGGER)).unwrap();
        reg.add_rule(RuleSpec::instant(TARGET, UserId(30))).unwrap();

        let removed = reg.remove_rules(TARGET, TRIGGER, None, None).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn remove_nothing_is_not_found() {
        let reg = registry();
        let err = reg.remove_rules(TARGET, TRIGGER, None, None).unwrap_err();
        assert!(matches!(err, RegistryError::RuleNotFound { .. }));
    }

    #[test]
    fn update_window() {
        let reg = registry();
        let rule = reg.add_rule(RuleSpec::instant(TARGET, TRIGGER)).unwrap();
        let updated = reg
            .update_rule(
                rule.key(),
                RuleUpdate {
                    time_window_ms: Some(5_000),
                    ..RuleUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(updated.time_window_ms, Some(5_000));
    }

    #[test]
    fn update_window_on_persistent_is_invalid_state() {
        let reg = registry();
        let rule = reg.add_rule(RuleSpec::persistent(TARGET, TRIGGER)).unwrap();
        let err = reg
            .update_rule(
                rule.key(),
                RuleUpdate {
                    time_window_ms: Some(5_000),
                    ..RuleUpdate::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidState(_)));
        // Original rule untouched.
        assert_eq!(reg.find(rule.key()).unwrap(), rule);
    }

    #[test]
    fn update_mode_to_persistent_drops_window() {
        let reg = registry();
        let rule = reg.add_rule(RuleSpec::instant(TARGET, TRIGGER)).unwrap();
        let updated = reg
            .update_rule(
                rule.key(),
                RuleUpdate {
                    mode: Some(ProtectionMode::Persistent),
                    ..RuleUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(updated.mode, ProtectionMode::Persistent);
        assert_eq!(updated.time_window_ms, None);
    }

    #[test]
    fn update_collision_is_duplicate() {
        let reg = registry();
        reg.add_rule(RuleSpec::persistent(TARGET, TRIGGER)).unwrap();
        let rule = reg.add_rule(RuleSpec::instant(TARGET, TRIGGER)).unwrap();
        let err = reg
            .update_rule(
                rule.key(),
                RuleUpdate {
                    mode: Some(ProtectionMode::Persistent),
                    ..RuleUpdate::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateRule { .. }));
    }

    #[test]
    fn snapshots_preserve_insertion_order() {
        let reg = registry();
        for trigger in [20, 21, 22] {
            reg.add_rule(RuleSpec::instant(TARGET, UserId(trigger)))
                .unwrap();
        }
        let triggers: Vec<u64> = reg
            .rules_for_target(TARGET)
            .iter()
            .map(|r| r.trigger.0)
            .collect();
        assert_eq!(triggers, vec![20, 21, 22]);
    }

    #[test]
    fn rules_for_channel_only_channel_mode() {
        let reg = registry();
        reg.add_rule(RuleSpec::instant(TARGET, TRIGGER)).unwrap();
        reg.add_rule(RuleSpec::channel(TARGET, TRIGGER, ChannelId(5)))
            .unwrap();
        reg.add_rule(RuleSpec::channel(TARGET, UserId(30), ChannelId(6)))
            .unwrap();

        let bound = reg.rules_for_channel(ChannelId(5));
        assert_eq!(bound.len(), 1);
        assert_eq!(bound[0].trigger, TRIGGER);
    }

    #[test]
    fn hydrate_filters_foreign_communities() {
        let reg = registry();
        let mine = ProtectionRule {
            community: COMMUNITY,
            target: TARGET,
            trigger: TRIGGER,
            mode: ProtectionMode::Instant,
            time_window_ms: Some(2_000),
            channel: None,
        };
        let foreign = ProtectionRule {
            community: CommunityId(99),
            ..mine.clone()
        };
        assert_eq!(reg.hydrate(vec![mine, foreign]), 1);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn hydrate_drops_duplicates_anywhere_in_snapshot() {
        let reg = registry();
        let dup = ProtectionRule {
            community: COMMUNITY,
            target: TARGET,
            trigger: TRIGGER,
            mode: ProtectionMode::Instant,
            time_window_ms: Some(2_000),
            channel: None,
        };
        let other = ProtectionRule {
            trigger: UserId(30),
            ..dup.clone()
        };

        // Duplicates separated by another rule must not survive either.
        assert_eq!(reg.hydrate(vec![dup.clone(), other, dup]), 2);
        assert_eq!(reg.len(), 2);
        assert_eq!(
            reg.rules()
                .iter()
                .filter(|r| r.trigger == TRIGGER)
                .count(),
            1
        );
    }

    #[test]
    fn rule_serde_round_trip() {
        let rule = ProtectionRule {
            community: COMMUNITY,
            target: TARGET,
            trigger: TRIGGER,
            mode: ProtectionMode::Channel,
            time_window_ms: None,
            channel: Some(ChannelId(5)),
        };
        let json = serde_json::to_string(&rule).unwrap();
        assert!(json.contains("\"channel\""));
        assert!(!json.contains("time_window_ms"));
        let back: ProtectionRule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rule);
    }
}

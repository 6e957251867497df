//! The protection engine.
//!
//! One engine runs per community. It consumes voice membership events,
//! arms instant windows and persistent monitors, enforces removals
//! through the [`VoiceAdapter`], and keeps the cooldown tracker, stats
//! aggregator, and active-protection directory in sync.
//!
//! Concurrency rules the implementation follows everywhere:
//!
//! - No map reference is ever held across an adapter `.await`. State is
//!   snapshotted (cloned or copied) first, then checked again with a
//!   compare-and-swap or generation guard when the call returns.
//! - Exactly one enforcement consumes an instant window. The window's
//!   consumption flag arbitrates between a trigger-entry event and the
//!   expiry timer.
//! - A timer or monitor that outlives its arming (replaced, torn down,
//!   rule removed) detects the generation mismatch and becomes a no-op.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cooldown::{CooldownStatus, CooldownTracker};
use crate::directory::{ActiveProtectionDirectory, ProtectionKey};
use crate::error::{Result, RouterError};
use crate::observability::events::{Event, EventEmitter};
use crate::observability::metrics;
use crate::platform::{
    AdapterError, ChannelId, CommunityId, MemberRef, UserId, VoiceAdapter, VoiceEvent,
};
use crate::registry::{
    PairKey, ProtectionMode, ProtectionRegistry, ProtectionRule, RuleKey, RuleSpec, RuleUpdate,
};
use crate::router::armed::{ArmedWindow, MonitorHandle, WindowKey};
use crate::stats::{CommunityStats, RuleStats, StatsAggregator, TopRule};
use crate::store::ConfigStore;

/// Poll interval of a persistent monitor.
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// How long a fetched permission check stays valid.
pub const PERMISSION_CACHE_TTL: Duration = Duration::from_secs(10);

/// Interval of the maintenance sweep (cooldown purge, cache eviction).
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
struct PermissionEntry {
    checked_at: Instant,
    can_remove: bool,
}

/// Which participant an enforcement removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Victim {
    Trigger,
    Target,
}

/// Outcome of a snapshot presence check against the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Presence {
    Present,
    Absent,
    /// Lookup failed; the transition that needed the answer is aborted.
    Unknown,
}

/// Per-community protection engine.
///
/// Construct with [`new`](Self::new), hydrate the rule catalog with
/// [`load_rules`](Self::load_rules), then feed every platform voice
/// event to [`handle_voice_event`](Self::handle_voice_event). Call
/// [`handle_agent_disconnect`](Self::handle_agent_disconnect) when the
/// enforcing agent itself is knocked out of a channel.
pub struct ProtectionEngine<A: VoiceAdapter> {
    pub(crate) community: CommunityId,
    pub(crate) adapter: Arc<A>,
    store: Arc<dyn ConfigStore>,
    pub(crate) emitter: Arc<EventEmitter>,
    pub(crate) registry: ProtectionRegistry,
    pub(crate) cooldowns: CooldownTracker,
    pub(crate) directory: ActiveProtectionDirectory,
    stats: StatsAggregator,
    pub(crate) armed: DashMap<WindowKey, ArmedWindow>,
    pub(crate) monitors: DashMap<PairKey, MonitorHandle>,
    permission_cache: DashMap<ChannelId, PermissionEntry>,
    generation: AtomicU64,
    cancel: CancellationToken,
}

impl<A: VoiceAdapter> std::fmt::Debug for ProtectionEngine<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectionEngine")
            .field("community", &self.community)
            .field("rules", &self.registry.len())
            .field("armed_windows", &self.armed.len())
            .field("monitors", &self.monitors.len())
            .finish_non_exhaustive()
    }
}

impl<A: VoiceAdapter> ProtectionEngine<A> {
    /// Creates an engine for `community` with an empty rule catalog.
    #[must_use]
    pub fn new(
        community: CommunityId,
        adapter: Arc<A>,
        store: Arc<dyn ConfigStore>,
        emitter: Arc<EventEmitter>,
    ) -> Self {
        Self {
            community,
            adapter,
            store,
            emitter,
            registry: ProtectionRegistry::new(community),
            cooldowns: CooldownTracker::new(),
            directory: ActiveProtectionDirectory::new(),
            stats: StatsAggregator::new(),
            armed: DashMap::new(),
            monitors: DashMap::new(),
            permission_cache: DashMap::new(),
            generation: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    /// Returns the community this engine serves.
    #[must_use]
    pub const fn community(&self) -> CommunityId {
        self.community
    }

    /// Hydrates the rule catalog from the config store.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn load_rules(&self) -> Result<usize> {
        let rules = self.store.load(self.community).await?;
        let count = self.registry.hydrate(rules);
        info!(community = %self.community, count, "hydrated protection rules");
        Ok(count)
    }

    // ---- admin surface -------------------------------------------------

    /// Adds a protection rule and persists the catalog.
    ///
    /// # Errors
    ///
    /// Propagates validation, duplicate, and store failures.
    pub async fn add_rule(&self, spec: RuleSpec) -> Result<ProtectionRule> {
        let rule = self.registry.add_rule(spec)?;
        info!(
            community = %self.community,
            target = %rule.target,
            trigger = %rule.trigger,
            mode = %rule.mode,
            "protection rule added"
        );
        self.persist().await?;
        Ok(rule)
    }

    /// Removes rules matching the selector, tears down their armed
    /// state, and persists the catalog.
    ///
    /// # Errors
    ///
    /// Returns `RuleNotFound` when nothing matched; propagates store
    /// failures.
    pub async fn remove_rule(
        &self,
        target: UserId,
        trigger: UserId,
        mode: Option<ProtectionMode>,
        channel: Option<ChannelId>,
    ) -> Result<Vec<ProtectionRule>> {
        let removed = self.registry.remove_rules(target, trigger, mode, channel)?;
        for rule in &removed {
            self.teardown_rule(rule);
            self.stats.forget(&rule.key());
        }
        info!(
            community = %self.community,
            target = %target,
            trigger = %trigger,
            count = removed.len(),
            "protection rules removed"
        );
        self.persist().await?;
        Ok(removed)
    }

    /// Applies a mode/window patch to one rule, discards stale armed
    /// state for the pair, and persists the catalog.
    ///
    /// # Errors
    ///
    /// Propagates validation and store failures.
    pub async fn update_rule(&self, key: RuleKey, update: RuleUpdate) -> Result<ProtectionRule> {
        let updated = self.registry.update_rule(key, update)?;
        // Armed state from the previous shape of the rule no longer
        // matches it. The next target entry re-arms under the new shape.
        self.teardown_pair(updated.pair());
        info!(
            community = %self.community,
            target = %updated.target,
            trigger = %updated.trigger,
            mode = %updated.mode,
            "protection rule updated"
        );
        self.persist().await?;
        Ok(updated)
    }

    async fn persist(&self) -> Result<()> {
        let rules = self.registry.rules();
        if let Err(err) = self.store.persist(self.community, &rules).await {
            warn!(community = %self.community, %err, "failed to persist rule catalog");
            return Err(err.into());
        }
        Ok(())
    }

    // ---- read surface --------------------------------------------------

    /// Returns all configured rules in insertion order.
    #[must_use]
    pub fn rules(&self) -> Vec<ProtectionRule> {
        self.registry.rules()
    }

    /// Returns rules protecting `target`.
    #[must_use]
    pub fn rules_for_target(&self, target: UserId) -> Vec<ProtectionRule> {
        self.registry.rules_for_target(target)
    }

    /// Returns the cooldown state of a pair.
    #[must_use]
    pub fn cooldown_status(&self, pair: PairKey) -> CooldownStatus {
        self.cooldowns.status(pair)
    }

    /// Returns counters for one rule, if it ever fired.
    #[must_use]
    pub fn rule_stats(&self, key: &RuleKey) -> Option<RuleStats> {
        self.stats.rule_stats(key)
    }

    /// Returns the community-wide stats rollup.
    #[must_use]
    pub fn community_stats(&self) -> CommunityStats {
        self.stats.community_stats(self.registry.len())
    }

    /// Returns the `limit` most-activated rules.
    #[must_use]
    pub fn top_rules(&self, limit: usize) -> Vec<TopRule> {
        self.stats.top_rules(limit)
    }

    /// Number of currently armed instant windows.
    #[must_use]
    pub fn armed_window_count(&self) -> usize {
        self.armed.len()
    }

    /// Number of running persistent monitors.
    #[must_use]
    pub fn monitor_count(&self) -> usize {
        self.monitors.len()
    }

    /// Number of armed protections registered for recovery.
    #[must_use]
    pub fn active_protection_count(&self) -> usize {
        self.directory.total()
    }

    // ---- event intake --------------------------------------------------

    /// Routes one platform voice event through the engine.
    ///
    /// Non-movement updates (mute, deafen) are ignored. For a move, the
    /// old channel's armed state is torn down before the new channel is
    /// processed, so a quick hop out and back re-arms cleanly.
    pub async fn handle_voice_event(self: &Arc<Self>, event: &VoiceEvent) {
        if let Some(left) = event.left_channel() {
            self.handle_member_left(event.member.id, left);
        }
        if let Some(entered) = event.entered_channel() {
            self.handle_target_entered(&event.member, entered).await;
            self.handle_trigger_entered(&event.member, entered).await;
        }
    }

    /// Tears down armed state keyed on `user` occupying `channel`.
    fn handle_member_left(&self, user: UserId, channel: ChannelId) {
        let window_keys: Vec<WindowKey> = self
            .armed
            .iter()
            .filter(|e| e.key().target == user && e.key().channel == channel)
            .map(|e| *e.key())
            .collect();
        for key in &window_keys {
            self.discard_window(key, "target left channel");
        }

        let monitor_pairs: Vec<PairKey> = self
            .monitors
            .iter()
            .filter(|e| e.key().target == user && e.value().channel == channel)
            .map(|e| *e.key())
            .collect();
        for pair in &monitor_pairs {
            self.stop_monitor(*pair);
        }

        if !window_keys.is_empty() || !monitor_pairs.is_empty() {
            debug!(
                community = %self.community,
                target = %user,
                channel = %channel,
                windows = window_keys.len(),
                monitors = monitor_pairs.len(),
                "tore down protections after target left"
            );
        }
    }

    /// Arms protections for every rule whose target just entered
    /// `channel`.
    async fn handle_target_entered(self: &Arc<Self>, member: &MemberRef, channel: ChannelId) {
        let rules = self.registry.rules_for_target(member.id);
        if rules.is_empty() {
            return;
        }

        let mut rules_armed = 0usize;
        for rule in &rules {
            match rule.mode {
                ProtectionMode::Instant => {
                    // Snapshot the trigger's location before arming, so a
                    // trigger already waiting in the channel is removed
                    // now instead of slipping under the window.
                    match self.trigger_presence(rule, channel).await {
                        Presence::Present => {
                            if self
                                .enforce_and_record(rule, channel, Victim::Trigger)
                                .await
                                .is_err()
                            {
                                // Enforcement failed; arm anyway so a
                                // re-entry inside the window is caught.
                                self.arm_window(rule, channel, rule.window());
                                rules_armed += 1;
                            }
                        }
                        Presence::Absent => {
                            self.arm_window(rule, channel, rule.window());
                            rules_armed += 1;
                        }
                        Presence::Unknown => {}
                    }
                }
                ProtectionMode::Persistent => match self.trigger_presence(rule, channel).await {
                    Presence::Unknown => {}
                    presence => {
                        if presence == Presence::Present {
                            let _ = self.enforce_and_record(rule, channel, Victim::Trigger).await;
                        }
                        self.start_monitor(rule, channel);
                        rules_armed += 1;
                    }
                },
                ProtectionMode::Channel => {
                    if rule.channel == Some(channel)
                        && self.trigger_presence(rule, channel).await == Presence::Present
                    {
                        // Channel mode inverts the victim: the target is
                        // removed from the bound channel.
                        let _ = self.enforce_and_record(rule, channel, Victim::Target).await;
                    }
                }
            }
        }

        info!(
            community = %self.community,
            target = %member.id,
            target_name = %member.display_name,
            channel = %channel,
            rules = rules.len(),
            rules_armed,
            "protected target entered channel"
        );
        self.emitter.emit(Event::TargetEntered {
            timestamp: Utc::now(),
            community: self.community,
            target: member.id,
            channel,
            rules_armed,
        });
    }

    /// Enforces protections for every rule whose trigger just entered
    /// `channel`.
    async fn handle_trigger_entered(self: &Arc<Self>, member: &MemberRef, channel: ChannelId) {
        // Armed instant windows.
        let window_keys: Vec<WindowKey> = self
            .armed
            .iter()
            .filter(|e| e.key().trigger == member.id && e.key().channel == channel)
            .map(|e| *e.key())
            .collect();
        for key in window_keys {
            let Some(win) = self.armed.get(&key).map(|w| w.clone()) else {
                continue;
            };
            if win.is_expired() {
                // The expiry timer has not run yet; retire the window
                // here rather than enforce past the deadline.
                self.expire_window(&key, win.generation);
                continue;
            }
            let rule_key = RuleKey {
                target: key.target,
                trigger: key.trigger,
                mode: ProtectionMode::Instant,
                channel: None,
            };
            let Some(rule) = self.registry.find(rule_key) else {
                self.discard_window(&key, "rule no longer exists");
                continue;
            };
            // An earlier enforcement in this pass may already have
            // removed the trigger. The window then stays armed until it
            // expires on its own.
            if self.trigger_presence(&rule, channel).await != Presence::Present {
                continue;
            }
            if !win.try_begin_consume() {
                continue;
            }
            match self.enforce_and_record(&rule, channel, Victim::Trigger).await {
                Ok(()) => {
                    self.armed
                        .remove_if(&key, |_, w| w.generation == win.generation);
                    win.cancel.cancel();
                    self.directory.unregister(
                        channel,
                        &ProtectionKey {
                            target: key.target,
                            trigger: key.trigger,
                            mode: ProtectionMode::Instant,
                        },
                    );
                    debug!(
                        community = %self.community,
                        target = %key.target,
                        trigger = %key.trigger,
                        channel = %channel,
                        "instant window consumed"
                    );
                }
                Err(RouterError::StaleTargetState { .. }) => {
                    win.abort_consume();
                    self.discard_window(&key, "target no longer present");
                }
                Err(_) => {
                    // Permission or platform failure: the window stays
                    // armed until natural expiry.
                    win.abort_consume();
                }
            }
        }

        // Persistent monitors: enforce now instead of waiting a tick.
        let monitor_pairs: Vec<PairKey> = self
            .monitors
            .iter()
            .filter(|e| e.key().trigger == member.id && e.value().channel == channel)
            .map(|e| *e.key())
            .collect();
        for pair in monitor_pairs {
            let rule_key = RuleKey {
                target: pair.target,
                trigger: pair.trigger,
                mode: ProtectionMode::Persistent,
                channel: None,
            };
            let Some(rule) = self.registry.find(rule_key) else {
                self.stop_monitor(pair);
                continue;
            };
            if self.trigger_presence(&rule, channel).await != Presence::Present {
                continue;
            }
            if let Err(RouterError::StaleTargetState { .. }) =
                self.enforce_and_record(&rule, channel, Victim::Trigger).await
            {
                self.stop_monitor(pair);
            }
        }

        // Channel-bound rules where the mover is the trigger.
        for rule in self.registry.rules_for_channel(channel) {
            if rule.trigger != member.id {
                continue;
            }
            if self.trigger_presence(&rule, channel).await != Presence::Present {
                continue;
            }
            match self
                .adapter
                .is_member_in_channel(self.community, channel, rule.target)
                .await
            {
                Ok(true) => {
                    let _ = self.enforce_and_record(&rule, channel, Victim::Target).await;
                }
                Ok(false) => {}
                Err(err) => {
                    debug!(
                        community = %self.community,
                        channel = %channel,
                        %err,
                        "target lookup failed for channel-bound rule"
                    );
                    metrics::record_platform_failure("is_member_in_channel");
                }
            }
        }
    }

    async fn trigger_presence(&self, rule: &ProtectionRule, channel: ChannelId) -> Presence {
        match self
            .adapter
            .is_member_in_channel(self.community, channel, rule.trigger)
            .await
        {
            Ok(true) => Presence::Present,
            Ok(false) => Presence::Absent,
            Err(err) => {
                debug!(
                    community = %self.community,
                    trigger = %rule.trigger,
                    channel = %channel,
                    %err,
                    "trigger lookup failed, aborting transition"
                );
                metrics::record_platform_failure("is_member_in_channel");
                Presence::Unknown
            }
        }
    }

    // ---- arming --------------------------------------------------------

    /// Arms (or re-arms) an instant window for `rule` on `channel` with
    /// the given length, replacing any previous window for the key.
    pub(crate) fn arm_window(self: &Arc<Self>, rule: &ProtectionRule, channel: ChannelId, window: Duration) {
        let key = WindowKey {
            target: rule.target,
            trigger: rule.trigger,
            channel,
        };
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = self.cancel.child_token();

        if let Some((_, old)) = self.armed.remove(&key) {
            old.cancel.cancel();
        }
        self.armed
            .insert(key, ArmedWindow::new(window, generation, cancel.clone()));
        self.directory.register(
            channel,
            ProtectionKey {
                target: rule.target,
                trigger: rule.trigger,
                mode: ProtectionMode::Instant,
            },
        );
        metrics::record_window_armed();
        debug!(
            community = %self.community,
            target = %rule.target,
            trigger = %rule.trigger,
            channel = %channel,
            window_ms = window.as_millis() as u64,
            generation,
            "instant window armed"
        );

        // Deadline is fixed here, not when the task is first polled.
        let deadline = Instant::now() + window;
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep_until(deadline) => {
                    engine.expire_window(&key, generation);
                }
            }
        });
    }

    /// Retires an unconsumed window whose arming generation matches.
    ///
    /// A stale generation means the window was replaced or torn down
    /// after this caller last saw it; nothing happens then.
    pub(crate) fn expire_window(&self, key: &WindowKey, generation: u64) {
        let removed = self
            .armed
            .remove_if(key, |_, w| w.generation == generation && !w.is_consuming());
        if let Some((_, win)) = removed {
            win.cancel.cancel();
            self.directory.unregister(
                key.channel,
                &ProtectionKey {
                    target: key.target,
                    trigger: key.trigger,
                    mode: ProtectionMode::Instant,
                },
            );
            metrics::record_window_expired();
            debug!(
                community = %self.community,
                target = %key.target,
                trigger = %key.trigger,
                channel = %key.channel,
                "instant window expired unconsumed"
            );
        }
    }

    pub(crate) fn discard_window(&self, key: &WindowKey, reason: &str) {
        if let Some((_, win)) = self.armed.remove(key) {
            win.cancel.cancel();
            self.directory.unregister(
                key.channel,
                &ProtectionKey {
                    target: key.target,
                    trigger: key.trigger,
                    mode: ProtectionMode::Instant,
                },
            );
            debug!(
                community = %self.community,
                target = %key.target,
                trigger = %key.trigger,
                channel = %key.channel,
                reason,
                "instant window discarded"
            );
        }
    }

    /// Starts (or restarts) the persistent monitor for `rule` on
    /// `channel`, replacing any previous monitor for the pair.
    pub(crate) fn start_monitor(self: &Arc<Self>, rule: &ProtectionRule, channel: ChannelId) {
        let pair = rule.pair();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = self.cancel.child_token();

        if let Some((_, old)) = self.monitors.remove(&pair) {
            old.cancel.cancel();
            self.directory.unregister(
                old.channel,
                &ProtectionKey {
                    target: pair.target,
                    trigger: pair.trigger,
                    mode: ProtectionMode::Persistent,
                },
            );
        }
        self.monitors.insert(
            pair,
            MonitorHandle {
                channel,
                generation,
                cancel: cancel.clone(),
            },
        );
        self.directory.register(
            channel,
            ProtectionKey {
                target: pair.target,
                trigger: pair.trigger,
                mode: ProtectionMode::Persistent,
            },
        );
        metrics::set_monitors_active(self.monitors.len() as u64);
        debug!(
            community = %self.community,
            target = %pair.target,
            trigger = %pair.trigger,
            channel = %channel,
            generation,
            "persistent monitor started"
        );

        let first_tick = Instant::now() + MONITOR_INTERVAL;
        let engine = Arc::clone(self);
        let rule = rule.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first_tick, MONITOR_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let current = engine
                            .monitors
                            .get(&pair)
                            .is_some_and(|m| m.generation == generation);
                        if !current {
                            break;
                        }
                        engine.monitor_tick(&rule, channel).await;
                    }
                }
            }
        });
    }

    async fn monitor_tick(&self, rule: &ProtectionRule, channel: ChannelId) {
        match self
            .adapter
            .is_member_in_channel(self.community, channel, rule.trigger)
            .await
        {
            Ok(true) => {
                if let Err(RouterError::StaleTargetState { .. }) =
                    self.enforce_and_record(rule, channel, Victim::Trigger).await
                {
                    self.stop_monitor(rule.pair());
                }
            }
            Ok(false) => {}
            Err(err) => {
                debug!(
                    community = %self.community,
                    trigger = %rule.trigger,
                    channel = %channel,
                    %err,
                    "monitor tick lookup failed"
                );
                metrics::record_platform_failure("is_member_in_channel");
            }
        }
    }

    pub(crate) fn stop_monitor(&self, pair: PairKey) {
        if let Some((_, handle)) = self.monitors.remove(&pair) {
            handle.cancel.cancel();
            self.directory.unregister(
                handle.channel,
                &ProtectionKey {
                    target: pair.target,
                    trigger: pair.trigger,
                    mode: ProtectionMode::Persistent,
                },
            );
            metrics::set_monitors_active(self.monitors.len() as u64);
            debug!(
                community = %self.community,
                target = %pair.target,
                trigger = %pair.trigger,
                channel = %handle.channel,
                "persistent monitor stopped"
            );
        }
    }

    fn teardown_rule(&self, rule: &ProtectionRule) {
        match rule.mode {
            ProtectionMode::Instant => {
                let keys: Vec<WindowKey> = self
                    .armed
                    .iter()
                    .filter(|e| e.key().target == rule.target && e.key().trigger == rule.trigger)
                    .map(|e| *e.key())
                    .collect();
                for key in &keys {
                    self.discard_window(key, "rule removed");
                }
            }
            ProtectionMode::Persistent => self.stop_monitor(rule.pair()),
            ProtectionMode::Channel => {}
        }
    }

    fn teardown_pair(&self, pair: PairKey) {
        let keys: Vec<WindowKey> = self
            .armed
            .iter()
            .filter(|e| e.key().target == pair.target && e.key().trigger == pair.trigger)
            .map(|e| *e.key())
            .collect();
        for key in &keys {
            self.discard_window(key, "rule reshaped");
        }
        self.stop_monitor(pair);
    }

    // ---- enforcement ---------------------------------------------------

    /// Runs one enforcement and, on success, records cooldown, stats,
    /// metrics, and the activation event.
    async fn enforce_and_record(
        &self,
        rule: &ProtectionRule,
        channel: ChannelId,
        victim: Victim,
    ) -> std::result::Result<(), RouterError> {
        let victim_id = match victim {
            Victim::Trigger => rule.trigger,
            Victim::Target => rule.target,
        };

        match self.enforce_removal(rule.target, victim_id, channel).await {
            Ok(()) => {
                let key = rule.key();
                self.stats.record_activation(key);
                self.stats.record_disconnect(key);

                // Channel mode removes the target and carries no
                // escalation state.
                let attempt_count = if victim == Victim::Trigger {
                    let attempts = self.cooldowns.record_disconnect(rule.pair());
                    metrics::record_cooldown_escalation();
                    Some(attempts)
                } else {
                    None
                };

                metrics::record_activation(&rule.mode.to_string());
                info!(
                    community = %self.community,
                    target = %rule.target,
                    trigger = %rule.trigger,
                    removed = %victim_id,
                    channel = %channel,
                    mode = %rule.mode,
                    "protection activated"
                );
                self.emitter.emit(Event::ProtectionActivated {
                    timestamp: Utc::now(),
                    community: self.community,
                    target: rule.target,
                    trigger: rule.trigger,
                    channel,
                    mode: rule.mode,
                    window_ms: rule.time_window_ms,
                    attempt_count,
                });
                Ok(())
            }
            Err(err) => {
                match &err {
                    RouterError::PermissionDenied { .. } => {
                        warn!(
                            community = %self.community,
                            channel = %channel,
                            "removal permission missing, protection stays armed"
                        );
                        metrics::record_permission_denied();
                    }
                    RouterError::PlatformFetchFailure(msg) => {
                        warn!(
                            community = %self.community,
                            channel = %channel,
                            error = %msg,
                            "platform failure during enforcement"
                        );
                        metrics::record_platform_failure("remove_member");
                    }
                    RouterError::StaleTargetState { target, channel } => {
                        debug!(
                            community = %self.community,
                            target = %target,
                            channel = %channel,
                            "target gone before enforcement"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    /// Performs the guarded removal: permission check, target
    /// re-verification, then the adapter call.
    async fn enforce_removal(
        &self,
        target: UserId,
        victim: UserId,
        channel: ChannelId,
    ) -> std::result::Result<(), RouterError> {
        if !self.can_remove_in(channel).await? {
            return Err(RouterError::PermissionDenied { channel });
        }

        // The target may have left while this enforcement was queued.
        let target_present = self
            .adapter
            .is_member_in_channel(self.community, channel, target)
            .await
            .map_err(|e| RouterError::PlatformFetchFailure(e.to_string()))?;
        if !target_present {
            return Err(RouterError::StaleTargetState { target, channel });
        }

        self.adapter
            .remove_member_from_channel(self.community, channel, victim)
            .await
            .map_err(|e| match e {
                AdapterError::PermissionDenied => RouterError::PermissionDenied { channel },
                other => RouterError::PlatformFetchFailure(other.to_string()),
            })
    }

    async fn can_remove_in(&self, channel: ChannelId) -> std::result::Result<bool, RouterError> {
        let cached = self
            .permission_cache
            .get(&channel)
            .and_then(|e| (e.checked_at.elapsed() <= PERMISSION_CACHE_TTL).then_some(e.can_remove));
        if let Some(can_remove) = cached {
            return Ok(can_remove);
        }

        let perms = self
            .adapter
            .fetch_channel_permissions(self.community, channel)
            .await
            .map_err(|e| RouterError::PlatformFetchFailure(e.to_string()))?;
        self.permission_cache.insert(
            channel,
            PermissionEntry {
                checked_at: Instant::now(),
                can_remove: perms.can_remove_members,
            },
        );
        Ok(perms.can_remove_members)
    }

    // ---- background upkeep ---------------------------------------------

    /// Spawns the periodic maintenance sweep: purges quiet cooldown
    /// entries, evicts expired permission cache rows, and retires
    /// expired windows whose one-shot expiry task was skipped (the
    /// window was mid-consumption when it fired and the enforcement
    /// then failed).
    pub fn start_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let first_tick = Instant::now() + MAINTENANCE_INTERVAL;
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first_tick, MAINTENANCE_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = engine.cancel.cancelled() => {
                        debug!(community = %engine.community, "maintenance task stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let purged = engine.cooldowns.purge_stale();
                        if purged > 0 {
                            debug!(
                                community = %engine.community,
                                purged,
                                "purged quiet cooldown entries"
                            );
                        }
                        engine
                            .permission_cache
                            .retain(|_, e| e.checked_at.elapsed() <= PERMISSION_CACHE_TTL);
                        let lingering: Vec<(WindowKey, u64)> = engine
                            .armed
                            .iter()
                            .filter(|e| e.value().is_expired() && !e.value().is_consuming())
                            .map(|e| (*e.key(), e.value().generation))
                            .collect();
                        for (key, generation) in lingering {
                            engine.expire_window(&key, generation);
                        }
                    }
                }
            }
        })
    }

    /// Cancels every timer, monitor, and background task owned by the
    /// engine and drops ephemeral state.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.armed.clear();
        self.monitors.clear();
        self.permission_cache.clear();
        info!(community = %self.community, "protection engine shut down");
    }
}

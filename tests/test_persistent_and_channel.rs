//! Persistent and channel-bound modes end to end.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{CHANNEL, TARGET, TRIGGER, build_engine, join, leave, settle};
use voiceguard::registry::PairKey;
use voiceguard::router::MONITOR_INTERVAL;
use voiceguard::{ChannelId, RuleSpec};

#[tokio::test(start_paused = true)]
async fn persistent_removes_on_every_reentry() {
    let adapter = Arc::new(common::MockAdapter::default());
    let engine = build_engine(&adapter);
    engine
        .add_rule(RuleSpec::persistent(TARGET, TRIGGER))
        .await
        .unwrap();

    join(&engine, &adapter, TARGET, CHANNEL).await;
    for _ in 0..3 {
        join(&engine, &adapter, TRIGGER, CHANNEL).await;
        // Long after any instant window would have lapsed.
        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
    }

    assert_eq!(adapter.removals().len(), 3);
    assert_eq!(engine.monitor_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn persistent_monitor_sweeps_up_unrouted_entries() {
    let adapter = Arc::new(common::MockAdapter::default());
    let engine = build_engine(&adapter);
    engine
        .add_rule(RuleSpec::persistent(TARGET, TRIGGER))
        .await
        .unwrap();

    join(&engine, &adapter, TARGET, CHANNEL).await;
    // The trigger appears without an event reaching the engine.
    adapter.place(CHANNEL, TRIGGER);
    tokio::time::advance(MONITOR_INTERVAL).await;
    settle().await;

    assert_eq!(adapter.removals(), vec![(CHANNEL, TRIGGER)]);
}

#[tokio::test(start_paused = true)]
async fn persistent_ends_with_target_and_rearms_on_return() {
    let adapter = Arc::new(common::MockAdapter::default());
    let engine = build_engine(&adapter);
    engine
        .add_rule(RuleSpec::persistent(TARGET, TRIGGER))
        .await
        .unwrap();

    join(&engine, &adapter, TARGET, CHANNEL).await;
    leave(&engine, &adapter, TARGET, CHANNEL).await;
    assert_eq!(engine.monitor_count(), 0);

    // With the target gone, the trigger roams freely.
    join(&engine, &adapter, TRIGGER, CHANNEL).await;
    tokio::time::advance(MONITOR_INTERVAL * 5).await;
    settle().await;
    assert!(adapter.removals().is_empty());

    // The target returns: the monitor re-arms and catches the trigger.
    join(&engine, &adapter, TARGET, CHANNEL).await;
    assert_eq!(engine.monitor_count(), 1);
    assert_eq!(adapter.removals(), vec![(CHANNEL, TRIGGER)]);
}

#[tokio::test(start_paused = true)]
async fn persistent_follows_target_across_channels() {
    let adapter = Arc::new(common::MockAdapter::default());
    let engine = build_engine(&adapter);
    engine
        .add_rule(RuleSpec::persistent(TARGET, TRIGGER))
        .await
        .unwrap();
    let second = ChannelId(200);

    join(&engine, &adapter, TARGET, CHANNEL).await;
    leave(&engine, &adapter, TARGET, CHANNEL).await;
    join(&engine, &adapter, TARGET, second).await;
    assert_eq!(engine.monitor_count(), 1);

    join(&engine, &adapter, TRIGGER, second).await;
    assert_eq!(adapter.removals(), vec![(second, TRIGGER)]);
}

#[tokio::test(start_paused = true)]
async fn channel_mode_removes_target_not_trigger() {
    let adapter = Arc::new(common::MockAdapter::default());
    let engine = build_engine(&adapter);
    engine
        .add_rule(RuleSpec::channel(TARGET, TRIGGER, CHANNEL))
        .await
        .unwrap();

    adapter.place(CHANNEL, TRIGGER);
    join(&engine, &adapter, TARGET, CHANNEL).await;

    assert_eq!(adapter.removals(), vec![(CHANNEL, TARGET)]);
    // No escalation state for channel-bound removals.
    let pair = PairKey {
        target: TARGET,
        trigger: TRIGGER,
    };
    assert!(!engine.cooldown_status(pair).in_cooldown);
}

#[tokio::test(start_paused = true)]
async fn channel_mode_only_guards_its_channel() {
    let adapter = Arc::new(common::MockAdapter::default());
    let engine = build_engine(&adapter);
    engine
        .add_rule(RuleSpec::channel(TARGET, TRIGGER, ChannelId(555)))
        .await
        .unwrap();

    adapter.place(CHANNEL, TRIGGER);
    join(&engine, &adapter, TARGET, CHANNEL).await;

    assert!(adapter.removals().is_empty());
}

#[tokio::test(start_paused = true)]
async fn channel_mode_fires_on_trigger_arrival_too() {
    let adapter = Arc::new(common::MockAdapter::default());
    let engine = build_engine(&adapter);
    engine
        .add_rule(RuleSpec::channel(TARGET, TRIGGER, CHANNEL))
        .await
        .unwrap();

    adapter.place(CHANNEL, TARGET);
    join(&engine, &adapter, TRIGGER, CHANNEL).await;

    assert_eq!(adapter.removals(), vec![(CHANNEL, TARGET)]);
}

#[tokio::test(start_paused = true)]
async fn mixed_modes_for_one_pair_coexist() {
    let adapter = Arc::new(common::MockAdapter::default());
    let engine = build_engine(&adapter);
    engine
        .add_rule(RuleSpec::instant(TARGET, TRIGGER))
        .await
        .unwrap();
    engine
        .add_rule(RuleSpec::persistent(TARGET, TRIGGER))
        .await
        .unwrap();

    join(&engine, &adapter, TARGET, CHANNEL).await;
    assert_eq!(engine.armed_window_count(), 1);
    assert_eq!(engine.monitor_count(), 1);

    join(&engine, &adapter, TRIGGER, CHANNEL).await;
    // One entry, one removal; both paths agree on the outcome.
    assert_eq!(adapter.removals().len(), 1);
}

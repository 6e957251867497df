//! Shared test fixtures: an in-memory voice platform and event helpers.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use voiceguard::observability::EventEmitter;
use voiceguard::platform::{AdapterError, ChannelPermissions};
use voiceguard::store::MemoryStore;
use voiceguard::{
    ChannelId, CommunityId, MemberRef, ProtectionEngine, UserId, VoiceAdapter, VoiceEvent,
};

pub const COMMUNITY: CommunityId = CommunityId(1);
pub const TARGET: UserId = UserId(10);
pub const TRIGGER: UserId = UserId(20);
pub const CHANNEL: ChannelId = ChannelId(100);

/// Voice platform double backed by an in-memory occupancy map.
#[derive(Default)]
pub struct MockAdapter {
    members: Mutex<HashMap<ChannelId, HashSet<UserId>>>,
    removals: Mutex<Vec<(ChannelId, UserId)>>,
    deny_removal: AtomicBool,
    fail_lookups: AtomicBool,
}

impl MockAdapter {
    pub fn place(&self, channel: ChannelId, user: UserId) {
        self.members
            .lock()
            .unwrap()
            .entry(channel)
            .or_default()
            .insert(user);
    }

    pub fn vacate(&self, channel: ChannelId, user: UserId) {
        if let Some(set) = self.members.lock().unwrap().get_mut(&channel) {
            set.remove(&user);
        }
    }

    pub fn removals(&self) -> Vec<(ChannelId, UserId)> {
        self.removals.lock().unwrap().clone()
    }

    pub fn set_deny_removal(&self, deny: bool) {
        self.deny_removal.store(deny, Ordering::SeqCst);
    }

    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl VoiceAdapter for MockAdapter {
    async fn is_member_in_channel(
        &self,
        _community: CommunityId,
        channel: ChannelId,
        user: UserId,
    ) -> Result<bool, AdapterError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(AdapterError::LookupFailed("injected failure".into()));
        }
        Ok(self
            .members
            .lock()
            .unwrap()
            .get(&channel)
            .is_some_and(|set| set.contains(&user)))
    }

    async fn remove_member_from_channel(
        &self,
        _community: CommunityId,
        channel: ChannelId,
        user: UserId,
    ) -> Result<(), AdapterError> {
        self.vacate(channel, user);
        self.removals.lock().unwrap().push((channel, user));
        Ok(())
    }

    async fn fetch_channel_permissions(
        &self,
        _community: CommunityId,
        _channel: ChannelId,
    ) -> Result<ChannelPermissions, AdapterError> {
        Ok(ChannelPermissions {
            can_remove_members: !self.deny_removal.load(Ordering::SeqCst),
        })
    }
}

pub fn build_engine(adapter: &Arc<MockAdapter>) -> Arc<ProtectionEngine<MockAdapter>> {
    Arc::new(ProtectionEngine::new(
        COMMUNITY,
        Arc::clone(adapter),
        Arc::new(MemoryStore::new()),
        Arc::new(EventEmitter::noop()),
    ))
}

/// Places the user in the channel and routes the matching join event.
pub async fn join(
    engine: &Arc<ProtectionEngine<MockAdapter>>,
    adapter: &MockAdapter,
    user: UserId,
    channel: ChannelId,
) {
    adapter.place(channel, user);
    engine
        .handle_voice_event(&VoiceEvent {
            member: MemberRef::new(user, format!("user-{}", user.0)),
            old_channel: None,
            new_channel: Some(channel),
        })
        .await;
}

/// Removes the user from the channel and routes the matching leave event.
pub async fn leave(
    engine: &Arc<ProtectionEngine<MockAdapter>>,
    adapter: &MockAdapter,
    user: UserId,
    channel: ChannelId,
) {
    adapter.vacate(channel, user);
    engine
        .handle_voice_event(&VoiceEvent {
            member: MemberRef::new(user, format!("user-{}", user.0)),
            old_channel: Some(channel),
            new_channel: None,
        })
        .await;
}

/// Lets spawned timer tasks observe advanced paused time.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

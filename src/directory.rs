//! Directory of currently armed protections, keyed by channel.
//!
//! Exists solely so the recovery coordinator can find out what was armed
//! on a channel after the enforcing agent is knocked out of it. The
//! router never consults the directory for enforcement decisions.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::platform::{ChannelId, UserId};
use crate::registry::ProtectionMode;

/// Identity of an armed protection for recovery purposes.
///
/// The channel is the directory map key, so the key itself only carries
/// the pair and the mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtectionKey {
    /// The protected participant.
    pub target: UserId,
    /// The triggering participant.
    pub trigger: UserId,
    /// Mode of the armed protection.
    pub mode: ProtectionMode,
}

/// Multi-map of channel → armed protection keys.
#[derive(Debug, Default)]
pub struct ActiveProtectionDirectory {
    channels: DashMap<ChannelId, HashSet<ProtectionKey>>,
}

impl ActiveProtectionDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an armed protection on a channel.
    ///
    /// Returns `false` when the key was already registered.
    pub fn register(&self, channel: ChannelId, key: ProtectionKey) -> bool {
        self.channels.entry(channel).or_default().insert(key)
    }

    /// Unregisters a protection from a channel, dropping the channel
    /// entry when it becomes empty.
    ///
    /// Returns `false` when the key was not registered.
    pub fn unregister(&self, channel: ChannelId, key: &ProtectionKey) -> bool {
        let Some(mut keys) = self.channels.get_mut(&channel) else {
            return false;
        };
        let removed = keys.remove(key);
        let empty = keys.is_empty();
        drop(keys);
        if empty {
            self.channels.remove_if(&channel, |_, keys| keys.is_empty());
        }
        removed
    }

    /// Returns the protection keys registered on a channel.
    #[must_use]
    pub fn keys(&self, channel: ChannelId) -> Vec<ProtectionKey> {
        self.channels
            .get(&channel)
            .map(|keys| keys.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drops every key registered on a channel, returning how many there
    /// were.
    pub fn clear_channel(&self, channel: ChannelId) -> usize {
        self.channels
            .remove(&channel)
            .map_or(0, |(_, keys)| keys.len())
    }

    /// Total number of armed protections across all channels.
    #[must_use]
    pub fn total(&self) -> usize {
        self.channels.iter().map(|entry| entry.value().len()).sum()
    }

    /// Returns whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

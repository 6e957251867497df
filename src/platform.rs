//! Voice platform adapter seam.
//!
//! The engine never touches a platform SDK type directly. Everything it
//! needs from the underlying voice platform comes through the
//! [`VoiceAdapter`] trait and the minimal value types in this module, so
//! the core stays portable across platform client libraries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a community (guild/server) on the voice platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommunityId(pub u64);

/// Identifier of a participant on the voice platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u64);

/// Identifier of a voice channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl std::fmt::Display for CommunityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Minimal view of a platform member, supplied by the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    /// Platform user id.
    pub id: UserId,
    /// Display name, used only for log readability.
    pub display_name: String,
}

impl MemberRef {
    /// Creates a member reference.
    #[must_use]
    pub fn new(id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}

/// A membership-change event delivered by the platform.
///
/// `old_channel == new_channel` covers non-movement updates (mute, deafen)
/// which the router ignores.
#[derive(Debug, Clone)]
pub struct VoiceEvent {
    /// The member whose voice state changed.
    pub member: MemberRef,
    /// Channel the member occupied before the change, if any.
    pub old_channel: Option<ChannelId>,
    /// Channel the member occupies after the change, if any.
    pub new_channel: Option<ChannelId>,
}

impl VoiceEvent {
    /// Returns the channel the member entered, when this event is an
    /// entry or a move.
    #[must_use]
    pub fn entered_channel(&self) -> Option<ChannelId> {
        (self.old_channel != self.new_channel)
            .then_some(self.new_channel)
            .flatten()
    }

    /// Returns the channel the member left, when this event is an exit
    /// or a move.
    #[must_use]
    pub fn left_channel(&self) -> Option<ChannelId> {
        (self.old_channel != self.new_channel)
            .then_some(self.old_channel)
            .flatten()
    }
}

/// Permissions the enforcing agent holds in a given channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelPermissions {
    /// Whether the agent may remove members from the channel.
    pub can_remove_members: bool,
}

/// Errors surfaced by a [`VoiceAdapter`] implementation.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The agent lacks the permission required for the operation.
    #[error("permission missing on the platform")]
    PermissionDenied,

    /// A member or channel lookup failed.
    #[error("lookup failed: {0}")]
    LookupFailed(String),

    /// The platform is unreachable or returned a transport-level error.
    #[error("platform unavailable: {0}")]
    Unavailable(String),
}

/// Operations the engine needs from the voice platform.
///
/// Implementations wrap the platform SDK. Calls may block on network I/O
/// and may fail; the router treats every call as fallible and never holds
/// internal state locks across them.
#[async_trait]
pub trait VoiceAdapter: Send + Sync + 'static {
    /// Returns whether `user` currently occupies `channel`.
    async fn is_member_in_channel(
        &self,
        community: CommunityId,
        channel: ChannelId,
        user: UserId,
    ) -> Result<bool, AdapterError>;

    /// Removes `user` from `channel`.
    async fn remove_member_from_channel(
        &self,
        community: CommunityId,
        channel: ChannelId,
        user: UserId,
    ) -> Result<(), AdapterError>;

    /// Fetches the permissions the enforcing agent itself holds in
    /// `channel`.
    async fn fetch_channel_permissions(
        &self,
        community: CommunityId,
        channel: ChannelId,
    ) -> Result<ChannelPermissions, AdapterError>;
}

//! Error types for `voiceguard`.
//!
//! Domain-specific error enums aggregated into a single top-level
//! [`VoiceGuardError`]. Per-event router errors never propagate out of the
//! event loop; they exist so each enforcement path can decide whether a
//! protection stays armed, is dropped, or is retried on the next event.

use thiserror::Error;

use crate::platform::{ChannelId, UserId};

/// Top-level error type for `voiceguard` operations.
#[derive(Debug, Error)]
pub enum VoiceGuardError {
    /// Rule catalog error (validation, duplicates, lookups).
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Router/enforcement error.
    #[error(transparent)]
    Router(#[from] RouterError),

    /// Config store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Protection registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// An equivalent rule already exists.
    #[error("an equivalent rule already exists for target {target} and trigger {trigger}")]
    DuplicateRule {
        /// Protected participant of the conflicting rule.
        target: UserId,
        /// Triggering participant of the conflicting rule.
        trigger: UserId,
    },

    /// Bad mode/channel/window combination on rule creation.
    #[error("invalid rule: {0}")]
    InvalidArgument(String),

    /// A rule update would put the rule into an inconsistent state,
    /// e.g. a cooldown window on a persistent rule.
    #[error("invalid rule update: {0}")]
    InvalidState(String),

    /// No rule matched the given selector.
    #[error("no matching rule for target {target} and trigger {trigger}")]
    RuleNotFound {
        /// Protected participant of the selector.
        target: UserId,
        /// Triggering participant of the selector.
        trigger: UserId,
    },
}

/// Voice event router errors.
///
/// All variants are caught at the router boundary. `PermissionDenied`
/// leaves the protection armed, `PlatformFetchFailure` aborts the single
/// transition, `StaleTargetState` silently drops the armed instance.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The agent does not currently hold removal permission in the channel.
    #[error("removal permission not held in channel {channel}")]
    PermissionDenied {
        /// Channel where enforcement was attempted.
        channel: ChannelId,
    },

    /// A member or channel lookup against the platform failed.
    #[error("platform lookup failed: {0}")]
    PlatformFetchFailure(String),

    /// The target left the channel between arming and enforcement.
    #[error("target {target} is no longer in channel {channel}")]
    StaleTargetState {
        /// The protected participant.
        target: UserId,
        /// The channel the target was expected in.
        channel: ChannelId,
    },
}

/// Config store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Rule snapshot could not be serialized or deserialized.
    #[error("store serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for `voiceguard` operations.
pub type Result<T> = std::result::Result<T, VoiceGuardError>;

//! Voice channel protection engine.
//!
//! `voiceguard` keeps designated pairs of participants out of each
//! other's voice channels. Each protection rule names a *target* (the
//! protected participant) and a *trigger* (the participant to remove)
//! and reacts in one of three modes:
//!
//! - **instant**: entering a channel arms a short window around the
//!   target; a trigger arriving inside it is removed.
//! - **persistent**: the trigger is removed every time it enters a
//!   channel the target occupies, for as long as the target stays.
//! - **channel**: bound to one channel; the *target* is removed from it
//!   whenever both are present there.
//!
//! The engine is platform-agnostic: everything it needs from the voice
//! platform goes through the [`VoiceAdapter`] trait. One
//! [`ProtectionEngine`] runs per community, fed by
//! [`handle_voice_event`](router::ProtectionEngine::handle_voice_event).
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use voiceguard::observability::EventEmitter;
//! use voiceguard::store::MemoryStore;
//! use voiceguard::{CommunityId, ProtectionEngine, RuleSpec, UserId, VoiceAdapter};
//!
//! # async fn run(adapter: Arc<impl VoiceAdapter>) -> voiceguard::Result<()> {
//! let engine = Arc::new(ProtectionEngine::new(
//!     CommunityId(1),
//!     adapter,
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(EventEmitter::stderr()),
//! ));
//! engine.load_rules().await?;
//! engine
//!     .add_rule(RuleSpec::instant(UserId(10), UserId(20)))
//!     .await?;
//! let _maintenance = engine.start_maintenance();
//! # Ok(())
//! # }
//! ```

pub mod cooldown;
pub mod directory;
pub mod error;
pub mod observability;
pub mod platform;
pub mod registry;
pub mod router;
pub mod stats;
pub mod store;

pub use error::{Result, VoiceGuardError};
pub use platform::{ChannelId, CommunityId, MemberRef, UserId, VoiceAdapter, VoiceEvent};
pub use registry::{ProtectionMode, ProtectionRule, RuleKey, RuleSpec, RuleUpdate};
pub use router::ProtectionEngine;
pub use store::{ConfigStore, JsonFileStore, MemoryStore};

//! Ephemeral arming state for the voice event router.
//!
//! An armed instant window and a persistent monitor each own a
//! cancellation token and a generation number. The generation lets a
//! timer that fires after its window was replaced or torn down recognize
//! itself as stale and no-op; the consumption flag gives exactly-once
//! enforcement when an event and a timer race on the same window.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::platform::{ChannelId, UserId};

/// Key of an armed instant window: one per (target, trigger, channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowKey {
    /// The protected participant.
    pub target: UserId,
    /// The triggering participant.
    pub trigger: UserId,
    /// Channel the window is armed in.
    pub channel: ChannelId,
}

/// An armed instant-mode protection window.
///
/// Clones share the cancellation token and consumption flag, so a clone
/// taken out of the map can be used across an adapter call without
/// holding a map reference.
#[derive(Debug, Clone)]
pub struct ArmedWindow {
    /// When the window was armed.
    pub armed_at: Instant,
    /// Window length; the window is valid while `armed_at.elapsed()`
    /// does not exceed it.
    pub window: Duration,
    /// Arming generation, unique per arm/re-arm.
    pub generation: u64,
    /// Token cancelling the expiry task.
    pub cancel: CancellationToken,
    consuming: Arc<AtomicBool>,
}

impl ArmedWindow {
    /// Arms a fresh window starting now.
    #[must_use]
    pub fn new(window: Duration, generation: u64, cancel: CancellationToken) -> Self {
        Self {
            armed_at: Instant::now(),
            window,
            generation,
            cancel,
            consuming: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns whether the window has passed its expiry.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.armed_at.elapsed() > self.window
    }

    /// Returns the unexpired remainder of the window, or `None` when
    /// already expired.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        let elapsed = self.armed_at.elapsed();
        (elapsed <= self.window).then(|| self.window - elapsed)
    }

    /// Claims the window for enforcement.
    ///
    /// Exactly one caller wins when an event and a timer race; the loser
    /// must leave the window alone.
    pub fn try_begin_consume(&self) -> bool {
        self.consuming
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Releases a claim after a failed enforcement so the window stays
    /// armed until natural expiry.
    pub fn abort_consume(&self) {
        self.consuming.store(false, Ordering::SeqCst);
    }

    /// Returns whether an enforcement claim is in flight.
    #[must_use]
    pub fn is_consuming(&self) -> bool {
        self.consuming.load(Ordering::SeqCst)
    }
}

/// Handle to a running persistent monitor task.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    /// Channel the monitor watches.
    pub channel: ChannelId,
    /// Arming generation, unique per start/restart.
    pub generation: u64,
    /// Token cancelling the monitor task.
    pub cancel: CancellationToken,
}

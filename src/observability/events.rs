//! Structured event stream.
//!
//! Discrete, typed events emitted as the engine arms, enforces, and
//! recovers protections. Events are serialized as newline-delimited JSON
//! (JSONL) with a monotonically increasing sequence number so downstream
//! sinks (console, embeds, webhooks) can rely on ordering.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::platform::{ChannelId, CommunityId, UserId};
use crate::registry::ProtectionMode;

/// A discrete event emitted during engine operation.
///
/// Each variant is tagged with `"type"` when serialized so consumers can
/// dispatch on the event kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A protected target entered or moved to a channel.
    TargetEntered {
        /// When the target entered.
        timestamp: DateTime<Utc>,
        /// Community the event belongs to.
        community: CommunityId,
        /// The protected participant.
        target: UserId,
        /// The channel entered.
        channel: ChannelId,
        /// Number of protections armed as a result.
        rules_armed: usize,
    },

    /// A protection fired and a participant was removed.
    ProtectionActivated {
        /// When enforcement happened.
        timestamp: DateTime<Utc>,
        /// Community the event belongs to.
        community: CommunityId,
        /// The protected participant.
        target: UserId,
        /// The triggering participant.
        trigger: UserId,
        /// Channel where enforcement happened.
        channel: ChannelId,
        /// Mode of the rule that fired.
        mode: ProtectionMode,
        /// Instant-mode window length, when applicable.
        #[serde(skip_serializing_if = "Option::is_none")]
        window_ms: Option<u64>,
        /// Escalation attempt count, absent for channel mode.
        #[serde(skip_serializing_if = "Option::is_none")]
        attempt_count: Option<u32>,
    },

    /// The enforcing agent itself was removed from a channel holding
    /// active protections.
    ExternalInterference {
        /// When the interference was detected.
        timestamp: DateTime<Utc>,
        /// Community the event belongs to.
        community: CommunityId,
        /// Channel the agent was removed from.
        channel: ChannelId,
        /// Protections that were armed on the channel at that moment.
        active_protections: usize,
    },

    /// Summary of a recovery pass after external interference.
    Recovery {
        /// When recovery finished.
        timestamp: DateTime<Utc>,
        /// Community the event belongs to.
        community: CommunityId,
        /// Channel that was recovered.
        channel: ChannelId,
        /// Protections re-armed.
        restored: usize,
        /// Protections discarded (target gone or window expired).
        discarded: usize,
    },
}

/// Wraps an [`Event`] with a monotonically increasing sequence number.
#[derive(Debug, Serialize)]
struct EventEnvelope {
    sequence: u64,
    #[serde(flatten)]
    event: Event,
}

/// Thread-safe, buffered JSONL event writer.
///
/// Each call to [`emit`](Self::emit) atomically increments the sequence
/// counter, serializes the event as a single JSON line, and flushes the
/// underlying writer. Serialization or I/O failures are silently dropped
/// because observability must never crash the engine.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

// Box<dyn Write> is not Debug, so derive is unavailable.
impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Creates an emitter that silently discards all events.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that writes to a file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Emits an event as a single JSONL line.
    pub fn emit(&self, event: Event) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope {
            sequence: seq,
            event,
        };

        if let Ok(mut w) = self.writer.lock() {
            if let Ok(line) = serde_json::to_string(&envelope) {
                let _ = writeln!(w, "{line}");
                let _ = w.flush();
            }
        }
    }

    /// Returns the number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

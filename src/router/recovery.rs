//! Recovery after external interference.
//!
//! When the enforcing agent itself is removed from a voice channel, the
//! protections armed there lose their enforcement arm even though the
//! engine's in-memory state survives. The recovery pass re-validates
//! every protection the directory knows about on that channel and
//! re-arms the ones that still apply: instant windows continue with
//! their remaining time, persistent monitors are restarted. Anything
//! whose rule is gone, whose target has left, or whose window has run
//! out is discarded.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::directory::ProtectionKey;
use crate::observability::events::Event;
use crate::observability::metrics;
use crate::platform::{ChannelId, VoiceAdapter};
use crate::registry::{PairKey, ProtectionMode, RuleKey};
use crate::router::armed::WindowKey;
use crate::router::engine::ProtectionEngine;

impl<A: VoiceAdapter> ProtectionEngine<A> {
    /// Handles the enforcing agent being knocked out of `channel`.
    ///
    /// Embedders call this when the platform reports the agent's own
    /// voice state dropping from a channel. A channel with nothing armed
    /// is a no-op.
    pub async fn handle_agent_disconnect(self: &Arc<Self>, channel: ChannelId) {
        let keys = self.directory.keys(channel);
        if keys.is_empty() {
            debug!(
                community = %self.community,
                channel = %channel,
                "agent left channel with nothing armed"
            );
            return;
        }

        warn!(
            community = %self.community,
            channel = %channel,
            active = keys.len(),
            "agent removed from channel holding armed protections"
        );
        metrics::record_interference();
        self.emitter.emit(Event::ExternalInterference {
            timestamp: Utc::now(),
            community: self.community,
            channel,
            active_protections: keys.len(),
        });

        let mut restored = 0usize;
        let mut discarded = 0usize;

        for key in keys {
            let rule_key = RuleKey {
                target: key.target,
                trigger: key.trigger,
                mode: key.mode,
                channel: None,
            };
            let Some(rule) = self.registry.find(rule_key) else {
                self.drop_armed(channel, &key);
                discarded += 1;
                continue;
            };

            // A protection only survives recovery when its target is
            // still in the channel. A failed lookup counts as gone; the
            // next target entry re-arms from scratch.
            let target_present = match self
                .adapter
                .is_member_in_channel(self.community, channel, key.target)
                .await
            {
                Ok(present) => present,
                Err(err) => {
                    debug!(
                        community = %self.community,
                        target = %key.target,
                        channel = %channel,
                        %err,
                        "recovery lookup failed, discarding protection"
                    );
                    metrics::record_platform_failure("is_member_in_channel");
                    false
                }
            };
            if !target_present {
                self.drop_armed(channel, &key);
                discarded += 1;
                continue;
            }

            match key.mode {
                ProtectionMode::Instant => {
                    let wkey = WindowKey {
                        target: key.target,
                        trigger: key.trigger,
                        channel,
                    };
                    let remaining = self.armed.get(&wkey).and_then(|w| w.remaining());
                    if let Some(remaining) = remaining {
                        self.arm_window(&rule, channel, remaining);
                        restored += 1;
                    } else {
                        self.drop_armed(channel, &key);
                        discarded += 1;
                    }
                }
                ProtectionMode::Persistent => {
                    self.start_monitor(&rule, channel);
                    restored += 1;
                }
                ProtectionMode::Channel => {
                    // Channel-bound rules hold no armed state, so a key
                    // like this is stale bookkeeping.
                    self.directory.unregister(channel, &key);
                    discarded += 1;
                }
            }
        }

        info!(
            community = %self.community,
            channel = %channel,
            restored,
            discarded,
            "recovery pass complete"
        );
        metrics::record_recovered(restored as u64);
        self.emitter.emit(Event::Recovery {
            timestamp: Utc::now(),
            community: self.community,
            channel,
            restored,
            discarded,
        });
    }

    fn drop_armed(&self, channel: ChannelId, key: &ProtectionKey) {
        match key.mode {
            ProtectionMode::Instant => self.discard_window(
                &WindowKey {
                    target: key.target,
                    trigger: key.trigger,
                    channel,
                },
                "discarded during recovery",
            ),
            ProtectionMode::Persistent => self.stop_monitor(PairKey {
                target: key.target,
                trigger: key.trigger,
            }),
            ProtectionMode::Channel => {}
        }
        // The teardown above unregisters only when armed state still
        // existed; make sure the directory entry goes either way.
        self.directory.unregister(channel, key);
    }
}

//! Seams to the layers around the core: who is online, and where notices go.
//!
//! The session layer reports connections through [`Presence`], which the
//! market makers read as a [`PresenceProvider`]. Notices are pushed to a
//! [`BroadcastSink`] and never awaited; a sink with no listeners drops them.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::debug;

use kingdom_economy::PresenceProvider;
use kingdom_types::{Notice, PlayerId, SettlementId};

/// Fire-and-forget destination for [`Notice`]s.
pub trait BroadcastSink: Send + Sync {
    /// Publish a notice. Must not block.
    fn publish(&self, notice: Notice);
}

/// A sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl BroadcastSink for NullSink {
    fn publish(&self, _notice: Notice) {}
}

/// A sink backed by a tokio broadcast channel.
///
/// Slow subscribers lag and lose old notices rather than holding up the
/// simulation.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: broadcast::Sender<Notice>,
}

impl ChannelSink {
    /// A sink buffering up to `capacity` notices per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// A new receiver for notices published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.sender.subscribe()
    }
}

impl BroadcastSink for ChannelSink {
    fn publish(&self, notice: Notice) {
        if self.sender.send(notice).is_err() {
            debug!("Notice dropped, no subscribers");
        }
    }
}

/// Online players and the settlement each is in.
#[derive(Debug, Default)]
pub struct Presence {
    online: RwLock<BTreeMap<PlayerId, SettlementId>>,
}

impl Presence {
    /// Nobody online.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a player online in `settlement`, or record a move.
    pub fn enter(&self, player: PlayerId, settlement: SettlementId) {
        self.online
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(player, settlement);
    }

    /// Mark a player offline.
    pub fn leave(&self, player: PlayerId) {
        self.online
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&player);
    }

    /// Move an online player. Offline players stay offline.
    pub fn moved(&self, player: PlayerId, settlement: SettlementId) {
        if let Some(at) = self
            .online
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&player)
        {
            *at = settlement;
        }
    }

    /// Every online player.
    pub fn players(&self) -> Vec<PlayerId> {
        self.online
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Total players online.
    pub fn total(&self) -> usize {
        self.online
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl PresenceProvider for Presence {
    fn online_in(&self, settlement: SettlementId) -> u32 {
        let online = self.online.read().unwrap_or_else(PoisonError::into_inner);
        let count = online.values().filter(|s| **s == settlement).count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn presence_counts_per_settlement() {
        let presence = Presence::new();
        let a = SettlementId::new();
        let b = SettlementId::new();
        let (p, q, r) = (PlayerId::new(), PlayerId::new(), PlayerId::new());
        presence.enter(p, a);
        presence.enter(q, a);
        presence.enter(r, b);
        assert_eq!(presence.online_in(a), 2);

        presence.moved(q, b);
        presence.leave(r);
        presence.moved(r, a);
        assert_eq!(presence.online_in(a), 1);
        assert_eq!(presence.online_in(b), 1);
        assert_eq!(presence.total(), 2);
    }

    #[tokio::test]
    async fn channel_sink_delivers_to_subscribers() {
        let sink = ChannelSink::new(8);
        sink.publish(Notice::global("nobody hears this"));
        let mut rx = sink.subscribe();
        sink.publish(Notice::global("hello"));
        assert_eq!(rx.recv().await.unwrap().message, "hello");
    }
}

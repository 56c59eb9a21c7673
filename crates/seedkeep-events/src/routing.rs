//! Event bus routing helpers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast::{self, Sender};
use tokio_stream::wrappers::BroadcastStream;

use crate::payloads::{DEFAULT_REPLAY_CAPACITY, Event, EventEnvelope, EventId};

/// Stream wrapper used by subscribers.
pub type EventStream = BroadcastStream<EventEnvelope>;

/// Shared event bus built on top of `tokio::broadcast`.
///
/// Publishing never blocks and never fails: with no subscribers the envelope
/// only lands in the replay ring.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    state: Arc<Mutex<BusState>>,
    replay_capacity: usize,
}

struct BusState {
    next_id: EventId,
    replay: VecDeque<EventEnvelope>,
}

impl EventBus {
    /// Construct a bus with a custom replay capacity.
    #[must_use]
    pub fn with_capacity(replay_capacity: usize) -> Self {
        let capacity = replay_capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            state: Arc::new(Mutex::new(BusState {
                next_id: 1,
                replay: VecDeque::with_capacity(capacity),
            })),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default replay capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Register a new subscriber that receives every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish a new event to all subscribers and return its identifier.
    pub fn publish(&self, event: Event) -> EventId {
        let envelope = {
            let mut state = self.lock_state();
            let id = state.next_id;
            state.next_id = state.next_id.saturating_add(1);
            let envelope = EventEnvelope {
                id,
                timestamp: Utc::now(),
                event,
            };
            if state.replay.len() == self.replay_capacity {
                let _ = state.replay.pop_front();
            }
            state.replay.push_back(envelope.clone());
            envelope
        };
        let id = envelope.id;
        let _ = self.sender.send(envelope);
        id
    }

    /// Last event id observed in the replay buffer.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.lock_state().replay.back().map(|env| env.id)
    }

    /// Collect a backlog of events emitted after the specified id.
    #[must_use]
    pub fn backlog_since(&self, id: EventId) -> Vec<EventEnvelope> {
        self.lock_state()
            .replay
            .iter()
            .filter(|env| env.id > id)
            .cloned()
            .collect()
    }

    fn lock_state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::TorrentState;
    use tokio_stream::StreamExt;

    fn hash() -> crate::InfoHash {
        "ffffffffffffffffffffffffffffffffffffffff"
            .parse()
            .expect("valid hash")
    }

    #[tokio::test]
    async fn publish_assigns_sequential_ids_and_bounds_replay() {
        let bus = EventBus::with_capacity(2);
        let first = bus.publish(Event::SessionStarted);
        let second = bus.publish(Event::TorrentResumed { torrent_id: hash() });
        let third = bus.publish(Event::TorrentFinished { torrent_id: hash() });

        assert_eq!(second, first + 1);
        assert_eq!(bus.last_event_id(), Some(third));
        let backlog = bus.backlog_since(0);
        assert_eq!(backlog.len(), 2);
        assert_eq!(backlog[0].id, second);
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let id = bus.publish(Event::StateChanged {
            torrent_id: hash(),
            state: TorrentState::Paused,
        });
        for stream in [&mut first, &mut second] {
            let envelope = stream
                .next()
                .await
                .expect("stream item")
                .expect("broadcast ok");
            assert_eq!(envelope.id, id);
            assert!(matches!(envelope.event, Event::StateChanged { .. }));
        }
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::default();
        let id = bus.publish(Event::SessionStarted);
        assert_eq!(bus.backlog_since(id).len(), 0);
        assert_eq!(bus.backlog_since(id - 1).len(), 1);
    }
}

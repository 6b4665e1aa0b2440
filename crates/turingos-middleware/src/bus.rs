//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.  The scheduler runs its turns on one task; observers read
//! from their own receivers at their own pace.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Scheduling`] | spawn, state changes, map fan-out, reduce join, halt verdicts |
//! | [`Topic::Traps`] | trap frames and kills |
//! | [`Topic::Routing`] | dispatcher route traces |
//! | [`Topic::Journal`] | every line engraved into the journal |
//!
//! Every topic publish is mirrored onto a firehose channel, reachable with
//! [`EventBus::subscribe`] and [`EventBus::subscribe_topic`].

use tokio::sync::broadcast;
use tracing::warn;
use turingos_types::{Event, EventPayload, TuringError};

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Scheduling,
    Traps,
    Routing,
    Journal,
}

impl Topic {
    /// The topic an event payload naturally belongs to.
    pub fn for_payload(payload: &EventPayload) -> Topic {
        match payload {
            EventPayload::ProcessSpawned { .. }
            | EventPayload::StateChanged { .. }
            | EventPayload::MapFanOut { .. }
            | EventPayload::ReduceJoin { .. }
            | EventPayload::HaltVerdict { .. } => Topic::Scheduling,
            EventPayload::Trap { .. } => Topic::Traps,
            EventPayload::Route(_) => Topic::Routing,
            EventPayload::JournalLine(_) => Topic::Journal,
        }
    }
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    firehose: broadcast::Sender<Event>,
    scheduling: broadcast::Sender<Event>,
    traps: broadcast::Sender<Event>,
    routing: broadcast::Sender<Event>,
    journal: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus; `capacity` applies to every channel independently.
    pub fn new(capacity: usize) -> Self {
        let (firehose, _) = broadcast::channel(capacity);
        let (scheduling, _) = broadcast::channel(capacity);
        let (traps, _) = broadcast::channel(capacity);
        let (routing, _) = broadcast::channel(capacity);
        let (journal, _) = broadcast::channel(capacity);
        Self {
            firehose,
            scheduling,
            traps,
            routing,
            journal,
        }
    }

    // -----------------------------------------------------------------------
    // Publishing
    // -----------------------------------------------------------------------

    /// Publish `event` to `topic` and mirror it onto the firehose.
    ///
    /// Returns the total number of receivers handed the event.  When nobody
    /// listens at all a [`TuringError::Channel`] is returned; callers that
    /// publish best-effort simply ignore it.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, TuringError> {
        let on_firehose = self.firehose.send(event.clone()).unwrap_or(0);
        match self.topic_sender(topic).send(event) {
            Ok(n) => Ok(n + on_firehose),
            Err(broadcast::error::SendError(_)) if on_firehose > 0 => Ok(on_firehose),
            Err(broadcast::error::SendError(_)) => Err(TuringError::Channel(format!(
                "No subscribers for topic {topic:?}"
            ))),
        }
    }

    /// Publish to the topic derived from the payload.
    pub fn publish(&self, event: Event) -> Result<usize, TuringError> {
        let topic = Topic::for_payload(&event.payload);
        self.publish_to(topic, event)
    }

    // -----------------------------------------------------------------------
    // Subscribing
    // -----------------------------------------------------------------------

    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Subscribe to every event regardless of topic.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.firehose.subscribe()
    }

    /// Firehose subscription filtered by `source` prefix.
    pub fn subscribe_topic(&self, source_prefix: impl Into<String>) -> TopicSubscriber {
        TopicSubscriber {
            prefix: source_prefix.into(),
            receiver: self.firehose.subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Scheduling => &self.scheduling,
            Topic::Traps => &self.traps,
            Topic::Routing => &self.routing,
            Topic::Journal => &self.journal,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Receivers
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`Topic`] channel.
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// `Lagged(n)` means this receiver fell behind and `n` events were
    /// dropped; `Closed` means the bus is gone.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking variant, used by the scheduler's own drain loops and tests.
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

/// A firehose subscriber that only delivers events whose `source` starts
/// with the given prefix.
pub struct TopicSubscriber {
    prefix: String,
    receiver: broadcast::Receiver<Event>,
}

impl TopicSubscriber {
    /// Wait for the next matching event; `None` once the bus is closed.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.source.starts_with(&self.prefix) => {
                    return Some(event);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(prefix = %self.prefix, lagged_by = n, "TopicSubscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turingos_types::{Pid, Role};

    fn make_event(source: &str) -> Event {
        Event::new(
            source,
            EventPayload::ProcessSpawned {
                pid: Pid(1),
                ppid: None,
                role: Role::Planner,
            },
        )
    }

    #[tokio::test]
    async fn publish_and_receive_on_firehose() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let event = make_event("turingos-runtime::scheduler");
        bus.publish(event.clone())?;

        let received = rx.recv().await?;
        assert_eq!(received.id, event.id);
        Ok(())
    }

    #[tokio::test]
    async fn source_prefix_subscriber_filters() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut sub = bus.subscribe_topic("turingos-runtime::dispatcher");

        bus.publish(make_event("turingos-runtime::scheduler"))?;
        let good = make_event("turingos-runtime::dispatcher");
        bus.publish(good.clone())?;

        let received = sub.recv().await.ok_or("No event received")?;
        assert_eq!(received.id, good.id);
        Ok(())
    }

    #[test]
    fn publish_no_subscribers_returns_error() {
        let bus = EventBus::default();
        assert!(bus.publish(make_event("test")).is_err());
    }

    #[test]
    fn payload_topic_routing() {
        assert_eq!(
            Topic::for_payload(&EventPayload::JournalLine("x".into())),
            Topic::Journal
        );
        assert_eq!(
            Topic::for_payload(&make_event("t").payload),
            Topic::Scheduling
        );
    }

    #[tokio::test]
    async fn topic_subscriber_does_not_receive_other_topic_events()
    -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut traps = bus.subscribe_to(Topic::Traps);
        let _scheduling = bus.subscribe_to(Topic::Scheduling);

        bus.publish(make_event("turingos-runtime::scheduler"))?;

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), traps.recv()).await;
        assert!(result.is_err(), "Traps subscriber must not see scheduling events");
        Ok(())
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(16);
        let mut slow = bus.subscribe_to(Topic::Scheduling);
        for _ in 0..1_000 {
            let _ = bus.publish(make_event("flood"));
        }
        let result = slow.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged error, got: {result:?}"
        );
    }
}

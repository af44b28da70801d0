//! Tokio broadcast event bus for engine notifications.
//!
//! Clients subscribe to learn about proposals awaiting approval and answers
//! becoming ready without polling. Publishing never blocks; slow subscribers
//! lag and skip events.

use crate::models::{EngineEvent, RequestId};
use tokio::sync::broadcast;

/// Default buffer capacity.
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 1024;

/// Event bus owned by one engine instance.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

/// Filtered receiver that yields events matching a predicate.
pub struct FilteredReceiver<F> {
    receiver: broadcast::Receiver<EngineEvent>,
    predicate: F,
}

impl EventBus {
    /// Creates a new event bus with the given buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers (best effort).
    #[allow(clippy::cast_precision_loss)]
    pub fn publish(&self, event: EngineEvent) {
        metrics::counter!("groundline_event_bus_publish_total", "event" => event.event_type())
            .increment(1);
        if self.sender.send(event).is_ok() {
            metrics::gauge!("groundline_event_bus_queue_depth").set(self.sender.len() as f64);
        }
    }

    /// Subscribes to every event.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Subscribes with a predicate to filter events by type or attributes.
    #[must_use]
    pub fn subscribe_filtered<F>(&self, predicate: F) -> FilteredReceiver<F>
    where
        F: Fn(&EngineEvent) -> bool,
    {
        FilteredReceiver {
            receiver: self.sender.subscribe(),
            predicate,
        }
    }

    /// Subscribes to events matching the provided event type.
    #[must_use]
    pub fn subscribe_event_type(
        &self,
        event_type: &'static str,
    ) -> FilteredReceiver<impl Fn(&EngineEvent) -> bool> {
        self.subscribe_filtered(move |event| event.event_type() == event_type)
    }

    /// Subscribes to events of one request.
    #[must_use]
    pub fn subscribe_request(
        &self,
        request_id: RequestId,
    ) -> FilteredReceiver<impl Fn(&EngineEvent) -> bool> {
        self.subscribe_filtered(move |event| *event.request_id() == request_id)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUS_CAPACITY)
    }
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&EngineEvent) -> bool,
{
    /// Receives the next event that matches the predicate.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Closed` once the bus is dropped.
    pub async fn recv(&mut self) -> Result<EngineEvent, broadcast::error::RecvError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if (self.predicate)(&event) {
                        return Ok(event);
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    metrics::counter!("groundline_event_bus_lagged_total").increment(skipped);
                },
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventMeta, SessionId};

    #[tokio::test]
    async fn test_subscribe_filtered_skips_non_matching() {
        let bus = EventBus::new(16);
        let mut filtered = bus.subscribe_event_type("answer.ready");

        bus.publish(EngineEvent::RequestStarted {
            meta: EventMeta::new("test", RequestId::new("r1")),
            session_id: SessionId::new("s1"),
        });
        bus.publish(EngineEvent::AnswerReady {
            meta: EventMeta::new("test", RequestId::new("r1")),
            refused: false,
            refusal_reason: None,
            citation_count: 2,
        });

        let event = filtered.recv().await;
        assert_eq!(event.map(|e| e.event_type()).ok(), Some("answer.ready"));
    }

    #[tokio::test]
    async fn test_subscribe_request_filters_by_id() {
        let bus = EventBus::default();
        let mut mine = bus.subscribe_request(RequestId::new("mine"));

        bus.publish(EngineEvent::RequestStarted {
            meta: EventMeta::new("test", RequestId::new("other")),
            session_id: SessionId::new("s1"),
        });
        bus.publish(EngineEvent::RequestStarted {
            meta: EventMeta::new("test", RequestId::new("mine")),
            session_id: SessionId::new("s2"),
        });

        let event = mine.recv().await;
        assert_eq!(
            event.ok().map(|e| e.request_id().as_str().to_string()),
            Some("mine".to_string())
        );
    }
}

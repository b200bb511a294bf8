//! Stream Event Hub
//!
//! Fans [`StreamEvent`]s out to any number of subscribers over a tokio
//! broadcast channel. Publishing never blocks; a subscriber that falls more
//! than `capacity` events behind sees `RecvError::Lagged` and skips ahead.

use tokio::sync::broadcast;

use crate::application::ports::{EventPublisherPort, StreamEvent};

/// Broadcast fan-out for stream events.
#[derive(Debug)]
pub struct EventHub {
    sender: broadcast::Sender<StreamEvent>,
}

impl EventHub {
    /// Create a hub buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            sender: broadcast::channel(capacity.max(1)).0,
        }
    }

    /// Subscribe to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventPublisherPort for EventHub {
    fn publish(&self, event: StreamEvent) -> usize {
        // No subscribers is not an error.
        self.sender.send(event).unwrap_or(0)
    }
}

/// Log every event as JSON until the hub closes.
pub async fn log_events(mut rx: broadcast::Receiver<StreamEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => tracing::debug!(event = event.name(), payload = %json, "Stream event"),
                Err(e) => tracing::warn!(event = event.name(), error = %e, "Unserializable event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event logger lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers() {
        let hub = EventHub::new(4);
        assert_eq!(hub.receiver_count(), 0);
        assert_eq!(
            hub.publish(StreamEvent::VwapUpdated {
                vwap: 1.0,
                price: 1.0,
                timestamp: 0
            }),
            0
        );
    }

    #[tokio::test]
    async fn subscribers_receive_in_order() {
        let hub = EventHub::new(4);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        for ts in 0..3 {
            assert_eq!(
                hub.publish(StreamEvent::VwapUpdated {
                    vwap: 1.0,
                    price: 1.0,
                    timestamp: ts
                }),
                2
            );
        }

        for rx in [&mut a, &mut b] {
            for expected in 0..3 {
                match rx.recv().await.unwrap() {
                    StreamEvent::VwapUpdated { timestamp, .. } => assert_eq!(timestamp, expected),
                    other => panic!("unexpected event {other:?}"),
                }
            }
        }
    }

    #[tokio::test]
    async fn slow_subscriber_lags() {
        let hub = EventHub::new(2);
        let mut rx = hub.subscribe();
        for ts in 0..5 {
            hub.publish(StreamEvent::VwapUpdated {
                vwap: 1.0,
                price: 1.0,
                timestamp: ts,
            });
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
    }
}

use tokio::sync::broadcast;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 1024;

/// Per-tenant audit feed. Every committed event is broadcast here after it is durable;
/// the notification collaborator subscribes on the other end.
pub struct AuditHub {
    sender: broadcast::Sender<Event>,
}

impl AuditHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Send an audit record. No-op if nobody is listening; slow listeners lag, writers never wait.
    pub fn send(&self, event: &Event) {
        let _ = self.sender.send(event.clone());
    }
}

impl Default for AuditHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = AuditHub::new();
        let mut rx = hub.subscribe();

        let event = Event::RuleRemoved { id: Ulid::new() };
        hub.send(&event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = AuditHub::new();
        // No subscriber, should not panic
        hub.send(&Event::RuleRemoved { id: Ulid::new() });
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let hub = AuditHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        let first = Event::RuleRemoved { id: Ulid::new() };
        let second = Event::RuleRemoved { id: Ulid::new() };
        hub.send(&first);
        hub.send(&second);
        assert_eq!(a.recv().await.unwrap(), first);
        assert_eq!(a.recv().await.unwrap(), second);
        assert_eq!(b.recv().await.unwrap(), first);
    }
}

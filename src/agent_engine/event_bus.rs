use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::agent_engine::state::RunState;
use crate::errors::ErrorPayload;

/// Receives run snapshots as the loop produces them.
///
/// `on_data` fires at run start, after every appended turn, and once at the
/// end of the run. `on_error` fires at most once, when the run throws;
/// budget exhaustion only shows in the final snapshot.
#[async_trait]
pub trait AgentObserver: Send + Sync {
    async fn on_data(&self, data: &RunState);

    async fn on_error(&self, _data: &RunState, _error: &ErrorPayload) {}

    async fn on_warning(&self, _data: &RunState, _message: &str) {}
}

/// Observer that drops everything.
pub struct NoopObserver;

#[async_trait]
impl AgentObserver for NoopObserver {
    async fn on_data(&self, _data: &RunState) {}
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Data { data: RunState },
    Error { data: RunState, error: ErrorPayload },
    Warning { data: RunState, message: String },
}

/// Fans run events out to any number of subscribers.
pub struct EventBus {
    tx: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }

    fn send(&self, event: AgentEvent) {
        // No subscribers is fine; events are fire-and-forget.
        if self.tx.send(event).is_err() {
            tracing::trace!("agent event dropped, no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl AgentObserver for EventBus {
    async fn on_data(&self, data: &RunState) {
        self.send(AgentEvent::Data { data: data.clone() });
    }

    async fn on_error(&self, data: &RunState, error: &ErrorPayload) {
        self.send(AgentEvent::Error {
            data: data.clone(),
            error: error.clone(),
        });
    }

    async fn on_warning(&self, data: &RunState, message: &str) {
        self.send(AgentEvent::Warning {
            data: data.clone(),
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;

    #[tokio::test]
    async fn test_subscribers_receive_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let state = RunState::new("hello", String::new());

        bus.on_data(&state).await;
        bus.on_error(&state, &ErrorPayload::new(ErrorCode::Unknown, "boom")).await;

        assert!(matches!(rx.recv().await.unwrap(), AgentEvent::Data { .. }));
        match rx.recv().await.unwrap() {
            AgentEvent::Error { error, .. } => assert_eq!(error.message, "boom"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.on_warning(&RunState::new("x", String::new()), "careful").await;
    }
}

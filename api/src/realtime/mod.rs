use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::types::UserId;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A chat message was posted.
    Message,
    /// A participant marked a chat as read.
    Read,
    /// A match request was created, applied to, accepted or rejected.
    MatchRequest,
    /// A partnership was created, changed or removed.
    Partner,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::Read => "read",
            EventKind::MatchRequest => "match_request",
            EventKind::Partner => "partner",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RealtimeEvent {
    pub recipients: Vec<String>,
    pub kind: EventKind,
    pub payload: serde_json::Value,
}

impl RealtimeEvent {
    pub fn new(kind: EventKind, recipients: &[&str], payload: serde_json::Value) -> Self {
        Self {
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            kind,
            payload,
        }
    }
}

/// In-process fan-out of change notifications to `/v1/events` listeners.
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<Arc<RealtimeEvent>>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns the number of connected listeners that saw the event.
    pub fn publish(&self, event: RealtimeEvent) -> usize {
        tracing::debug!(
            kind = event.kind.as_str(),
            recipients = event.recipients.len(),
            "publishing realtime event"
        );
        // Err only means nobody is listening.
        self.tx.send(Arc::new(event)).unwrap_or(0)
    }

    /// Events addressed to `user_id`. Lagged listeners skip what they missed.
    pub fn subscribe(
        &self,
        user_id: UserId,
    ) -> impl Stream<Item = Arc<RealtimeEvent>> + Send + use<> {
        BroadcastStream::new(self.tx.subscribe()).filter_map(move |received| match received {
            Ok(event) if event.recipients.iter().any(|r| r == user_id.as_str()) => Some(event),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(user_id = %user_id, skipped, "realtime listener lagged");
                None
            }
        })
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

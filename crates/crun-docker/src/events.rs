//! Daemon event subscription.

use crate::api;
use crate::error::Result;
use crate::models::EventMessage;
use crate::streams::ndjson_stream;
use crate::transport::{Request, Transport};
use crun_types::{Event, EventFilter, EventType};
use futures_util::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;

/// Infinite, ordered sequence of daemon events. Restartable only by
/// opening a new subscription; a disconnect surfaces as a stream error,
/// and resubscribers must accept a possible gap.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event>> + Send>>;

#[derive(Clone)]
pub struct EventSubscriber {
    transport: Arc<Transport>,
}

impl EventSubscriber {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    /// `GET /events?filters=...` → typed event stream.
    pub async fn subscribe(&self, filter: EventFilter) -> Result<EventStream> {
        let mut request = Request::get("/events");
        if !filter.is_empty() {
            let encoded = serde_json::to_string(&filter.to_filter_map())
                .map_err(|e| crate::error::CodecError::SchemaMismatch(e.to_string()))?;
            request = request.query("filters", encoded);
        }
        let session = api::open_stream(&self.transport, request).await?;
        let raw = ndjson_stream::<EventMessage>(session, true);
        Ok(Box::pin(raw.map(|item| item.map(event_from_message))))
    }
}

/// Convert a wire event into the typed form. The nanosecond timestamp is
/// preferred; the daemon guarantees it is monotonic within one stream.
fn event_from_message(message: EventMessage) -> Event {
    let (actor_id, attributes) = message
        .actor
        .map(|a| (a.id, a.attributes.unwrap_or_default()))
        .unwrap_or_default();
    Event {
        timestamp: message
            .time_nano
            .or_else(|| message.time.map(|s| s.saturating_mul(1_000_000_000)))
            .unwrap_or_default(),
        event_type: message.typ.as_deref().map(EventType::from).unwrap_or(
            EventType::Other(String::new()),
        ),
        action: message.action.unwrap_or_default(),
        actor_id,
        attributes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventActor;
    use std::collections::HashMap;

    #[test]
    fn event_conversion_prefers_nano_timestamp() {
        let message = EventMessage {
            typ: Some("container".to_owned()),
            action: Some("die".to_owned()),
            actor: Some(EventActor {
                id: Some("abc".to_owned()),
                attributes: Some(HashMap::from([(
                    "exitCode".to_owned(),
                    "0".to_owned(),
                )])),
            }),
            time: Some(10),
            time_nano: Some(10_000_000_042),
            ..Default::default()
        };
        let event = event_from_message(message);
        assert_eq!(event.timestamp, 10_000_000_042);
        assert_eq!(event.event_type, EventType::Container);
        assert_eq!(event.container_id(), Some("abc"));
        assert_eq!(event.attributes["exitCode"], "0");
    }

    #[test]
    fn event_conversion_falls_back_to_seconds() {
        let message = EventMessage {
            typ: Some("image".to_owned()),
            time: Some(2),
            ..Default::default()
        };
        assert_eq!(event_from_message(message).timestamp, 2_000_000_000);
    }
}

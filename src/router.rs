use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::error::HandlerError;
use crate::model::{BookingChannel, Payload};

/// Substituted when a keyed field is missing from an event.
pub const PLACEHOLDER: &str = "Unknown";

pub type Handler = Box<dyn Fn(&Payload) -> Result<(), HandlerError> + Send + Sync>;

/// Consumer of user-facing notification lines.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, channel: BookingChannel, line: &str);
}

/// Writes notifications through `tracing`.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, channel: BookingChannel, line: &str) {
        info!(target: "booking_notify", channel = %channel, "{}", line);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Handled,
    Unrouted,
}

/// Channel name → handler table. Built once, then only read.
#[derive(Default)]
pub struct EventRouter {
    routes: HashMap<String, Handler>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route<F>(mut self, channel: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Payload) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.routes.insert(channel.into(), Box::new(handler));
        self
    }

    /// Router announcing each booking channel on `sink`.
    pub fn bookings(sink: Arc<dyn NotificationSink>) -> Self {
        BookingChannel::ALL
            .into_iter()
            .fold(EventRouter::new(), |router, channel| {
                let sink = sink.clone();
                router.with_route(channel.as_str(), move |payload: &Payload| {
                    sink.notify(channel, &notification_line(channel, payload));
                    Ok(())
                })
            })
    }

    pub fn route(&self, channel: &str, payload: &Payload) -> Result<Routed, HandlerError> {
        match self.routes.get(channel) {
            Some(handler) => {
                handler(payload)?;
                Ok(Routed::Handled)
            }
            None => Ok(Routed::Unrouted),
        }
    }
}

pub fn notification_line(channel: BookingChannel, payload: &Payload) -> String {
    match channel {
        BookingChannel::Created => {
            format!("🎉 New booking created: {}", field_or_placeholder(payload, "title"))
        }
        BookingChannel::Updated => {
            format!("📝 Booking updated: {}", field_or_placeholder(payload, "title"))
        }
        BookingChannel::Deleted => {
            format!("🗑️ Booking deleted: {}", field_or_placeholder(payload, "bookingId"))
        }
        BookingChannel::Reminder => {
            format!("⏰ Booking reminder: {}", field_or_placeholder(payload, "title"))
        }
    }
}

fn field_or_placeholder(payload: &Payload, key: &str) -> String {
    match payload.data_field(key) {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => PLACEHOLDER.to_string(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        lines: Mutex<Vec<(BookingChannel, String)>>,
    }

    impl NotificationSink for RecordingSink {
        fn notify(&self, channel: BookingChannel, line: &str) {
            self.lines.lock().unwrap().push((channel, line.to_string()));
        }
    }

    #[test]
    fn booking_router_announces_title() {
        let sink = Arc::new(RecordingSink::default());
        let router = EventRouter::bookings(sink.clone());
        let payload = Payload::Json(
            json!({"event":"booking.created","data":{"title":"Standup"},"timestamp":"T"}),
        );
        assert_eq!(router.route("booking.created", &payload).unwrap(), Routed::Handled);
        let lines = sink.lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, BookingChannel::Created);
        assert!(lines[0].1.contains("Standup"));
    }

    #[test]
    fn every_registry_channel_is_routed() {
        let sink = Arc::new(RecordingSink::default());
        let router = EventRouter::bookings(sink.clone());
        let payload = Payload::Json(json!({"data": {"title": "x", "bookingId": "b"}}));
        for name in BookingChannel::names() {
            assert_eq!(router.route(name, &payload).unwrap(), Routed::Handled);
        }
        let channels: Vec<BookingChannel> =
            sink.lines.lock().unwrap().iter().map(|(c, _)| *c).collect();
        assert_eq!(channels, BookingChannel::ALL.to_vec());
    }

    #[test]
    fn unknown_channel_is_ignored() {
        let sink = Arc::new(RecordingSink::default());
        let router = EventRouter::bookings(sink.clone());
        let payload = Payload::Json(json!({"data": {"title": "x"}}));
        assert_eq!(router.route("booking.cancelled", &payload).unwrap(), Routed::Unrouted);
        assert_eq!(router.route("BOOKING.CREATED", &payload).unwrap(), Routed::Unrouted);
        assert!(sink.lines.lock().unwrap().is_empty());
    }

    #[test]
    fn missing_fields_use_placeholder() {
        let no_data = Payload::Json(json!({"event": "booking.deleted"}));
        assert_eq!(
            notification_line(BookingChannel::Deleted, &no_data),
            "🗑️ Booking deleted: Unknown"
        );
        let raw = Payload::Text("not json".into());
        assert_eq!(
            notification_line(BookingChannel::Updated, &raw),
            "📝 Booking updated: Unknown"
        );
        let null_title = Payload::Json(json!({"data": {"title": null}}));
        assert_eq!(
            notification_line(BookingChannel::Reminder, &null_title),
            "⏰ Booking reminder: Unknown"
        );
    }

    #[test]
    fn deleted_uses_booking_id() {
        let p = Payload::Json(json!({"data": {"bookingId": 17, "title": "ignored"}}));
        assert_eq!(notification_line(BookingChannel::Deleted, &p), "🗑️ Booking deleted: 17");
    }

    #[test]
    fn handler_error_is_returned() {
        let router = EventRouter::new().with_route("booking.created", |_p: &Payload| {
            Err(HandlerError::Failed {
                channel: "booking.created".into(),
                message: "boom".into(),
            })
        });
        assert!(router.route("booking.created", &Payload::Text("x".into())).is_err());
    }
}

use tracing::debug;

use crate::model::{Payload, RawBody};

/// Decodes a message body. Text is parsed as JSON and falls back to the raw
/// text on parse failure; this never fails.
pub fn decode(body: RawBody) -> Payload {
    match body {
        RawBody::Structured(v) => Payload::Json(v),
        RawBody::Text(text) => decode_text(text),
        RawBody::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(text) => decode_text(text),
            Err(err) => Payload::Bytes(err.into_bytes()),
        },
    }
}

fn decode_text(text: String) -> Payload {
    match serde_json::from_str(&text) {
        Ok(v) => Payload::Json(v),
        Err(err) => {
            debug!(target: "booking_events", error = %err, "payload is not JSON; passing raw text");
            Payload::Text(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_json_text() {
        let p = decode(RawBody::Text(
            r#"{"event":"booking.created","data":{"title":"Standup"},"timestamp":"T"}"#.into(),
        ));
        assert_eq!(
            p,
            Payload::Json(json!({"event":"booking.created","data":{"title":"Standup"},"timestamp":"T"}))
        );
    }

    #[test]
    fn malformed_text_falls_back_unchanged() {
        assert_eq!(decode(RawBody::Text("not json".into())), Payload::Text("not json".into()));
        assert_eq!(decode(RawBody::Text("{\"a\":".into())), Payload::Text("{\"a\":".into()));
        assert_eq!(decode(RawBody::Text(String::new())), Payload::Text(String::new()));
    }

    #[test]
    fn json_scalars_are_structured() {
        assert_eq!(decode(RawBody::Text("42".into())), Payload::Json(json!(42)));
    }

    #[test]
    fn structured_passes_through() {
        let v = json!({"data": {"bookingId": "b-1"}});
        assert_eq!(decode(RawBody::Structured(v.clone())), Payload::Json(v));
    }

    #[test]
    fn bytes_decode_as_text_when_utf8() {
        assert_eq!(decode(RawBody::Bytes(b"[1]".to_vec())), Payload::Json(json!([1])));
        assert_eq!(decode(RawBody::Bytes(b"plain".to_vec())), Payload::Text("plain".into()));
        assert_eq!(decode(RawBody::Bytes(vec![0xc3, 0x28])), Payload::Bytes(vec![0xc3, 0x28]));
    }
}

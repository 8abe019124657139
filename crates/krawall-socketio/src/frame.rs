//! Engine.IO/Socket.IO wire framing (spec.md §4.11, component C11).
//!
//! Pure encode/decode so the framing logic is testable without a socket.
//! Only the subset a chatbot widget actually uses is implemented: the
//! Engine.IO heartbeat (ping/pong) and the Socket.IO event/ack packets
//! carrying JSON payloads.

use serde_json::Value;

/// One Engine.IO packet. `Message` carries an embedded Socket.IO packet
/// as its still-encoded payload — decoded separately by
/// [`decode_socket_io`] since not every Engine.IO transport speaks
/// Socket.IO on top.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineIoPacket {
    Open(Value),
    Close,
    Ping,
    Pong,
    Message(String),
    Upgrade,
    Noop,
}

/// A decoded Socket.IO packet (spec.md §4.11).
#[derive(Debug, Clone, PartialEq)]
pub enum SocketIoPacket {
    Connect,
    Disconnect,
    /// `[eventName, payload]` split into its two logical parts, matching
    /// the `{eventName, data}` shape every caller needs rather than the
    /// raw wire array.
    Event {
        ack_id: Option<u64>,
        event: String,
        data: Value,
    },
    Ack { ack_id: u64, data: Value },
    Error(Value),
}

/// Decodes one Engine.IO frame. Returns `None` for an empty frame.
pub fn decode_engine_io(text: &str) -> Option<EngineIoPacket> {
    let mut chars = text.chars();
    let packet_type = chars.next()?;
    let rest = chars.as_str();

    Some(match packet_type {
        '0' => EngineIoPacket::Open(serde_json::from_str(rest).unwrap_or(Value::Null)),
        '1' => EngineIoPacket::Close,
        '2' => EngineIoPacket::Ping,
        '3' => EngineIoPacket::Pong,
        '4' => EngineIoPacket::Message(rest.to_string()),
        '5' => EngineIoPacket::Upgrade,
        '6' => EngineIoPacket::Noop,
        _ => return None,
    })
}

/// Decodes the Socket.IO packet embedded in an `EngineIoPacket::Message`
/// payload. Namespace prefixes (`/chat,...`) are skipped — every target in
/// scope here talks to a single default namespace.
pub fn decode_socket_io(payload: &str) -> Option<SocketIoPacket> {
    let mut chars = payload.chars();
    let packet_type = chars.next()?;
    let mut rest = chars.as_str();

    if rest.starts_with('/') {
        rest = rest.splitn(2, ',').nth(1).unwrap_or("");
    }

    match packet_type {
        '0' => Some(SocketIoPacket::Connect),
        '1' => Some(SocketIoPacket::Disconnect),
        '2' => {
            let (ack_id, data) = split_ack_id(rest);
            let array: Value = serde_json::from_str(data).unwrap_or(Value::Null);
            let (event, data) = split_event_array(array);
            Some(SocketIoPacket::Event { ack_id, event, data })
        }
        '3' => {
            let (ack_id, data) = split_ack_id(rest);
            Some(SocketIoPacket::Ack {
                ack_id: ack_id?,
                data: serde_json::from_str(data).unwrap_or(Value::Null),
            })
        }
        '4' => Some(SocketIoPacket::Error(
            serde_json::from_str(rest).unwrap_or(Value::Null),
        )),
        _ => None,
    }
}

/// Splits a decoded `[eventName, ...args]` array into the event name and
/// the remaining payload: a single trailing arg unwraps to its own value,
/// several collapse back into an array, and none becomes `Null`.
fn split_event_array(array: Value) -> (String, Value) {
    let Value::Array(mut items) = array else {
        return (String::new(), Value::Null);
    };
    if items.is_empty() {
        return (String::new(), Value::Null);
    }
    let event = match items.remove(0) {
        Value::String(s) => s,
        other => other.to_string(),
    };
    let data = match items.len() {
        0 => Value::Null,
        1 => items.into_iter().next().unwrap(),
        _ => Value::Array(items),
    };
    (event, data)
}

fn split_ack_id(rest: &str) -> (Option<u64>, &str) {
    let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    if digits_end == 0 {
        (None, rest)
    } else {
        let ack_id = rest[..digits_end].parse().ok();
        (ack_id, &rest[digits_end..])
    }
}

/// Encodes an outgoing Socket.IO event frame, wrapped in the Engine.IO
/// `4` (message) packet type (spec.md §4.11 send path): `"42" +
/// JSON.stringify([eventName, payload])`. No ack id is attached — the
/// reply is correlated by registering a one-shot listener for the next
/// incoming event frame rather than by ack id.
pub fn encode_event(event: &str, data: &Value) -> String {
    let array = serde_json::json!([event, data]);
    format!("42{array}")
}

/// Encodes a bare Engine.IO pong frame.
pub fn encode_pong() -> String {
    "3".to_string()
}

/// Encodes the Socket.IO connect packet for the default namespace.
pub fn encode_connect() -> String {
    "40".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_open_frame_with_handshake_payload() {
        let packet = decode_engine_io(r#"0{"sid":"abc","pingInterval":25000,"pingTimeout":5000}"#);
        match packet {
            Some(EngineIoPacket::Open(value)) => assert_eq!(value["sid"], "abc"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn decodes_ping_and_pong() {
        assert_eq!(decode_engine_io("2"), Some(EngineIoPacket::Ping));
        assert_eq!(decode_engine_io("3"), Some(EngineIoPacket::Pong));
    }

    #[test]
    fn decodes_ack_with_id_and_payload() {
        let packet = decode_socket_io("312[\"ok\"]");
        match packet {
            Some(SocketIoPacket::Ack { ack_id, data }) => {
                assert_eq!(ack_id, 12);
                assert_eq!(data, serde_json::json!(["ok"]));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn decodes_event_without_ack_id() {
        let packet = decode_socket_io("2[\"message\",{\"text\":\"hi\"}]");
        match packet {
            Some(SocketIoPacket::Event { ack_id, event, data }) => {
                assert_eq!(ack_id, None);
                assert_eq!(event, "message");
                assert_eq!(data, serde_json::json!({"text": "hi"}));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn decodes_event_with_no_payload_args() {
        let packet = decode_socket_io("2[\"ping\"]");
        match packet {
            Some(SocketIoPacket::Event { event, data, .. }) => {
                assert_eq!(event, "ping");
                assert_eq!(data, Value::Null);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn encode_event_round_trips_through_decode() {
        let frame = encode_event("message", &serde_json::json!({"text": "hi"}));
        let EngineIoPacket::Message(payload) = decode_engine_io(&frame).unwrap() else {
            panic!("expected a message packet");
        };
        match decode_socket_io(&payload) {
            Some(SocketIoPacket::Event { ack_id, event, data }) => {
                assert_eq!(ack_id, None);
                assert_eq!(event, "message");
                assert_eq!(data, serde_json::json!({"text": "hi"}));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}

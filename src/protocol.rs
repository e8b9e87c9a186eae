use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};

use serde_derive::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::host::Host;

/// Errors raised while validating, decoding, or exchanging wire messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A constructor argument failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A payload was structurally malformed.
    #[error("malformed message: {0}")]
    Malformed(String),
    /// The transport failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A wire message: a JSON object tagged by `type`, carrying the envelope
/// `source-address`/`source-port` that identifies the originator of the
/// message (not necessarily the owner of any key it mentions).
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "PING")]
    Ping {
        #[serde(rename = "source-address")]
        source_address: String,
        #[serde(rename = "source-port")]
        source_port: u16,
    },
    #[serde(rename = "PONG")]
    Pong {
        #[serde(rename = "source-address")]
        source_address: String,
        #[serde(rename = "source-port")]
        source_port: u16,
    },
    #[serde(rename = "FINDNODE")]
    FindNode {
        #[serde(rename = "source-address")]
        source_address: String,
        #[serde(rename = "source-port")]
        source_port: u16,
        #[serde(rename = "target-uid")]
        target_uid: String,
    },
    #[serde(rename = "FINDVALUE")]
    FindValue {
        #[serde(rename = "source-address")]
        source_address: String,
        #[serde(rename = "source-port")]
        source_port: u16,
        #[serde(rename = "target-uid")]
        target_uid: String,
    },
    #[serde(rename = "STORE")]
    Store {
        #[serde(rename = "source-address")]
        source_address: String,
        #[serde(rename = "source-port")]
        source_port: u16,
        key: String,
        value: String,
    },
    #[serde(rename = "NODELIST")]
    NodeList {
        #[serde(rename = "source-address")]
        source_address: String,
        #[serde(rename = "source-port")]
        source_port: u16,
        hosts: Vec<Host>,
    },
    #[serde(rename = "VALUE")]
    Value {
        #[serde(rename = "source-address")]
        source_address: String,
        #[serde(rename = "source-port")]
        source_port: u16,
        key: String,
        value: String,
    },
}

impl Message {
    /// The originator recorded in the message envelope.
    pub fn source(&self) -> (&str, u16) {
        match self {
            Message::Ping {
                source_address,
                source_port,
            }
            | Message::Pong {
                source_address,
                source_port,
            }
            | Message::FindNode {
                source_address,
                source_port,
                ..
            }
            | Message::FindValue {
                source_address,
                source_port,
                ..
            }
            | Message::Store {
                source_address,
                source_port,
                ..
            }
            | Message::NodeList {
                source_address,
                source_port,
                ..
            }
            | Message::Value {
                source_address,
                source_port,
                ..
            } => (source_address.as_str(), *source_port),
        }
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("message serialization cannot fail")
    }

    /// Decodes a message, validating that the object carries exactly the
    /// fields its type calls for. Anything else is rejected as malformed.
    pub fn decode(payload: &str) -> Result<Message, ProtocolError> {
        let value: Value = serde_json::from_str(payload)
            .map_err(|err| ProtocolError::Malformed(format!("invalid JSON: {}", err)))?;
        let obj = value
            .as_object()
            .ok_or_else(|| ProtocolError::Malformed("payload is not a JSON object".to_string()))?;
        let kind = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::Malformed("missing \"type\" field".to_string()))?;

        match kind {
            "PING" | "PONG" => {
                check_fields(obj, &["type", "source-address", "source-port"])?;
                let source_address = string_field(obj, "source-address")?;
                let source_port = port_field(obj, "source-port")?;
                if kind == "PING" {
                    Ok(Message::Ping {
                        source_address,
                        source_port,
                    })
                } else {
                    Ok(Message::Pong {
                        source_address,
                        source_port,
                    })
                }
            }
            "FINDNODE" | "FINDVALUE" => {
                check_fields(obj, &["type", "source-address", "source-port", "target-uid"])?;
                let source_address = string_field(obj, "source-address")?;
                let source_port = port_field(obj, "source-port")?;
                let target_uid = string_field(obj, "target-uid")?;
                if kind == "FINDNODE" {
                    Ok(Message::FindNode {
                        source_address,
                        source_port,
                        target_uid,
                    })
                } else {
                    Ok(Message::FindValue {
                        source_address,
                        source_port,
                        target_uid,
                    })
                }
            }
            "STORE" | "VALUE" => {
                check_fields(obj, &["type", "source-address", "source-port", "key", "value"])?;
                let source_address = string_field(obj, "source-address")?;
                let source_port = port_field(obj, "source-port")?;
                let key = string_field(obj, "key")?;
                let value = string_field(obj, "value")?;
                if kind == "STORE" {
                    Ok(Message::Store {
                        source_address,
                        source_port,
                        key,
                        value,
                    })
                } else {
                    Ok(Message::Value {
                        source_address,
                        source_port,
                        key,
                        value,
                    })
                }
            }
            "NODELIST" => {
                check_fields(obj, &["type", "source-address", "source-port", "hosts"])?;
                let source_address = string_field(obj, "source-address")?;
                let source_port = port_field(obj, "source-port")?;
                let entries = obj.get("hosts").and_then(Value::as_array).ok_or_else(|| {
                    ProtocolError::Malformed("field \"hosts\" is not an array".to_string())
                })?;
                let mut hosts = Vec::with_capacity(entries.len());
                for entry in entries {
                    hosts.push(host_entry(entry)?);
                }
                Ok(Message::NodeList {
                    source_address,
                    source_port,
                    hosts,
                })
            }
            other => Err(ProtocolError::Malformed(format!(
                "unknown message type {:?}",
                other
            ))),
        }
    }
}

/// Requires `obj` to hold exactly the `expected` fields.
pub(crate) fn check_fields(
    obj: &Map<String, Value>,
    expected: &[&str],
) -> Result<(), ProtocolError> {
    for field in expected {
        if !obj.contains_key(*field) {
            return Err(ProtocolError::Malformed(format!(
                "missing field {:?}",
                field
            )));
        }
    }
    if obj.len() != expected.len() {
        return Err(ProtocolError::Malformed(
            "unexpected extra fields".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn string_field(obj: &Map<String, Value>, name: &str) -> Result<String, ProtocolError> {
    match obj.get(name).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        Some(_) => Err(ProtocolError::Malformed(format!(
            "field {:?} is empty",
            name
        ))),
        None => Err(ProtocolError::Malformed(format!(
            "field {:?} is not a string",
            name
        ))),
    }
}

fn port_field(obj: &Map<String, Value>, name: &str) -> Result<u16, ProtocolError> {
    let port = obj.get(name).and_then(Value::as_u64).ok_or_else(|| {
        ProtocolError::Malformed(format!("field {:?} is not a port number", name))
    })?;
    if port > u64::from(u16::MAX) {
        return Err(ProtocolError::Malformed(format!(
            "field {:?} is out of range",
            name
        )));
    }
    Ok(port as u16)
}

fn host_entry(value: &Value) -> Result<Host, ProtocolError> {
    let obj = value
        .as_object()
        .ok_or_else(|| ProtocolError::Malformed("host entry is not an object".to_string()))?;
    check_fields(obj, &["addr", "port", "uid"])?;
    Host::new(
        &string_field(obj, "addr")?,
        port_field(obj, "port")?,
        &string_field(obj, "uid")?,
    )
}

/// Writes one framed message: the serialized object, a trailing newline, and
/// a flush. The caller decides whether to half-close or drop the stream.
pub fn write_message(stream: &mut TcpStream, message: &Message) -> Result<(), ProtocolError> {
    stream.write_all(message.encode().as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}

/// Reads the peer's whole frame: everything until end-of-stream, trimmed.
pub fn read_frame(stream: &mut TcpStream) -> Result<String, ProtocolError> {
    let mut buffer = Vec::new();
    stream.read_to_end(&mut buffer)?;
    let payload = String::from_utf8(buffer)
        .map_err(|_| ProtocolError::Malformed("frame is not valid UTF-8".to_string()))?;
    Ok(payload.trim().to_string())
}

/// One request/response exchange: write the request, half-close the send
/// side so the peer sees end-of-stream, then read and decode the reply.
pub fn exchange(stream: &mut TcpStream, request: &Message) -> Result<Message, ProtocolError> {
    write_message(stream, request)?;
    stream.shutdown(Shutdown::Write)?;
    let payload = read_frame(stream)?;
    if payload.is_empty() {
        return Err(ProtocolError::Malformed("empty response".to_string()));
    }
    Message::decode(&payload)
}

#[cfg(test)]
mod tests {
    use super::Message;
    use crate::host::Host;
    use crate::key::Key;

    fn round_trip(message: Message) {
        let decoded = Message::decode(&message.encode()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_round_trip_ping_pong() {
        round_trip(Message::Ping {
            source_address: "127.0.0.1".to_string(),
            source_port: 5000,
        });
        round_trip(Message::Pong {
            source_address: "127.0.0.1".to_string(),
            source_port: 5000,
        });
    }

    #[test]
    fn test_round_trip_find_messages() {
        let target_uid = Key::for_content("needle").to_base64();
        round_trip(Message::FindNode {
            source_address: "127.0.0.1".to_string(),
            source_port: 5000,
            target_uid: target_uid.clone(),
        });
        round_trip(Message::FindValue {
            source_address: "127.0.0.1".to_string(),
            source_port: 5000,
            target_uid,
        });
    }

    #[test]
    fn test_round_trip_store_and_value() {
        let key = Key::for_content("needle").to_base64();
        round_trip(Message::Store {
            source_address: "127.0.0.1".to_string(),
            source_port: 5000,
            key: key.clone(),
            value: "haystack".to_string(),
        });
        round_trip(Message::Value {
            source_address: "127.0.0.1".to_string(),
            source_port: 5000,
            key,
            value: "haystack".to_string(),
        });
    }

    #[test]
    fn test_round_trip_node_list() {
        let hosts = (0..3)
            .map(|i| {
                let uid = Key::for_node("127.0.0.1", 6000 + i).to_base64();
                Host::new("127.0.0.1", 6000 + i, &uid).unwrap()
            })
            .collect();
        round_trip(Message::NodeList {
            source_address: "127.0.0.1".to_string(),
            source_port: 5000,
            hosts,
        });
        round_trip(Message::NodeList {
            source_address: "127.0.0.1".to_string(),
            source_port: 5000,
            hosts: Vec::new(),
        });
    }

    #[test]
    fn test_rejects_unknown_type() {
        // NODE was never a wire type; the accepted set is uniform
        let payload = r#"{"type":"NODE","source-address":"127.0.0.1","source-port":5000,"hosts":[]}"#;
        assert!(Message::decode(payload).is_err());
        let payload = r#"{"type":"STOREALL","source-address":"127.0.0.1","source-port":5000}"#;
        assert!(Message::decode(payload).is_err());
    }

    #[test]
    fn test_rejects_extra_fields() {
        let payload =
            r#"{"type":"PING","source-address":"127.0.0.1","source-port":5000,"extra":1}"#;
        assert!(Message::decode(payload).is_err());
    }

    #[test]
    fn test_rejects_missing_fields() {
        let payload = r#"{"type":"STORE","source-address":"127.0.0.1","source-port":5000,"key":"abc"}"#;
        assert!(Message::decode(payload).is_err());
        let payload = r#"{"source-address":"127.0.0.1","source-port":5000}"#;
        assert!(Message::decode(payload).is_err());
    }

    #[test]
    fn test_rejects_null_value() {
        let payload = r#"{"type":"VALUE","source-address":"127.0.0.1","source-port":5000,"key":"abc","value":null}"#;
        assert!(Message::decode(payload).is_err());
    }

    #[test]
    fn test_rejects_non_object_payloads() {
        assert!(Message::decode("[1, 2, 3]").is_err());
        assert!(Message::decode("not json at all").is_err());
    }

    #[test]
    fn test_node_list_coerces_host_uids() {
        let payload = r#"{"type":"NODELIST","source-address":"127.0.0.1","source-port":5000,"hosts":[{"addr":"10.0.0.1","port":7000,"uid":"plainly not base64!"}]}"#;
        match Message::decode(payload).unwrap() {
            Message::NodeList { hosts, .. } => {
                assert_eq!(hosts.len(), 1);
                assert_ne!(hosts[0].uid, "plainly not base64!");
            }
            other => panic!("expected NODELIST, got {:?}", other),
        }
    }
}

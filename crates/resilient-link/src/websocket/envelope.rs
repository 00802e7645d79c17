//! The `{ "type": ..., "payload": ... }` wire envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PING: &str = "ping";
pub const PONG: &str = "pong";

/// A message on the persistent channel.
///
/// `kind` is the topic subscribers register for. The set of topics is open:
/// applications define their own.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    pub fn ping() -> Self {
        Self::new(PING, Value::Null)
    }

    pub fn pong() -> Self {
        Self::new(PONG, Value::Null)
    }

    /// Build an envelope from any serializable payload.
    pub fn with_payload<T: Serialize>(
        kind: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(kind, serde_json::to_value(payload)?))
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn is_ping(&self) -> bool {
        self.kind == PING
    }

    pub fn is_pong(&self) -> bool {
        self.kind == PONG
    }

    /// Deserialize the payload into a typed value.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_ping_wire_format() {
        assert_eq!(Envelope::ping().to_text().unwrap(), r#"{"type":"ping"}"#);
    }

    #[test]
    fn test_parse_missing_payload() {
        let env = Envelope::parse(r#"{"type":"pong"}"#).unwrap();
        assert!(env.is_pong());
        assert_eq!(env.payload, Value::Null);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Envelope::parse("not json").is_err());
        assert!(Envelope::parse(r#"{"payload":1}"#).is_err());
        assert!(Envelope::parse("[1,2]").is_err());
    }

    #[test]
    fn test_typed_payload() {
        #[derive(Deserialize)]
        struct Update {
            id: u32,
        }
        let env = Envelope::new("agent_update", json!({"id": 7}));
        let update: Update = env.payload_as().unwrap();
        assert_eq!(update.id, 7);
    }
}

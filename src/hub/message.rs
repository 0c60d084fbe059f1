use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Envelope for every message pushed to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl OutboundEnvelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Build an envelope from any serializable payload
    pub fn from_payload<T: Serialize>(
        kind: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(kind, serde_json::to_value(payload)?))
    }
}

/// Message received from a client; only `type` is required
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: String,

    /// All other fields
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_envelope_shape() {
        let envelope = OutboundEnvelope::new("notification", json!({"id": 1}));
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["type"], "notification");
        assert_eq!(value["data"]["id"], 1);
        let timestamp = value["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[test]
    fn test_inbound_requires_type() {
        assert!(serde_json::from_str::<InboundMessage>(r#"{"data": 1}"#).is_err());

        let message: InboundMessage =
            serde_json::from_str(r#"{"type": "subscribe", "channel": "surveys"}"#).unwrap();
        assert_eq!(message.kind, "subscribe");
        assert_eq!(message.payload["channel"], "surveys");
    }
}

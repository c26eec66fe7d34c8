//! Wire frames for the timing hub's classic SignalR protocol.
//!
//! The handshake is a plain HTTPS negotiate that yields a connection token,
//! followed by a websocket upgrade. All frames are JSON. The server
//! envelope multiplexes keepalives (empty object), hub invocation results
//! (`R`/`I`) and batched hub messages (`M`); topic updates arrive as a
//! `feed` method call with `[topic, payload, timestamp]` arguments.

use super::topic::Topic;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The hub every subscription goes through.
pub const HUB_NAME: &str = "Streaming";

/// Client protocol version sent during negotiate.
pub const CLIENT_PROTOCOL: &str = "1.5";

/// Response to the negotiate request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NegotiateResponse {
    pub connection_token: String,
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub keep_alive_timeout: Option<f64>,
}

/// An outgoing hub method invocation.
#[derive(Debug, Clone, Serialize)]
pub struct HubCall {
    #[serde(rename = "H")]
    pub hub: &'static str,
    #[serde(rename = "M")]
    pub method: &'static str,
    #[serde(rename = "A")]
    pub args: Vec<Value>,
    #[serde(rename = "I")]
    pub invocation_id: u64,
}

impl HubCall {
    /// The subscribe call for the full topic list.
    pub fn subscribe(invocation_id: u64) -> Self {
        HubCall {
            hub: HUB_NAME,
            method: "Subscribe",
            args: vec![Value::from(Topic::subscription_list())],
            invocation_id,
        }
    }
}

/// A server-to-client envelope. Every field is optional; an empty envelope
/// is a keepalive.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Envelope {
    #[serde(rename = "C", default)]
    pub cursor: Option<String>,
    #[serde(rename = "M", default)]
    pub messages: Vec<HubMessage>,
    #[serde(rename = "R", default)]
    pub result: Option<Value>,
    #[serde(rename = "I", default)]
    pub invocation_id: Option<Value>,
    #[serde(rename = "E", default)]
    pub error: Option<String>,
    #[serde(rename = "S", default)]
    pub initialized: Option<i64>,
}

/// One hub message inside an envelope's `M` batch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HubMessage {
    #[serde(rename = "H", default)]
    pub hub: Option<String>,
    #[serde(rename = "M", default)]
    pub method: Option<String>,
    #[serde(rename = "A", default)]
    pub args: Vec<Value>,
}

impl HubMessage {
    /// Interpret this message as a topic update, if it is one.
    pub fn feed_update(&self) -> Option<(Topic, Value)> {
        if !self.method.as_deref().is_some_and(|m| m.eq_ignore_ascii_case("feed")) {
            return None;
        }
        let topic = Topic::from_name(self.args.first()?.as_str()?)?;
        let payload = self.args.get(1)?.clone();
        Some((topic, payload))
    }
}

/// Fan a subscribe result (the initial full snapshot) out into one
/// `(topic, payload)` pair per known topic key.
pub fn snapshot_topics(result: &Value) -> Vec<(Topic, Value)> {
    let Some(object) = result.as_object() else {
        return Vec::new();
    };
    object
        .iter()
        .filter(|(_, payload)| !payload.is_null())
        .filter_map(|(name, payload)| Topic::from_name(name).map(|t| (t, payload.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subscribe_call_serializes_hub_frame() {
        let call = HubCall::subscribe(1);
        let value = serde_json::to_value(&call).unwrap();
        assert_eq!(value["H"], "Streaming");
        assert_eq!(value["M"], "Subscribe");
        assert_eq!(value["I"], 1);
        assert!(value["A"][0].as_array().unwrap().len() >= 10);
    }

    #[test]
    fn keepalive_envelope_parses() {
        let envelope: Envelope = serde_json::from_str("{}").unwrap();
        assert!(envelope.messages.is_empty());
        assert!(envelope.result.is_none());
    }

    #[test]
    fn feed_message_yields_topic_and_payload() {
        let envelope: Envelope = serde_json::from_value(json!({
            "C": "d-1",
            "M": [{
                "H": "Streaming",
                "M": "feed",
                "A": ["TimingData", {"Lines": {"44": {"Position": "1"}}}, "2026-03-08T14:03:11Z"]
            }]
        }))
        .unwrap();

        let (topic, payload) = envelope.messages[0].feed_update().unwrap();
        assert_eq!(topic, Topic::TimingData);
        assert_eq!(payload["Lines"]["44"]["Position"], "1");
    }

    #[test]
    fn non_feed_methods_are_ignored() {
        let msg: HubMessage =
            serde_json::from_value(json!({"H": "Streaming", "M": "other", "A": []})).unwrap();
        assert!(msg.feed_update().is_none());
    }

    #[test]
    fn snapshot_fans_out_per_topic() {
        let result = json!({
            "TimingData": {"Lines": {}},
            "TrackStatus": {"Status": "1"},
            "Unknown": {"X": 1},
            "LapCount": null
        });
        let topics = snapshot_topics(&result);
        assert_eq!(topics.len(), 2);
        assert!(topics.iter().any(|(t, _)| *t == Topic::TimingData));
        assert!(topics.iter().any(|(t, _)| *t == Topic::TrackStatus));
    }
}

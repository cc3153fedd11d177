//! Handler payload construction.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::handler::HandlerType;

/// Reserved data key under which a forwarded parent response is merged.
pub const RESPONSE_KEY: &str = "_response";

/// Envelope metadata attached to every handler dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// The flow name of the orchestrator producing this dispatch.
    pub producer: String,
    /// Topic a transport layer would reply on: `"trans:" + producer`.
    pub reply_to_topic: String,
    /// Stable identifier for this dispatch:
    /// `"<transaction key>:<action>:<invoke|compensate>"`.
    pub idempotency_key: String,
    /// The step being dispatched.
    pub action: String,
    /// `"invoke"` or `"compensate"`.
    pub action_type: String,
    /// 1-based attempt number, incremented on every retry.
    pub attempt: u32,
    /// Epoch milliseconds at dispatch.
    pub timestamp: i64,
}

/// What a handler receives on every dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    /// Dispatch metadata.
    pub metadata: Metadata,
    /// The step's data: the transaction's initial payload, augmented with
    /// [`RESPONSE_KEY`] when the parent forwarded its response.
    pub data: Value,
}

impl Payload {
    pub(crate) fn build(
        flow_name: &str,
        idempotency_key: &str,
        action: &str,
        handler_type: HandlerType,
        attempt: u32,
        data: Value,
    ) -> Self {
        Self {
            metadata: Metadata {
                producer: flow_name.to_string(),
                reply_to_topic: format!("trans:{flow_name}"),
                idempotency_key: sub_key(idempotency_key, action, handler_type),
                action: action.to_string(),
                action_type: handler_type.as_str().to_string(),
                attempt,
                timestamp: Utc::now().timestamp_millis(),
            },
            data,
        }
    }
}

/// Deterministic sub-key identifying one handler dispatch in an external
/// durable log: `"<idempotency key>:<action>:<invoke|compensate>"`.
pub fn sub_key(idempotency_key: &str, action: &str, handler_type: HandlerType) -> String {
    format!("{idempotency_key}:{action}:{}", handler_type.as_str())
}

/// Merges a forwarded parent response into the initial payload.
///
/// Initial fields remain present; the response lands under [`RESPONSE_KEY`].
/// A non-object initial payload contributes no fields of its own.
pub(crate) fn merge_response(initial: &Value, response: &Value) -> Value {
    let mut data = match initial {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    data.insert(RESPONSE_KEY.to_string(), response.clone());
    Value::Object(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sub_key_format() {
        assert_eq!(
            sub_key("txn-1", "charge", HandlerType::Invoke),
            "txn-1:charge:invoke"
        );
        assert_eq!(
            sub_key("txn-1", "charge", HandlerType::Compensate),
            "txn-1:charge:compensate"
        );
    }

    #[test]
    fn test_payload_metadata_fields() {
        let payload = Payload::build(
            "checkout",
            "txn-9",
            "reserve",
            HandlerType::Invoke,
            1,
            json!({"sku": "A-1"}),
        );

        assert_eq!(payload.metadata.producer, "checkout");
        assert_eq!(payload.metadata.reply_to_topic, "trans:checkout");
        assert_eq!(payload.metadata.idempotency_key, "txn-9:reserve:invoke");
        assert_eq!(payload.metadata.action, "reserve");
        assert_eq!(payload.metadata.action_type, "invoke");
        assert_eq!(payload.metadata.attempt, 1);
        assert!(payload.metadata.timestamp > 0);
        assert_eq!(payload.data, json!({"sku": "A-1"}));
    }

    #[test]
    fn test_merge_keeps_initial_fields() {
        let merged = merge_response(&json!({"prop": 123}), &json!({"abc": 1234}));
        assert_eq!(merged, json!({"prop": 123, "_response": {"abc": 1234}}));
    }

    #[test]
    fn test_merge_non_object_initial() {
        let merged = merge_response(&json!("plain"), &json!({"abc": 1}));
        assert_eq!(merged, json!({"_response": {"abc": 1}}));
    }

    #[test]
    fn test_payload_serialization_roundtrip() {
        let payload = Payload::build(
            "checkout",
            "txn-9",
            "reserve",
            HandlerType::Compensate,
            2,
            json!({"sku": "A-1"}),
        );

        let json = serde_json::to_string(&payload).unwrap();
        let back: Payload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.metadata.action_type, "compensate");
        assert_eq!(back.metadata.attempt, 2);
        assert_eq!(back.data, payload.data);
    }
}

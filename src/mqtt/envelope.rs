//! Wire format spoken by the MQTT-to-WebSocket bridge.
//!
//! Every frame is a JSON object with a `type` discriminator. Inbound tags the
//! viewer does not know about deserialize into [`InboundEnvelope::Unknown`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One MQTT message as forwarded by the bridge, before the viewer stamps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(
        default,
        deserialize_with = "whole_number::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<i64>,
    pub topic: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, deserialize_with = "whole_number::qos")]
    pub qos: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

// Bridges written in JavaScript may send `1.0` where an integer is meant.
mod whole_number {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Number;

    // Beyond 2^53 an f64 no longer holds every integer exactly.
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;

    fn integral(number: &Number) -> Option<i64> {
        number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() <= MAX_EXACT)
                .map(|f| f as i64)
        })
    }

    pub fn optional<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<Number>::deserialize(deserializer)?
            .map(|n| {
                integral(&n).ok_or_else(|| D::Error::custom(format!("{n} is not an integer")))
            })
            .transpose()
    }

    pub fn qos<'de, D>(deserializer: D) -> Result<u8, D::Error>
    where
        D: Deserializer<'de>,
    {
        let n = Number::deserialize(deserializer)?;
        integral(&n)
            .and_then(|v| u8::try_from(v).ok())
            .ok_or_else(|| D::Error::custom(format!("{n} is not a valid qos")))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEnvelope {
    /// Sent by the bridge right after it accepted the socket.
    Connection {
        #[serde(default)]
        message: Option<String>,
    },
    MqttMessage {
        #[serde(default)]
        data: Option<WireMessage>,
    },
    Pong {
        #[serde(default)]
        message: Option<String>,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEnvelope {
    Ping,
}

pub fn parse_envelope(raw: &str) -> Result<InboundEnvelope, serde_json::Error> {
    serde_json::from_str(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_mqtt_message_with_defaults() {
        let env = parse_envelope(
            r#"{"type":"mqtt_message","data":{"topic":"sensor/1","payload":{"v":5},"qos":0}}"#,
        )
        .unwrap();
        let msg = match env {
            InboundEnvelope::MqttMessage { data: Some(msg) } => msg,
            other => panic!("unexpected envelope: {other:?}"),
        };
        assert_eq!(msg.topic, "sensor/1");
        assert_eq!(msg.payload, json!({"v": 5}));
        assert_eq!(msg.qos, 0);
        assert_eq!(msg.id, None);
        assert_eq!(msg.timestamp, None);
    }

    #[test]
    fn float_encoded_integers_are_accepted() {
        let env = parse_envelope(
            r#"{"type":"mqtt_message","data":{"id":7.0,"topic":"t","payload":1,"qos":1.0}}"#,
        )
        .unwrap();
        let msg = match env {
            InboundEnvelope::MqttMessage { data: Some(msg) } => msg,
            other => panic!("unexpected envelope: {other:?}"),
        };
        assert_eq!(msg.id, Some(7));
        assert_eq!(msg.qos, 1);

        let env = parse_envelope(r#"{"type":"mqtt_message","data":{"id":null,"topic":"t"}}"#)
            .unwrap();
        assert!(matches!(
            env,
            InboundEnvelope::MqttMessage { data: Some(WireMessage { id: None, .. }) }
        ));
    }

    #[test]
    fn fractional_or_out_of_range_numbers_are_rejected() {
        for data in [
            r#"{"topic":"t","qos":1.5}"#,
            r#"{"topic":"t","qos":300}"#,
            r#"{"topic":"t","qos":-1}"#,
            r#"{"topic":"t","id":0.5}"#,
        ] {
            let raw = format!(r#"{{"type":"mqtt_message","data":{data}}}"#);
            assert!(parse_envelope(&raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn mqtt_message_without_data() {
        let env = parse_envelope(r#"{"type":"mqtt_message"}"#).unwrap();
        assert_eq!(env, InboundEnvelope::MqttMessage { data: None });
    }

    #[test]
    fn informational_envelopes_keep_their_message() {
        let env = parse_envelope(r#"{"type":"connection","message":"Connected to MQTT WebSocket"}"#)
            .unwrap();
        assert_eq!(
            env,
            InboundEnvelope::Connection {
                message: Some("Connected to MQTT WebSocket".into())
            }
        );
        let env = parse_envelope(r#"{"type":"pong","message":"pong"}"#).unwrap();
        assert!(matches!(env, InboundEnvelope::Pong { .. }));
        let env = parse_envelope(r#"{"type":"error"}"#).unwrap();
        assert_eq!(env, InboundEnvelope::Error { message: None });
    }

    #[test]
    fn unknown_tag_is_not_an_error() {
        let env = parse_envelope(r#"{"type":"subscribe_ack","topics":["a"]}"#).unwrap();
        assert_eq!(env, InboundEnvelope::Unknown);
    }

    #[test]
    fn structural_problems_are_errors() {
        assert!(parse_envelope("not json").is_err());
        assert!(parse_envelope(r#"{"message":"no tag"}"#).is_err());
        assert!(parse_envelope("[1,2,3]").is_err());
        assert!(parse_envelope(r#"{"type":"mqtt_message","data":{"payload":1}}"#).is_err());
    }

    #[test]
    fn ping_serializes_as_tagged_object() {
        let text = serde_json::to_string(&OutboundEnvelope::Ping).unwrap();
        assert_eq!(text, r#"{"type":"ping"}"#);
    }
}

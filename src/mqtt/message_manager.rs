use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;

use super::envelope::WireMessage;

/// An MQTT message as surfaced to the presentation layer.
///
/// Records are immutable once created. `sequence` is the arrival order assigned
/// by the connection manager and is strictly increasing within one manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    topic: String,
    payload: Value,
    qos: u8,
    timestamp: String,
    #[serde(skip)]
    sequence: u64,
}

impl MessageRecord {
    /// Builds a record from a bridge message. A missing or empty timestamp is
    /// replaced with the receipt time in ISO-8601 UTC.
    pub fn from_wire(wire: WireMessage, sequence: u64) -> Self {
        let timestamp = wire
            .timestamp
            .filter(|ts| !ts.is_empty())
            .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));

        MessageRecord {
            id: wire.id,
            topic: wire.topic,
            payload: wire.payload,
            qos: wire.qos,
            timestamp,
            sequence,
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn qos(&self) -> u8 {
        self.qos
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn render(&self) -> String {
        format!(
            "{}: {} (qos {})\n{}",
            self.timestamp, self.topic, self.qos, self.payload
        )
    }
}

/// Newest-first message history with a hard capacity.
///
/// Inserting into a full history evicts the oldest record before the new one
/// is stored, so the buffer never grows past `capacity`.
#[derive(Debug, Clone)]
pub struct MessageHistory {
    records: VecDeque<MessageRecord>,
    capacity: usize,
}

impl MessageHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, record: MessageRecord) {
        if self.capacity == 0 {
            return;
        }
        if self.records.len() == self.capacity {
            self.records.pop_back();
        }
        self.records.push_front(record);
    }

    pub fn to_vec(&self) -> Vec<MessageRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

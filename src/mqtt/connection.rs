//! Connection state machine.
//!
//! [`ConnectionManager`] holds everything the presentation layer can observe
//! (status, history, last message) plus the reconnect counter. It performs no
//! IO: the driver in `mqtt_handler` feeds it socket lifecycle events and raw
//! frames, and acts on the [`CloseOutcome`] it hands back.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::backoff::ReconnectPolicy;
use super::envelope::{parse_envelope, InboundEnvelope};
use super::message_manager::{MessageHistory, MessageRecord};
use crate::error::LinkFault;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        };
        f.write_str(label)
    }
}

/// What the driver must do after a socket close.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Arm the reconnect timer for `delay`.
    Reconnect { attempt: u32, delay: Duration },
    /// Retry budget is spent; the manager is now halted in `Error`.
    Exhausted,
    /// The manager was already halted or torn down.
    Ignored,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FrameOutcome {
    Recorded(MessageRecord),
    Informational,
    Ignored,
    Malformed,
}

#[derive(Clone, Debug, Default)]
pub struct LinkStats {
    pub messages_received: usize,
    pub messages_sent: usize,
    pub frames_dropped: usize,
    pub connections_opened: usize,
    pub last_activity: Option<DateTime<Local>>,
}

#[derive(Debug)]
pub struct ConnectionManager {
    state: ConnectionState,
    reconnect_attempts: u32,
    policy: ReconnectPolicy,
    history: MessageHistory,
    last_message: Option<MessageRecord>,
    stats: LinkStats,
    next_sequence: u64,
    // Set on retry exhaustion, construction failure and teardown. No automatic
    // transition leaves a halted manager.
    halted: bool,
}

impl ConnectionManager {
    pub fn new(policy: ReconnectPolicy, history_capacity: usize) -> Self {
        Self {
            state: ConnectionState::Connecting,
            reconnect_attempts: 0,
            policy,
            history: MessageHistory::with_capacity(history_capacity),
            last_message: None,
            stats: LinkStats::default(),
            next_sequence: 0,
            halted: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn can_send(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn messages(&self) -> Vec<MessageRecord> {
        self.history.to_vec()
    }

    pub fn last_message(&self) -> Option<&MessageRecord> {
        self.last_message.as_ref()
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Enters `Connecting` for a new socket. Returns false if the manager is halted.
    pub fn begin_attempt(&mut self) -> bool {
        if self.halted {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    pub fn on_open(&mut self) {
        if self.halted {
            return;
        }
        info!("WebSocket connected");
        self.state = ConnectionState::Connected;
        self.reconnect_attempts = 0;
        self.stats.connections_opened += 1;
        self.stats.last_activity = Some(Local::now());
    }

    pub fn on_close(&mut self) -> CloseOutcome {
        if self.halted {
            return CloseOutcome::Ignored;
        }
        info!("WebSocket disconnected");
        self.state = ConnectionState::Disconnected;

        if self.policy.allows(self.reconnect_attempts) {
            self.reconnect_attempts += 1;
            let delay = self.policy.delay_for(self.reconnect_attempts);
            CloseOutcome::Reconnect {
                attempt: self.reconnect_attempts,
                delay,
            }
        } else {
            let fault = LinkFault::RetriesExhausted(self.policy.max_attempts);
            error!(error = %fault, "Giving up on WebSocket");
            self.state = ConnectionState::Error;
            self.halted = true;
            CloseOutcome::Exhausted
        }
    }

    /// Transport-level error event. A close event normally follows.
    pub fn on_error(&mut self, fault: &LinkFault) {
        if self.halted {
            return;
        }
        error!(error = %fault, "WebSocket error");
        self.state = ConnectionState::Error;
    }

    /// The socket could not even be created. Nothing will retry.
    pub fn on_construction_failure(&mut self, fault: &LinkFault) {
        error!(error = %fault, "Error creating WebSocket connection");
        self.state = ConnectionState::Error;
        self.halted = true;
    }

    /// Classifies one raw inbound frame. Frames arriving while not connected
    /// are dropped without touching any state.
    pub fn handle_frame(&mut self, raw: &str) -> FrameOutcome {
        if self.state != ConnectionState::Connected {
            debug!(state = %self.state, "Dropping frame received while not connected");
            return FrameOutcome::Ignored;
        }

        let envelope = match parse_envelope(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.report_malformed(&LinkFault::MalformedEnvelope(e));
                return FrameOutcome::Malformed;
            }
        };
        self.stats.last_activity = Some(Local::now());

        match envelope {
            InboundEnvelope::MqttMessage { data: Some(wire) } => {
                let record = MessageRecord::from_wire(wire, self.next_sequence);
                self.next_sequence += 1;
                self.stats.messages_received += 1;
                debug!(topic = record.topic(), qos = record.qos(), "MQTT message received");
                self.history.push(record.clone());
                self.last_message = Some(record.clone());
                FrameOutcome::Recorded(record)
            }
            InboundEnvelope::MqttMessage { data: None } => {
                debug!("mqtt_message envelope without data");
                FrameOutcome::Ignored
            }
            InboundEnvelope::Connection { message } => {
                info!(
                    detail = message.as_deref().unwrap_or(""),
                    "WebSocket connection established"
                );
                FrameOutcome::Informational
            }
            InboundEnvelope::Pong { .. } => {
                debug!("Received pong");
                FrameOutcome::Informational
            }
            InboundEnvelope::Error { message } => {
                warn!(
                    detail = message.as_deref().unwrap_or(""),
                    "Bridge reported an error"
                );
                FrameOutcome::Informational
            }
            InboundEnvelope::Unknown => {
                debug!("Ignoring envelope with unknown type");
                FrameOutcome::Ignored
            }
        }
    }

    pub fn report_malformed(&mut self, fault: &LinkFault) {
        warn!(error = %fault, "Error parsing WebSocket message");
        self.stats.frames_dropped += 1;
    }

    pub fn note_sent(&mut self) {
        self.stats.messages_sent += 1;
        self.stats.last_activity = Some(Local::now());
    }

    pub fn clear_messages(&mut self) {
        self.history.clear();
        self.last_message = None;
    }

    /// Teardown. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        self.halted = true;
        if self.state != ConnectionState::Error {
            self.state = ConnectionState::Disconnected;
        }
    }
}

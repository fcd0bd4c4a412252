//! Terminal viewer for MQTT traffic forwarded over a WebSocket bridge.
//!
//! The interesting part lives in [`mqtt`]: a connection manager that keeps one
//! bridge socket alive with bounded exponential backoff, sends a keepalive
//! heartbeat and records incoming MQTT messages into a capped history.

pub mod config;
pub mod error;
pub mod mqtt;

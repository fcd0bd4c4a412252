//! # MQTT Bridge Client
//!
//! Client side of the MQTT-to-WebSocket bridge. The bridge forwards broker
//! traffic as JSON envelopes over a single WebSocket; this module keeps that
//! socket alive and turns the envelopes into a bounded, newest-first message
//! history for display.
//!
//! ```text
//! mqtt/
//! ├── backoff.rs          - Reconnect delay policy
//! ├── config.rs           - Link settings and defaults
//! ├── connection.rs       - Connection state machine (no IO)
//! ├── envelope.rs         - Wire format of bridge frames
//! ├── message_manager.rs  - Message records and the capped history
//! └── mqtt_handler.rs     - Tokio driver and the presentation-facing handle
//! ```
//!
//! Consumers only ever see a [`ConnectionState`], the message history and the
//! last message. Transport errors and malformed frames are logged and never
//! surface as errors.

pub mod backoff;
pub mod config;
pub mod connection;
pub mod envelope;
pub mod message_manager;
pub mod mqtt_handler;

pub use backoff::ReconnectPolicy;
pub use config::LinkConfig;
pub use connection::{ConnectionManager, ConnectionState, LinkStats};
pub use message_manager::MessageRecord;
pub use mqtt_handler::ViewerHandle;

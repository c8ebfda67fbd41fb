//! Decoded message events

use super::Time;

/// One decoded message as it flows from the player to consumers.
///
/// The payload is a dynamic value: the channel's decoder turns transport
/// bytes into self-describing structured data, so consumers can render any
/// topic without compile-time knowledge of its schema.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    /// Topic this message belongs to.
    pub topic: String,

    /// Receive timestamp reported by the source.
    pub receive_time: Time,

    /// Decoded payload.
    pub message: serde_json::Value,

    /// Size of the encoded payload on the wire.
    pub size_in_bytes: usize,

    /// Schema name of the originating channel.
    pub schema_name: String,
}

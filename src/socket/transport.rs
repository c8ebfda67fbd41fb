//! Transport seam for protocol-driven players.
//!
//! The socket player never touches a real socket: it consumes
//! [`TransportEvent`]s and issues commands through a [`TransportLink`]. A
//! [`Connector`] produces one such pair per connection attempt, which keeps
//! the reconnection loop independent of any concrete wire protocol and lets
//! tests drive the player with an in-memory transport.

use tokio::sync::mpsc;

use crate::types::Time;
use crate::Result;

/// Server-assigned channel identifier.
pub type ChannelId = u64;

/// Client-assigned subscription identifier.
pub type SubscriptionId = u64;

/// Well-known server capability strings.
pub mod server_capability {
    /// Server accepts client-advertised channels and published messages.
    pub const CLIENT_PUBLISH: &str = "clientPublish";

    /// Server accepts parameter updates.
    pub const PARAMETERS: &str = "parameters";
}

/// A server-advertised channel: a schema-bound source for one topic.
///
/// A channel exists only between an `Advertise` and the matching
/// `Unadvertise` event, and is 1:1 with its topic while live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub topic: String,

    /// Message encoding on the wire, e.g. `json`.
    pub encoding: String,

    pub schema_name: String,

    /// Encoding of the schema bytes, e.g. `jsonschema`.
    pub schema_encoding: String,

    /// Raw schema, interpreted by the decoder registry.
    pub schema: Vec<u8>,
}

/// Session metadata announced by the server after the transport opens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,

    /// Stable id for the server session. When it changes between
    /// connections the player adopts it as its player id, signalling an
    /// identity swap to consumers.
    pub session_id: Option<String>,

    /// Capability strings; see [`server_capability`].
    pub capabilities: Vec<String>,

    /// Message encodings the server accepts for client publications.
    pub supported_encodings: Vec<String>,
}

/// Severity of a server status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Warning,
    Error,
}

/// Inbound events from the transport, in wire order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The connection is open and usable.
    Open,

    /// Session metadata, sent once after `Open`.
    ServerInfo(ServerInfo),

    /// Free-form server diagnostic.
    Status { level: StatusLevel, message: String },

    /// Newly advertised channels.
    Advertise(Vec<ChannelInfo>),

    /// Channels withdrawn by the server.
    Unadvertise(Vec<ChannelId>),

    /// One message on a subscribed channel.
    Message { subscription_id: SubscriptionId, timestamp: Time, payload: Vec<u8> },

    /// The connection closed. The event stream ends after this.
    Close { reason: Option<String> },
}

/// Outbound command surface of one live connection.
///
/// Commands are fire-and-forget sends; failures surface later as a `Close`
/// event rather than as errors here. Subscription and channel ids are
/// client-allocated so calls return synchronously.
pub trait TransportLink: Send + Sync + 'static {
    /// Subscribe to a channel, returning the new subscription id.
    fn subscribe(&self, channel: ChannelId) -> SubscriptionId;

    /// Cancel a subscription.
    fn unsubscribe(&self, subscription: SubscriptionId);

    /// Advertise a client channel, returning its id.
    fn advertise(&self, topic: &str, encoding: &str, schema_name: &str) -> ChannelId;

    /// Withdraw a client channel.
    fn unadvertise(&self, channel: ChannelId);

    /// Publish a message on a client channel.
    fn publish(&self, channel: ChannelId, payload: Vec<u8>);

    /// Update a remote parameter.
    fn set_parameter(&self, key: &str, value: &serde_json::Value);

    /// Close the connection.
    fn close(&self);
}

/// One established connection: a command link plus its event stream.
pub struct TransportConnection {
    pub link: std::sync::Arc<dyn TransportLink>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Dials new connections for the socket player's reconnection loop.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<TransportConnection>;
}

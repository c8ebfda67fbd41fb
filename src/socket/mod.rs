//! Protocol-driven player over an abstract socket transport.

mod decode;
mod ingest;
mod player;
mod resolver;
mod transport;

pub use decode::{DecoderFactory, DecoderRegistry, MessageDecoder};
pub use player::SocketPlayer;
pub use transport::{
    server_capability, ChannelId, ChannelInfo, Connector, ServerInfo, StatusLevel,
    SubscriptionId, TransportConnection, TransportEvent, TransportLink,
};

#[cfg(test)]
mod tests;

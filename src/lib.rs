//! Event-stream player/pipeline for live and recorded robot telemetry.
//!
//! Conflux ingests time-ordered event streams from heterogeneous sources
//! and exposes them to many independent consumers under consistent time,
//! subscription, and backpressure semantics.
//!
//! # Features
//!
//! - **Player contract**: one capability surface over live sockets and
//!   recorded logs
//! - **Subscription resolution**: dynamic server channel sets resolved into
//!   transport subscriptions, with automatic re-resolution on reconnect
//! - **Discontinuity detection**: backward time jumps surface as an explicit
//!   seek counter, never as silent stale data
//! - **Cooperative backpressure**: one frame in flight, bounded frame holds
//!
//! # Quick start
//!
//! ```rust,no_run
//! use conflux::{Conflux, PipelineConfig, SocketPlayerConfig, SubscribePayload};
//! # use conflux::{Connector, Result, TransportConnection};
//! # struct MyConnector;
//! # #[async_trait::async_trait]
//! # impl Connector for MyConnector {
//! #     async fn connect(&self) -> Result<TransportConnection> { unimplemented!() }
//! # }
//!
//! #[tokio::main]
//! async fn main() {
//!     let pipeline = Conflux::open(
//!         MyConnector,
//!         SocketPlayerConfig { name: "ws://robot:8765".into(), ..Default::default() },
//!         PipelineConfig::default(),
//!     );
//!     pipeline.set_subscriptions("panel-1", vec![SubscribePayload::topic("/imu")]);
//!
//!     let mut states = pipeline.watch();
//!     while states.changed().await.is_ok() {
//!         let snapshot = states.borrow_and_update().clone();
//!         println!("{} topics advertised", snapshot.sorted_topics.len());
//!     }
//! }
//! ```

// Core types and error handling
mod config;
mod error;
pub mod problems;
pub mod types;
#[cfg(test)]
pub mod test_utils;

// Player/pipeline architecture
pub mod pipeline;
pub mod player;
pub mod socket;

// Core exports
pub use config::{PipelineConfig, SocketPlayerConfig};
pub use error::{PipelineError, Result};
pub use problems::{Problem, Severity};
pub use types::*;

// Player contract exports
pub use player::{
    AdvertiseOptions, GlobalVariables, Player, PlayerStateListener, PublishPayload,
    SubscribePayload,
};

// Pipeline exports
pub use pipeline::{ConsumerId, FrameGuard, Pipeline, PipelineMetadata, PipelineSnapshot};

// Socket player exports
pub use socket::{
    ChannelId, ChannelInfo, Connector, DecoderFactory, DecoderRegistry, MessageDecoder,
    ServerInfo, SocketPlayer, SubscriptionId, TransportConnection, TransportEvent,
    TransportLink,
};

/// Unified entry point for pipeline construction.
///
/// # Example
///
/// ```rust,no_run
/// use conflux::{Conflux, PipelineConfig, SocketPlayerConfig};
/// # use conflux::{Connector, Result, TransportConnection};
/// # struct MyConnector;
/// # #[async_trait::async_trait]
/// # impl Connector for MyConnector {
/// #     async fn connect(&self) -> Result<TransportConnection> { unimplemented!() }
/// # }
///
/// # #[tokio::main]
/// # async fn main() {
/// let pipeline = Conflux::open(
///     MyConnector,
///     SocketPlayerConfig::default(),
///     PipelineConfig::default(),
/// );
/// # }
/// ```
pub struct Conflux;

impl Conflux {
    /// Open a protocol-driven source and wrap it in a pipeline.
    ///
    /// The player starts connecting immediately and reconnects until the
    /// pipeline is closed.
    pub fn open(
        connector: impl Connector,
        player_config: SocketPlayerConfig,
        pipeline_config: PipelineConfig,
    ) -> Pipeline {
        let player = SocketPlayer::new(connector, player_config, DecoderRegistry::default());
        Pipeline::new(player, pipeline_config)
    }

    /// Like [`Conflux::open`], with a caller-supplied decoder registry for
    /// sources using encodings beyond the built-ins.
    pub fn open_with_registry(
        connector: impl Connector,
        player_config: SocketPlayerConfig,
        pipeline_config: PipelineConfig,
        registry: DecoderRegistry,
    ) -> Pipeline {
        let player = SocketPlayer::new(connector, player_config, registry);
        Pipeline::new(player, pipeline_config)
    }
}

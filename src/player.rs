//! Player trait: the capability surface every data source implements.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::types::{PlayerState, Time};
use crate::Result;

/// Externally owned key/value map forwarded to players that use it.
pub type GlobalVariables = HashMap<String, serde_json::Value>;

/// A consumer's request to receive one topic's events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribePayload {
    pub topic: String,

    /// Restrict delivery to a subset of message fields. `None` requests the
    /// whole message; when merging, a whole-message subscription dominates
    /// any field subset for the same topic.
    pub fields: Option<BTreeSet<String>>,
}

impl SubscribePayload {
    pub fn topic(topic: impl Into<String>) -> Self {
        SubscribePayload { topic: topic.into(), fields: None }
    }
}

/// A consumer's request to advertise a client-published topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseOptions {
    pub topic: String,
    pub encoding: String,
    pub schema_name: String,
}

/// A message published by a consumer through the active player.
#[derive(Debug, Clone)]
pub struct PublishPayload {
    pub topic: String,
    pub msg: serde_json::Value,
}

/// Receives state snapshots from the active player.
///
/// The player must not deliver a second state until the future returned by
/// the previous `on_state` call has resolved; this is the pipeline's
/// backpressure mechanism. Implementations are owned exclusively by the
/// player's emit task, so overlapping deliveries cannot be expressed.
#[async_trait::async_trait]
pub trait PlayerStateListener: Send + 'static {
    async fn on_state(&mut self, state: PlayerState);
}

/// Trait for playback/streaming data sources.
///
/// Players abstract over different sources (live sockets, recorded logs)
/// and own all per-source state: channels, subscriptions, the accumulating
/// frame, and per-topic statistics. The pipeline only ever talks to a
/// source through this surface.
///
/// Operations marked capability-gated fail with
/// [`PipelineError::UnsupportedCapability`](crate::PipelineError) when the
/// player's declared capability set excludes them; this is a caller error,
/// never silently ignored.
pub trait Player: Send + Sync + 'static {
    /// Install the state listener. Must be called exactly once per player
    /// instance; a second call is a programming error and panics.
    fn set_listener(&mut self, listener: Box<dyn PlayerStateListener>);

    /// Terminate any connections and stop emitting states. Idempotent.
    fn close(&self);

    /// Replace the set of subscriptions. Replacement semantics: callers
    /// pass their complete desired set each time.
    fn set_subscriptions(&self, subscriptions: Vec<SubscribePayload>);

    /// Replace the set of client publications.
    fn set_publishers(&self, publishers: Vec<AdvertiseOptions>);

    /// Modify a remote parameter. Capability-gated (`SetParameters`).
    fn set_parameter(&self, key: String, value: serde_json::Value) -> Result<()>;

    /// Publish a message on a previously advertised topic.
    /// Capability-gated (`Publish`).
    fn publish(&self, payload: PublishPayload) -> Result<()>;

    /// Resume playback. Capability-gated (`PlaybackControl`).
    fn start_playback(&self) -> Result<()>;

    /// Pause playback. Capability-gated (`PlaybackControl`).
    fn pause_playback(&self) -> Result<()>;

    /// Seek to `time`. Capability-gated (`PlaybackControl`).
    fn seek_playback(&self, time: Time) -> Result<()>;

    /// Set the playback speed as a fraction of real time.
    /// Capability-gated (`SetSpeed`).
    fn set_playback_speed(&self, fraction: f64) -> Result<()>;

    /// Ask the source to re-deliver the latest message on each subscribed
    /// topic. Sources without backfill treat this as a no-op.
    fn request_backfill(&self);

    /// Forward the externally owned global variables to the source.
    fn set_global_variables(&self, vars: Arc<GlobalVariables>);
}

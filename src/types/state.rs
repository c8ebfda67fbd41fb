//! Player state snapshots emitted through the pipeline

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{MessageEvent, Time, Topic, TopicStats};
use crate::problems::Problem;

/// Connection lifecycle phase of a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Presence {
    /// No connection attempt has been made.
    NotPresent,
    /// A connection attempt is in progress.
    Initializing,
    /// The transport closed; a retry is scheduled.
    Reconnecting,
    /// The transport is open.
    Present,
    /// A terminal failure; no further retries.
    Error,
}

/// Optional capabilities a player may declare.
///
/// Operations gated on a capability fail with
/// [`PipelineError::UnsupportedCapability`](crate::PipelineError) when the
/// active player's set excludes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    /// The player can advertise client channels and publish messages.
    Publish,
    /// The player can modify remote parameters.
    SetParameters,
    /// The player supports start/pause/seek playback control.
    PlaybackControl,
    /// The player supports non-real-time playback speeds.
    SetSpeed,
}

/// Progress indication for sources that load data over time.
///
/// Live sources leave this empty; recorded sources report the loaded
/// fraction for the playback bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Fraction of the source fully loaded, when known.
    pub fully_loaded_fraction: Option<f64>,
}

/// Data available once a player has an active source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveData {
    /// Messages accumulated since the previous emitted state, in source
    /// order. Consumers must treat a change of `last_seek_time` as a reset
    /// point; messages from before the seek are never delivered.
    pub messages: Vec<Arc<MessageEvent>>,

    /// Total bytes received over the lifetime of the connection.
    pub total_bytes_received: u64,

    /// Earliest message time observed.
    pub start_time: Time,

    /// Latest message time observed; the playback cursor position.
    pub current_time: Time,

    /// Latest message time observed.
    pub end_time: Time,

    /// Whether the source is advancing.
    pub is_playing: bool,

    /// Playback speed as a fraction of real time.
    pub speed: f64,

    /// Monotonic counter incremented on every detected discontinuity.
    /// Consumers watch this value, never timestamps, to detect seeks.
    pub last_seek_time: u64,

    /// Topics currently advertised by the source.
    pub topics: Vec<Topic>,

    /// Sparse per-topic statistics.
    pub topic_stats: HashMap<String, TopicStats>,
}

/// One state snapshot, the unit of communication from a player to the
/// pipeline.
#[derive(Debug, Clone, Default)]
pub struct PlayerState {
    /// Connection lifecycle phase.
    pub presence: Presence,

    /// Human-readable source name (URL, server name).
    pub name: Option<String>,

    /// Unique id for this player session. A changed `player_id` is the
    /// authoritative signal of a player-identity swap and triggers a full
    /// consumer-side reset; it is never inferred from `presence`.
    pub player_id: String,

    /// Capabilities declared by this player.
    pub capabilities: Vec<Capability>,

    /// Loading progress, for sources that report it.
    pub progress: Progress,

    /// Keyed diagnostics attached to this snapshot.
    pub problems: Vec<Arc<Problem>>,

    /// Active source data; `None` until the source has advertised topics.
    pub active_data: Option<ActiveData>,
}

impl Default for Presence {
    fn default() -> Self {
        Presence::NotPresent
    }
}

impl PlayerState {
    /// Snapshot used when no player is present.
    pub fn not_present() -> Self {
        PlayerState::default()
    }
}

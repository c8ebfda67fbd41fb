//! Core value types shared across the player and pipeline layers.
//!
//! Everything in this module is plain data: timestamps, topic descriptors,
//! decoded message events, and the [`PlayerState`] snapshot that players
//! emit through the pipeline. Behavior lives in the `player`, `pipeline`,
//! and `socket` modules.

mod message;
mod state;
mod time;
mod topic;

pub use message::MessageEvent;
pub use state::{ActiveData, Capability, PlayerState, Presence, Progress};
pub use time::Time;
pub use topic::{Topic, TopicStats};

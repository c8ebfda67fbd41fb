//! Topic descriptors and per-topic statistics

use serde::{Deserialize, Serialize};

use super::Time;

/// A named, typed event stream advertised by the active source.
///
/// Topic names are unique within one source; every message and subscription
/// references a topic by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    /// Topic name, e.g. `/camera/front`.
    pub name: String,

    /// Name of the schema describing messages on this topic.
    pub schema_name: String,
}

/// Message statistics observed for one topic.
///
/// Stats are sparse: a topic only gains an entry once a message arrives, the
/// entry is dropped when the topic's subscription is cancelled, and all
/// entries are cleared on a detected discontinuity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicStats {
    /// Number of messages observed on the topic.
    pub num_messages: u64,

    /// Timestamp of the first observed message; set once.
    pub first_message_time: Option<Time>,

    /// Timestamp of the latest observed message; only advances.
    pub last_message_time: Option<Time>,
}

impl TopicStats {
    /// Record one message at `time`.
    pub fn record(&mut self, time: Time) {
        self.num_messages += 1;
        if self.first_message_time.is_none() {
            self.first_message_time = Some(time);
        }
        match self.last_message_time {
            Some(last) if last >= time => {}
            _ => self.last_message_time = Some(time),
        }
    }
}

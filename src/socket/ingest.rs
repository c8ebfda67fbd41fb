//! Per-message ingest: frame accumulation, discontinuity detection, and
//! per-topic statistics.
//!
//! Messages are handled synchronously in source order. A timestamp earlier
//! than the last-seen maximum is an implicit seek: the seek counter bumps,
//! the not-yet-emitted frame is discarded, and stats reset. Consumers detect
//! discontinuities solely by watching the counter, never by comparing
//! timestamps themselves.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::problems::{Problem, ProblemSet};
use crate::types::{MessageEvent, Time, TopicStats};

pub(crate) struct StreamIngest {
    frame: Vec<Arc<MessageEvent>>,
    frame_bytes: usize,
    max_frame_bytes: usize,
    seek_count: u64,
    latest_time: Option<Time>,
    start_time: Option<Time>,
    end_time: Option<Time>,
    topic_stats: HashMap<String, TopicStats>,
    total_bytes: u64,
}

impl StreamIngest {
    pub fn new(max_frame_bytes: usize) -> Self {
        StreamIngest {
            frame: Vec::new(),
            frame_bytes: 0,
            max_frame_bytes,
            seek_count: 0,
            latest_time: None,
            start_time: None,
            end_time: None,
            topic_stats: HashMap::new(),
            total_bytes: 0,
        }
    }

    /// Append one decoded message to the pending frame.
    pub fn ingest(&mut self, event: MessageEvent, problems: &mut ProblemSet) {
        if let Some(latest) = self.latest_time {
            if event.receive_time < latest {
                // Implicit seek: messages queued before the regression are
                // never delivered.
                self.seek_count += 1;
                self.frame.clear();
                self.frame_bytes = 0;
                self.topic_stats.clear();
                debug!(
                    seek_count = self.seek_count,
                    at = %event.receive_time,
                    "time regression detected, frame discarded"
                );
            }
        }
        self.latest_time = Some(self.latest_time.map_or(event.receive_time, |t| {
            t.max(event.receive_time)
        }));
        if self.start_time.map_or(true, |t| event.receive_time < t) {
            self.start_time = Some(event.receive_time);
        }
        if self.end_time.map_or(true, |t| event.receive_time > t) {
            self.end_time = Some(event.receive_time);
        }

        self.total_bytes += event.size_in_bytes as u64;
        self.frame_bytes += event.size_in_bytes;
        self.topic_stats
            .entry(event.topic.clone())
            .or_default()
            .record(event.receive_time);
        self.frame.push(Arc::new(event));

        if self.frame_bytes > self.max_frame_bytes {
            self.evict(problems);
        }
    }

    /// Drain the pending frame for emission.
    pub fn take_frame(&mut self) -> Vec<Arc<MessageEvent>> {
        self.frame_bytes = 0;
        std::mem::take(&mut self.frame)
    }

    /// Drop stats for topics whose subscription was cancelled.
    pub fn drop_topic_stats(&mut self, topics: &[String]) {
        for topic in topics {
            self.topic_stats.remove(topic);
        }
    }

    /// Drop stats for topics that are no longer advertised.
    pub fn retain_topic_stats(&mut self, advertised: &HashSet<String>) {
        self.topic_stats.retain(|topic, _| advertised.contains(topic));
    }

    /// Forget everything tied to the current session.
    pub fn reset(&mut self) {
        *self = StreamIngest::new(self.max_frame_bytes);
    }

    pub fn seek_count(&self) -> u64 {
        self.seek_count
    }

    pub fn topic_stats(&self) -> &HashMap<String, TopicStats> {
        &self.topic_stats
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn start_time(&self) -> Time {
        self.start_time.unwrap_or(Time::ZERO)
    }

    pub fn end_time(&self) -> Time {
        self.end_time.unwrap_or(Time::ZERO)
    }

    /// Current playback position: the newest observed message time.
    pub fn current_time(&self) -> Time {
        self.latest_time.unwrap_or(Time::ZERO)
    }

    /// Evict oldest messages until the frame is back under 80% of the
    /// budget, amortizing the cost across overflows.
    fn evict(&mut self, problems: &mut ProblemSet) {
        problems.insert(
            "frame-overflow",
            Problem::error(format!(
                "Maximum frame size ({} bytes) reached; dropping old messages. \
                 This can occur if consumers stall for extended periods.",
                self.max_frame_bytes
            )),
        );
        let target = self.max_frame_bytes * 4 / 5;
        let mut dropped = 0usize;
        let mut cut = 0usize;
        while self.frame_bytes - dropped > target && cut < self.frame.len() {
            dropped += self.frame[cut].size_in_bytes;
            cut += 1;
        }
        self.frame.drain(..cut);
        self.frame_bytes -= dropped;
    }
}

//! Subscription resolution for protocol-driven players.
//!
//! Maps the externally requested topic set onto the server's live channel
//! set. A requested topic without a backing channel stays *unresolved* and
//! is resolved opportunistically whenever new channels are advertised; a
//! resolved topic owns exactly one transport subscription id. Canceled ids
//! enter a fixed suppression window so late in-flight messages are not
//! mistaken for protocol bugs.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use super::decode::{DecoderRegistry, MessageDecoder};
use super::transport::{ChannelId, ChannelInfo, SubscriptionId, TransportLink};
use crate::problems::{Problem, ProblemSet};
use crate::types::Topic;

/// A channel together with the decoder built from its schema.
pub(crate) struct ResolvedChannel {
    pub channel: ChannelInfo,
    pub decoder: Arc<dyn MessageDecoder>,
}

/// Outcome of resolving an incoming message's subscription id.
pub(crate) enum Lookup {
    Resolved(Arc<ResolvedChannel>),
    /// Canceled within the suppression window; drop silently.
    RecentlyCanceled,
    /// Never known or canceled long ago; a possible server bug.
    Unknown,
}

pub(crate) struct SubscriptionResolver {
    unresolved: BTreeSet<String>,
    resolved_by_topic: HashMap<String, SubscriptionId>,
    resolved_by_id: HashMap<SubscriptionId, Arc<ResolvedChannel>>,
    channels_by_topic: HashMap<String, Arc<ResolvedChannel>>,
    channels_by_id: HashMap<ChannelId, Arc<ResolvedChannel>>,
    unsupported_channels: HashSet<ChannelId>,
    /// Canceled subscription id -> suppression expiry, checked lazily.
    recently_canceled: HashMap<SubscriptionId, Instant>,
    suppression_window: Duration,
}

impl SubscriptionResolver {
    pub fn new(suppression_window: Duration) -> Self {
        SubscriptionResolver {
            unresolved: BTreeSet::new(),
            resolved_by_topic: HashMap::new(),
            resolved_by_id: HashMap::new(),
            channels_by_topic: HashMap::new(),
            channels_by_id: HashMap::new(),
            unsupported_channels: HashSet::new(),
            recently_canceled: HashMap::new(),
            suppression_window,
        }
    }

    /// Replace the requested topic set.
    ///
    /// Topics that lost their subscription are unsubscribed immediately and
    /// their ids enter the suppression window. Returns the topics whose
    /// stats the caller must drop.
    pub fn set_subscriptions(
        &mut self,
        topics: BTreeSet<String>,
        link: Option<&dyn TransportLink>,
    ) -> Vec<String> {
        let Some(link) = link else {
            // Disconnected: remember the request so it resolves once channel
            // advertisements arrive post-(re)connect.
            self.unresolved = topics;
            return Vec::new();
        };

        for topic in &topics {
            if !self.resolved_by_topic.contains_key(topic) {
                self.unresolved.insert(topic.clone());
            }
        }

        let mut removed = Vec::new();
        let now = Instant::now();
        let canceled: Vec<(String, SubscriptionId)> = self
            .resolved_by_topic
            .iter()
            .filter(|(topic, _)| !topics.contains(*topic))
            .map(|(topic, id)| (topic.clone(), *id))
            .collect();
        for (topic, sub_id) in canceled {
            link.unsubscribe(sub_id);
            self.resolved_by_topic.remove(&topic);
            self.resolved_by_id.remove(&sub_id);
            self.recently_canceled.insert(sub_id, now + self.suppression_window);
            removed.push(topic);
        }
        self.prune_canceled(now);

        self.unresolved.retain(|topic| topics.contains(topic));

        self.resolve_pending(link);
        removed
    }

    /// Handle newly advertised channels, then re-resolve pending topics.
    ///
    /// A schema that fails to parse marks only that channel unsupported;
    /// remaining channels in the batch are still processed.
    pub fn on_advertise(
        &mut self,
        channels: Vec<ChannelInfo>,
        registry: &DecoderRegistry,
        link: &dyn TransportLink,
        problems: &mut ProblemSet,
    ) {
        for channel in channels {
            let decoder = match registry.parse_channel(&channel) {
                Ok(decoder) => decoder,
                Err(error) => {
                    self.unsupported_channels.insert(channel.id);
                    problems.insert(
                        format!("schema:{}", channel.topic),
                        Problem::error(format!(
                            "Failed to parse channel schema on {}",
                            channel.topic
                        ))
                        .with_cause(format!("{error:#}")),
                    );
                    continue;
                }
            };
            if let Some(existing) = self.channels_by_topic.get(&channel.topic) {
                if existing.channel != channel {
                    problems.insert(
                        format!("duplicate-topic:{}", channel.topic),
                        Problem::error(format!(
                            "Multiple channels advertise the same topic: {} ({} and {})",
                            channel.topic, existing.channel.id, channel.id
                        )),
                    );
                    continue;
                }
            }
            debug!(channel = channel.id, topic = %channel.topic, "channel advertised");
            let resolved = Arc::new(ResolvedChannel { channel, decoder: decoder.into() });
            self.channels_by_id.insert(resolved.channel.id, Arc::clone(&resolved));
            self.channels_by_topic.insert(resolved.channel.topic.clone(), resolved);
        }
        self.resolve_pending(link);
    }

    /// Handle withdrawn channels: dependent subscriptions move back to
    /// unresolved, unknown ids raise a problem unless previously marked
    /// unsupported.
    pub fn on_unadvertise(
        &mut self,
        ids: Vec<ChannelId>,
        link: &dyn TransportLink,
        problems: &mut ProblemSet,
    ) {
        for id in ids {
            let Some(info) = self.channels_by_id.remove(&id) else {
                if !self.unsupported_channels.remove(&id) {
                    problems.insert(
                        format!("unadvertise:{id}"),
                        Problem::error(format!(
                            "Server unadvertised channel {id} that was not advertised"
                        )),
                    );
                }
                continue;
            };
            let dependents: Vec<SubscriptionId> = self
                .resolved_by_id
                .iter()
                .filter(|(_, resolved)| resolved.channel.id == id)
                .map(|(sub_id, _)| *sub_id)
                .collect();
            for sub_id in dependents {
                self.resolved_by_id.remove(&sub_id);
                self.resolved_by_topic.remove(&info.channel.topic);
                link.unsubscribe(sub_id);
                self.unresolved.insert(info.channel.topic.clone());
            }
            self.channels_by_topic.remove(&info.channel.topic);
            debug!(channel = id, topic = %info.channel.topic, "channel unadvertised");
        }
    }

    /// Resolve an incoming message's subscription id.
    pub fn lookup(&mut self, subscription: SubscriptionId) -> Lookup {
        if let Some(resolved) = self.resolved_by_id.get(&subscription) {
            return Lookup::Resolved(Arc::clone(resolved));
        }
        match self.recently_canceled.get(&subscription) {
            Some(expiry) if *expiry > Instant::now() => Lookup::RecentlyCanceled,
            Some(_) => {
                self.recently_canceled.remove(&subscription);
                Lookup::Unknown
            }
            None => Lookup::Unknown,
        }
    }

    /// Transport closed: every resolved subscription becomes unresolved so
    /// it re-resolves once post-reconnect advertisements arrive.
    pub fn on_disconnect(&mut self) {
        for topic in self.resolved_by_topic.keys() {
            self.unresolved.insert(topic.clone());
        }
        self.resolved_by_topic.clear();
        self.resolved_by_id.clear();
    }

    /// Transport reopened: stale server-side identifiers must not leak
    /// across connections.
    pub fn on_open(&mut self) {
        self.on_disconnect();
        self.channels_by_id.clear();
        self.channels_by_topic.clear();
        self.unsupported_channels.clear();
        self.recently_canceled.clear();
    }

    /// Topics currently advertised, sorted by name.
    pub fn advertised_topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self
            .channels_by_topic
            .values()
            .map(|resolved| Topic {
                name: resolved.channel.topic.clone(),
                schema_name: resolved.channel.schema_name.clone(),
            })
            .collect();
        topics.sort_by(|a, b| a.name.cmp(&b.name));
        topics
    }

    /// The full requested topic set: unresolved plus resolved.
    pub fn requested_topics(&self) -> BTreeSet<String> {
        self.unresolved
            .iter()
            .chain(self.resolved_by_topic.keys())
            .cloned()
            .collect()
    }

    /// Topics with a live transport subscription.
    pub fn resolved_topics(&self) -> BTreeSet<String> {
        self.resolved_by_topic.keys().cloned().collect()
    }

    fn resolve_pending(&mut self, link: &dyn TransportLink) {
        let resolvable: Vec<String> = self
            .unresolved
            .iter()
            .filter(|topic| self.channels_by_topic.contains_key(*topic))
            .cloned()
            .collect();
        for topic in resolvable {
            let channel = Arc::clone(&self.channels_by_topic[&topic]);
            let sub_id = link.subscribe(channel.channel.id);
            debug!(topic = %topic, subscription = sub_id, "subscription resolved");
            self.unresolved.remove(&topic);
            self.resolved_by_topic.insert(topic, sub_id);
            self.resolved_by_id.insert(sub_id, channel);
        }
    }

    fn prune_canceled(&mut self, now: Instant) {
        self.recently_canceled.retain(|_, expiry| *expiry > now);
    }
}

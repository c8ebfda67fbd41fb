//! Pipeline store: merges consumer subscriptions, paces propagation to the
//! player, and republishes immutable state snapshots.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{watch, Notify};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::listener::{ListenerArgs, PipelineListener};
use super::pause_frame::{FrameGuard, HoldRegistry};
use super::subscriptions::merge_subscriptions;
use crate::config::PipelineConfig;
use crate::player::{
    AdvertiseOptions, GlobalVariables, Player, PublishPayload, SubscribePayload,
};
use crate::types::{Capability, MessageEvent, PlayerState, Topic};
use crate::Result;

/// Identifies one consumer (panel) registered with the pipeline.
pub type ConsumerId = String;

/// The merged, immutable snapshot republished to all consumers.
///
/// Messages are bucketed by consumer id so each consumer receives only the
/// topics it subscribed to. Each snapshot's messages are a delta: the batch
/// accumulated since the previous snapshot.
#[derive(Debug, Clone, Default)]
pub struct PipelineSnapshot {
    pub player_state: PlayerState,

    /// Topics of the active source, sorted by name.
    pub sorted_topics: Vec<Topic>,

    /// This frame's messages, per subscribed consumer.
    pub messages_by_consumer: HashMap<ConsumerId, Vec<Arc<MessageEvent>>>,

    /// The merged subscription set currently requested from the player.
    pub subscriptions: Vec<SubscribePayload>,
}

/// Metadata summary of the active player.
#[derive(Debug, Clone, Default)]
pub struct PipelineMetadata {
    pub player_id: String,
    pub name: Option<String>,
    pub capabilities: Vec<Capability>,
}

#[derive(Default)]
pub(crate) struct StoreInner {
    subscriptions_by_consumer: HashMap<ConsumerId, Vec<SubscribePayload>>,
    pub(crate) consumer_ids_by_topic: HashMap<String, Vec<ConsumerId>>,
    pub(crate) last_message_by_topic: HashMap<String, Arc<MessageEvent>>,
    pub(crate) merged: Vec<SubscribePayload>,
    publishers_by_consumer: HashMap<ConsumerId, Vec<AdvertiseOptions>>,
    global_variables: Option<Arc<GlobalVariables>>,
}

impl StoreInner {
    /// Wipe all derived state. Runs on player-identity change so no
    /// consumer can read data belonging to a previous source.
    pub(crate) fn reset(&mut self) {
        *self = StoreInner::default();
    }

    fn rebuild_topic_index(&mut self) {
        self.consumer_ids_by_topic.clear();
        for (id, payloads) in &self.subscriptions_by_consumer {
            for payload in payloads {
                let ids = self
                    .consumer_ids_by_topic
                    .entry(payload.topic.clone())
                    .or_default();
                if !ids.contains(id) {
                    ids.push(id.clone());
                }
            }
        }
        // Drop retained last-messages for topics nobody subscribes to, so a
        // consumer re-subscribing later is not handed a stale backfill.
        let index = &self.consumer_ids_by_topic;
        self.last_message_by_topic
            .retain(|topic, _| index.contains_key(topic));
    }
}

/// Orchestrates one player for many consumers.
///
/// Consumers register complete subscription sets under their own id; the
/// union is debounced and forwarded to the player as a single update.
/// Snapshots flow the other way through a watch channel, paced by the
/// pipeline listener's frame budget.
pub struct Pipeline {
    player: Arc<dyn Player>,
    inner: Arc<Mutex<StoreInner>>,
    snapshot_tx: Arc<watch::Sender<Arc<PipelineSnapshot>>>,
    subscriptions_changed: Arc<Notify>,
    holds: HoldRegistry,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Wrap a player, installing the pipeline listener and starting the
    /// debounced subscription propagation task.
    pub fn new(mut player: impl Player, config: PipelineConfig) -> Self {
        let inner = Arc::new(Mutex::new(StoreInner::default()));
        let snapshot_tx =
            Arc::new(watch::channel(Arc::new(PipelineSnapshot::default())).0);
        let subscriptions_changed = Arc::new(Notify::new());
        let holds = HoldRegistry::default();
        let cancel = CancellationToken::new();

        player.set_listener(Box::new(PipelineListener::new(ListenerArgs {
            inner: Arc::clone(&inner),
            snapshot_tx: Arc::clone(&snapshot_tx),
            subscriptions_changed: Arc::clone(&subscriptions_changed),
            holds: holds.clone(),
            frame_budget: config.frame_budget(),
            cancel: cancel.clone(),
        })));
        let player: Arc<dyn Player> = Arc::new(player);

        tokio::spawn(propagation_task(
            Arc::clone(&player),
            Arc::clone(&inner),
            Arc::clone(&subscriptions_changed),
            cancel.clone(),
        ));

        info!("pipeline started");
        Pipeline { player, inner, snapshot_tx, subscriptions_changed, holds, cancel }
    }

    /// Replace one consumer's subscription set.
    ///
    /// Replacement semantics: `payloads` is the consumer's complete desired
    /// set. Topics this consumer newly subscribed to are backfilled with
    /// the last retained message, when one exists.
    pub fn set_subscriptions(&self, consumer_id: &str, payloads: Vec<SubscribePayload>) {
        let backfill = {
            let mut inner = self.lock();

            let previous_topics: Vec<String> = inner
                .subscriptions_by_consumer
                .get(consumer_id)
                .map(|subs| subs.iter().map(|s| s.topic.clone()).collect())
                .unwrap_or_default();

            if payloads.is_empty() {
                inner.subscriptions_by_consumer.remove(consumer_id);
            } else {
                inner
                    .subscriptions_by_consumer
                    .insert(consumer_id.to_string(), payloads.clone());
            }
            inner.rebuild_topic_index();
            let merged = merge_subscriptions(
                inner.subscriptions_by_consumer.values().flatten().cloned(),
            );
            inner.merged = merged;

            let mut backfill: Vec<Arc<MessageEvent>> = Vec::new();
            for payload in &payloads {
                if previous_topics.contains(&payload.topic) {
                    continue;
                }
                if let Some(event) = inner.last_message_by_topic.get(&payload.topic) {
                    backfill.push(Arc::clone(event));
                }
            }
            if backfill.is_empty() {
                None
            } else {
                let mut snapshot: PipelineSnapshot = (**self.snapshot_tx.borrow()).clone();
                snapshot.subscriptions = inner.merged.clone();
                snapshot.messages_by_consumer =
                    HashMap::from([(consumer_id.to_string(), backfill)]);
                Some(snapshot)
            }
        };
        if let Some(snapshot) = backfill {
            self.snapshot_tx.send_replace(Arc::new(snapshot));
        }
        self.subscriptions_changed.notify_one();
    }

    /// Replace one consumer's client publications.
    pub fn set_publishers(&self, consumer_id: &str, publishers: Vec<AdvertiseOptions>) {
        let all: Vec<AdvertiseOptions> = {
            let mut inner = self.lock();
            if publishers.is_empty() {
                inner.publishers_by_consumer.remove(consumer_id);
            } else {
                inner
                    .publishers_by_consumer
                    .insert(consumer_id.to_string(), publishers);
            }
            inner.publishers_by_consumer.values().flatten().cloned().collect()
        };
        self.player.set_publishers(all);
    }

    /// Modify a remote parameter through the active player.
    pub fn set_parameter(&self, key: String, value: serde_json::Value) -> Result<()> {
        self.player.set_parameter(key, value)
    }

    /// Publish a message through the active player.
    pub fn publish(&self, payload: PublishPayload) -> Result<()> {
        self.player.publish(payload)
    }

    /// Register a named hold on the current frame; the returned guard
    /// resumes it explicitly or on drop.
    pub fn pause_frame(&self, name: impl Into<String>) -> FrameGuard {
        self.holds.register(name)
    }

    /// Forward new global variables to the player.
    ///
    /// The map is compared by identity, not deep equality, so unrelated
    /// state changes never trigger redundant pushes.
    pub fn set_global_variables(&self, vars: Arc<GlobalVariables>) {
        {
            let mut inner = self.lock();
            if inner
                .global_variables
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &vars))
            {
                return;
            }
            inner.global_variables = Some(Arc::clone(&vars));
        }
        self.player.set_global_variables(vars);
    }

    /// Summary of the active player from the latest snapshot.
    pub fn metadata(&self) -> PipelineMetadata {
        let snapshot = self.snapshot_tx.borrow();
        PipelineMetadata {
            player_id: snapshot.player_state.player_id.clone(),
            name: snapshot.player_state.name.clone(),
            capabilities: snapshot.player_state.capabilities.clone(),
        }
    }

    /// The most recent snapshot.
    pub fn latest(&self) -> Arc<PipelineSnapshot> {
        self.snapshot_tx.borrow().clone()
    }

    /// Watch receiver for snapshot updates.
    pub fn watch(&self) -> watch::Receiver<Arc<PipelineSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Snapshot updates as a stream, yielding the current value first.
    pub fn snapshot_stream(&self) -> WatchStream<Arc<PipelineSnapshot>> {
        WatchStream::new(self.watch())
    }

    /// Close the pipeline and the underlying player. In-flight frame
    /// processing is abandoned; no further snapshots are published.
    pub fn close(&self) {
        info!("pipeline closing");
        self.cancel.cancel();
        self.player.close();
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Debounced propagation of the merged subscription set to the player.
///
/// Dirty-flag semantics: however many consumers changed subscriptions since
/// the last wakeup, the player sees one `set_subscriptions` call with the
/// final merged set, and at most one propagation is in flight at a time.
async fn propagation_task(
    player: Arc<dyn Player>,
    inner: Arc<Mutex<StoreInner>>,
    subscriptions_changed: Arc<Notify>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = subscriptions_changed.notified() => {}
        }
        // Give same-turn updates from other consumers a chance to land
        // before reading the merged set.
        tokio::task::yield_now().await;
        if cancel.is_cancelled() {
            break;
        }
        let merged = {
            let locked = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            locked.merged.clone()
        };
        debug!(topics = merged.len(), "propagating merged subscriptions");
        player.set_subscriptions(merged);
        player.request_backfill();
    }
}

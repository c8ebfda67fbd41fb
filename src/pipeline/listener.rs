//! The pipeline's player-state listener.
//!
//! Constructed from an explicit, minimal argument struct rather than
//! closing over pipeline internals, so a superseded player's final state
//! can never be retained through a stale capture. One listener instance is
//! owned by the player's emit task; because `on_state` takes `&mut self`,
//! a second delivery cannot begin until the previous one resolves.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::pause_frame::{wait_for_holds, HoldRegistry};
use super::store::{ConsumerId, PipelineSnapshot, StoreInner};
use crate::player::PlayerStateListener;
use crate::types::{MessageEvent, PlayerState};

pub(crate) struct ListenerArgs {
    pub inner: Arc<Mutex<StoreInner>>,
    pub snapshot_tx: Arc<watch::Sender<Arc<PipelineSnapshot>>>,
    pub subscriptions_changed: Arc<Notify>,
    pub holds: HoldRegistry,
    pub frame_budget: std::time::Duration,
    pub cancel: CancellationToken,
}

pub(crate) struct PipelineListener {
    inner: Arc<Mutex<StoreInner>>,
    snapshot_tx: Arc<watch::Sender<Arc<PipelineSnapshot>>>,
    subscriptions_changed: Arc<Notify>,
    holds: HoldRegistry,
    frame_budget: std::time::Duration,
    cancel: CancellationToken,
    previous_player_id: Option<String>,
}

impl PipelineListener {
    pub fn new(args: ListenerArgs) -> Self {
        PipelineListener {
            inner: args.inner,
            snapshot_tx: args.snapshot_tx,
            subscriptions_changed: args.subscriptions_changed,
            holds: args.holds,
            frame_budget: args.frame_budget,
            cancel: args.cancel,
            previous_player_id: None,
        }
    }

    fn build_snapshot(&self, state: PlayerState) -> Arc<PipelineSnapshot> {
        let mut inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut messages_by_consumer: HashMap<ConsumerId, Vec<Arc<MessageEvent>>> =
            HashMap::new();
        if let Some(active) = &state.active_data {
            for event in &active.messages {
                // Retained for backfilling consumers that subscribe later
                inner
                    .last_message_by_topic
                    .insert(event.topic.clone(), Arc::clone(event));

                let Some(ids) = inner.consumer_ids_by_topic.get(&event.topic) else {
                    continue;
                };
                for id in ids {
                    messages_by_consumer
                        .entry(id.clone())
                        .or_default()
                        .push(Arc::clone(event));
                }
            }
        }

        let mut sorted_topics = state
            .active_data
            .as_ref()
            .map(|active| active.topics.clone())
            .unwrap_or_default();
        sorted_topics.sort_by(|a, b| a.name.cmp(&b.name));

        Arc::new(PipelineSnapshot {
            player_state: state,
            sorted_topics,
            messages_by_consumer,
            subscriptions: inner.merged.clone(),
        })
    }
}

#[async_trait::async_trait]
impl PlayerStateListener for PipelineListener {
    async fn on_state(&mut self, state: PlayerState) {
        if self.cancel.is_cancelled() {
            return;
        }
        let start = Instant::now();

        // A changed player id is the authoritative identity-swap signal:
        // derived state is wiped before the new snapshot is accepted, and
        // the (now empty) merged subscription set is re-propagated.
        if self
            .previous_player_id
            .as_ref()
            .is_some_and(|prev| *prev != state.player_id)
        {
            debug!(player_id = %state.player_id, "player identity changed, resetting store");
            self.inner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .reset();
            self.subscriptions_changed.notify_one();
        }
        self.previous_player_id = Some(state.player_id.clone());

        let snapshot = self.build_snapshot(state);
        self.snapshot_tx.send_replace(snapshot);

        // Consumers have the rest of the frame budget to hold the frame;
        // the budget itself paces delivery to the configured message rate.
        let holds = self.holds.drain();
        let remaining = self.frame_budget.saturating_sub(start.elapsed());
        if !holds.is_empty() && !remaining.is_zero() {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = wait_for_holds(holds, remaining) => {}
            }
        }
        let remaining = self.frame_budget.saturating_sub(start.elapsed());
        if !remaining.is_zero() {
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep(remaining) => {}
            }
        }
    }
}

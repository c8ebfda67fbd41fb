//! Test helpers: an in-memory transport and a scriptable mock player.
//!
//! The fake transport lets tests drive the socket player through full
//! connection lifecycles (open, advertise, messages, close, reconnect)
//! without a real socket, while recording every outbound command.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::player::{
    AdvertiseOptions, GlobalVariables, Player, PlayerStateListener, PublishPayload,
    SubscribePayload,
};
use crate::socket::{
    ChannelId, ChannelInfo, Connector, ServerInfo, StatusLevel, SubscriptionId,
    TransportConnection, TransportEvent, TransportLink,
};
use crate::types::{PlayerState, Time};
use crate::{PipelineError, Result};

/// A JSON channel with an object schema, the common case in tests.
pub fn json_channel(id: ChannelId, topic: &str) -> ChannelInfo {
    ChannelInfo {
        id,
        topic: topic.to_string(),
        encoding: "json".to_string(),
        schema_name: format!("{}Schema", topic.trim_start_matches('/')),
        schema_encoding: "jsonschema".to_string(),
        schema: br#"{"type":"object"}"#.to_vec(),
    }
}

/// Transport link that records every outbound command.
#[derive(Default)]
pub struct RecordingLink {
    next_subscription: AtomicU64,
    next_channel: AtomicU64,
    subscribes: Mutex<Vec<(ChannelId, SubscriptionId)>>,
    unsubscribes: Mutex<Vec<SubscriptionId>>,
    advertises: Mutex<Vec<(ChannelId, AdvertiseOptions)>>,
    unadvertises: Mutex<Vec<ChannelId>>,
    publishes: Mutex<Vec<(ChannelId, Vec<u8>)>>,
    parameters: Mutex<Vec<(String, serde_json::Value)>>,
    closed: AtomicBool,
}

impl RecordingLink {
    pub fn new() -> Self {
        RecordingLink {
            next_subscription: AtomicU64::new(1),
            next_channel: AtomicU64::new(100),
            ..RecordingLink::default()
        }
    }

    /// Channel ids subscribed to, in call order.
    pub fn subscribed_channels(&self) -> Vec<ChannelId> {
        self.subscribes.lock().unwrap().iter().map(|(ch, _)| *ch).collect()
    }

    /// Subscription ids handed out, in call order.
    pub fn subscriptions(&self) -> Vec<SubscriptionId> {
        self.subscribes.lock().unwrap().iter().map(|(_, id)| *id).collect()
    }

    pub fn unsubscribed(&self) -> Vec<SubscriptionId> {
        self.unsubscribes.lock().unwrap().clone()
    }

    pub fn advertised(&self) -> Vec<AdvertiseOptions> {
        self.advertises.lock().unwrap().iter().map(|(_, opts)| opts.clone()).collect()
    }

    pub fn unadvertised(&self) -> Vec<ChannelId> {
        self.unadvertises.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<(ChannelId, Vec<u8>)> {
        self.publishes.lock().unwrap().clone()
    }

    pub fn parameters(&self) -> Vec<(String, serde_json::Value)> {
        self.parameters.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl TransportLink for RecordingLink {
    fn subscribe(&self, channel: ChannelId) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.subscribes.lock().unwrap().push((channel, id));
        id
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        self.unsubscribes.lock().unwrap().push(subscription);
    }

    fn advertise(&self, topic: &str, encoding: &str, schema_name: &str) -> ChannelId {
        let id = self.next_channel.fetch_add(1, Ordering::SeqCst);
        self.advertises.lock().unwrap().push((
            id,
            AdvertiseOptions {
                topic: topic.to_string(),
                encoding: encoding.to_string(),
                schema_name: schema_name.to_string(),
            },
        ));
        id
    }

    fn unadvertise(&self, channel: ChannelId) {
        self.unadvertises.lock().unwrap().push(channel);
    }

    fn publish(&self, channel: ChannelId, payload: Vec<u8>) {
        self.publishes.lock().unwrap().push((channel, payload));
    }

    fn set_parameter(&self, key: &str, value: &serde_json::Value) {
        self.parameters.lock().unwrap().push((key.to_string(), value.clone()));
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// One accepted fake connection, driven by the test.
pub struct FakeConnection {
    pub link: Arc<RecordingLink>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl FakeConnection {
    fn send(&self, event: TransportEvent) {
        // The player may already have moved on; a dropped receiver is fine.
        let _ = self.events.send(event);
    }

    pub fn open(&self) {
        self.send(TransportEvent::Open);
    }

    pub fn server_info(&self, name: &str, session_id: Option<&str>, capabilities: &[&str]) {
        self.send(TransportEvent::ServerInfo(ServerInfo {
            name: name.to_string(),
            session_id: session_id.map(str::to_string),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            supported_encodings: vec!["json".to_string()],
        }));
    }

    pub fn status(&self, level: StatusLevel, message: &str) {
        self.send(TransportEvent::Status { level, message: message.to_string() });
    }

    pub fn advertise(&self, channels: Vec<ChannelInfo>) {
        self.send(TransportEvent::Advertise(channels));
    }

    pub fn unadvertise(&self, ids: Vec<ChannelId>) {
        self.send(TransportEvent::Unadvertise(ids));
    }

    pub fn message(&self, subscription_id: SubscriptionId, time: Time, value: serde_json::Value) {
        self.send(TransportEvent::Message {
            subscription_id,
            timestamp: time,
            payload: serde_json::to_vec(&value).unwrap(),
        });
    }

    pub fn close(&self) {
        self.send(TransportEvent::Close { reason: Some("test".to_string()) });
    }
}

/// Connector half handed to the player; yields a fresh recording link per
/// connection attempt.
pub struct FakeConnector {
    accepted: mpsc::UnboundedSender<FakeConnection>,
}

/// Server half kept by the test to accept and drive connections.
pub struct FakeServer {
    accepted: mpsc::UnboundedReceiver<FakeConnection>,
}

impl FakeServer {
    /// Wait for the player's next connection attempt.
    pub async fn next_connection(&mut self) -> FakeConnection {
        tokio::time::timeout(Duration::from_secs(5), self.accepted.recv())
            .await
            .expect("timed out waiting for a connection attempt")
            .expect("connector dropped")
    }

    /// Whether no further connection attempt is pending.
    pub fn accepted_is_empty(&mut self) -> bool {
        self.accepted.try_recv().is_err()
    }
}

pub fn fake_transport() -> (FakeConnector, FakeServer) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FakeConnector { accepted: tx }, FakeServer { accepted: rx })
}

#[async_trait::async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<TransportConnection> {
        let link = Arc::new(RecordingLink::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.accepted
            .send(FakeConnection { link: Arc::clone(&link), events: events_tx })
            .map_err(|_| PipelineError::connection_failed("test server gone"))?;
        Ok(TransportConnection { link, events: events_rx })
    }
}

/// Listener that records every delivered state.
pub struct RecordingListener {
    states: Arc<Mutex<Vec<PlayerState>>>,
}

impl RecordingListener {
    pub fn new() -> (Self, Arc<Mutex<Vec<PlayerState>>>) {
        let states = Arc::new(Mutex::new(Vec::new()));
        (RecordingListener { states: Arc::clone(&states) }, states)
    }
}

#[async_trait::async_trait]
impl PlayerStateListener for RecordingListener {
    async fn on_state(&mut self, state: PlayerState) {
        self.states.lock().unwrap().push(state);
    }
}

/// Shared internals of [`MockPlayer`], kept by the test for assertions and
/// for emitting states through the installed listener.
#[derive(Default)]
pub struct MockPlayerShared {
    subscription_calls: Mutex<Vec<Vec<SubscribePayload>>>,
    publisher_calls: Mutex<Vec<Vec<AdvertiseOptions>>>,
    global_variable_pushes: Mutex<Vec<Arc<GlobalVariables>>>,
    backfill_requests: AtomicU64,
    closed: AtomicBool,
    listener: tokio::sync::Mutex<Option<Box<dyn PlayerStateListener>>>,
}

impl MockPlayerShared {
    pub fn subscription_calls(&self) -> Vec<Vec<SubscribePayload>> {
        self.subscription_calls.lock().unwrap().clone()
    }

    pub fn publisher_calls(&self) -> Vec<Vec<AdvertiseOptions>> {
        self.publisher_calls.lock().unwrap().clone()
    }

    pub fn global_variable_pushes(&self) -> usize {
        self.global_variable_pushes.lock().unwrap().len()
    }

    pub fn backfill_requests(&self) -> u64 {
        self.backfill_requests.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Deliver a state through the installed listener, awaiting its
    /// completion like a real player's emit task would.
    pub async fn emit(&self, state: PlayerState) {
        let mut listener = self.listener.lock().await;
        let listener = listener.as_mut().expect("no listener installed");
        listener.on_state(state).await;
    }
}

/// Scriptable player for pipeline tests.
pub struct MockPlayer {
    shared: Arc<MockPlayerShared>,
}

impl MockPlayer {
    pub fn new() -> (Self, Arc<MockPlayerShared>) {
        let shared = Arc::new(MockPlayerShared::default());
        (MockPlayer { shared: Arc::clone(&shared) }, shared)
    }
}

impl Player for MockPlayer {
    fn set_listener(&mut self, listener: Box<dyn PlayerStateListener>) {
        *self.shared.listener.try_lock().expect("listener lock busy") = Some(listener);
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }

    fn set_subscriptions(&self, subscriptions: Vec<SubscribePayload>) {
        self.shared.subscription_calls.lock().unwrap().push(subscriptions);
    }

    fn set_publishers(&self, publishers: Vec<AdvertiseOptions>) {
        self.shared.publisher_calls.lock().unwrap().push(publishers);
    }

    fn set_parameter(&self, _key: String, _value: serde_json::Value) -> Result<()> {
        Ok(())
    }

    fn publish(&self, _payload: PublishPayload) -> Result<()> {
        Ok(())
    }

    fn start_playback(&self) -> Result<()> {
        Ok(())
    }

    fn pause_playback(&self) -> Result<()> {
        Ok(())
    }

    fn seek_playback(&self, _time: Time) -> Result<()> {
        Ok(())
    }

    fn set_playback_speed(&self, _fraction: f64) -> Result<()> {
        Ok(())
    }

    fn request_backfill(&self) {
        self.shared.backfill_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn set_global_variables(&self, vars: Arc<GlobalVariables>) {
        self.shared.global_variable_pushes.lock().unwrap().push(vars);
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

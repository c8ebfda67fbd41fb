//! Protocol-driven socket player.
//!
//! One connection task owns the transport lifecycle (dial, event loop,
//! reconnect); one emit task owns the listener and drains accumulated state.
//! All mutable player state lives in a single `PlayerCore` behind a mutex,
//! locked only for short synchronous sections.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::decode::DecoderRegistry;
use super::ingest::StreamIngest;
use super::resolver::{Lookup, SubscriptionResolver};
use super::transport::{
    server_capability, ChannelId, ChannelInfo, Connector, ServerInfo, StatusLevel,
    SubscriptionId, TransportConnection, TransportEvent, TransportLink,
};
use crate::config::SocketPlayerConfig;
use crate::player::{
    AdvertiseOptions, GlobalVariables, Player, PlayerStateListener, PublishPayload,
    SubscribePayload,
};
use crate::problems::{Problem, ProblemSet, Severity};
use crate::types::{ActiveData, Capability, PlayerState, Presence, Progress, Time};
use crate::{PipelineError, Result};

/// A client channel advertised to the server for publishing.
struct ClientPublication {
    channel_id: ChannelId,
    options: AdvertiseOptions,
}

struct PlayerCore {
    config: SocketPlayerConfig,
    registry: DecoderRegistry,

    /// Player session id; replaced when the server announces a different
    /// session, which consumers observe as an identity swap.
    id: String,
    name: String,
    presence: Presence,
    capabilities: Vec<Capability>,
    problems: ProblemSet,
    resolver: SubscriptionResolver,
    ingest: StreamIngest,
    link: Option<Arc<dyn TransportLink>>,
    server: Option<ServerInfo>,

    /// Set once the server has advertised at least one channel batch;
    /// before that the emitted state carries no active data.
    has_topics: bool,

    unresolved_publications: Vec<AdvertiseOptions>,
    publications_by_topic: HashMap<String, ClientPublication>,

    closed: bool,
}

impl PlayerCore {
    fn new(config: SocketPlayerConfig, registry: DecoderRegistry) -> Self {
        let resolver = SubscriptionResolver::new(config.suppression_window());
        let ingest = StreamIngest::new(config.max_frame_bytes);
        PlayerCore {
            name: config.name.clone(),
            config,
            registry,
            id: Uuid::new_v4().to_string(),
            presence: Presence::NotPresent,
            capabilities: Vec::new(),
            problems: ProblemSet::new(),
            resolver,
            ingest,
            link: None,
            server: None,
            has_topics: false,
            unresolved_publications: Vec::new(),
            publications_by_topic: HashMap::new(),
            closed: false,
        }
    }

    fn handle_open(&mut self) {
        info!(name = %self.config.name, "transport open");
        self.presence = Presence::Present;
        self.problems.clear();
        self.resolver.on_open();
        self.publications_by_topic.clear();
        self.server = None;
    }

    fn handle_server_info(&mut self, info: ServerInfo, link: &Arc<dyn TransportLink>) {
        let new_id = info
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.id != new_id {
            debug!(old = %self.id, new = %new_id, "server session changed, resetting session state");
            self.reset_session_state();
            self.id = new_id;
        }
        self.name = format!("{}\n{}", self.config.name, info.name);

        self.capabilities.clear();
        if info
            .capabilities
            .iter()
            .any(|c| c == server_capability::CLIENT_PUBLISH)
        {
            self.capabilities.push(Capability::Publish);
        }
        if info
            .capabilities
            .iter()
            .any(|c| c == server_capability::PARAMETERS)
        {
            self.capabilities.push(Capability::SetParameters);
        }
        self.server = Some(info);

        if self.capabilities.contains(&Capability::Publish) {
            self.setup_publishers(link);
        }
    }

    fn handle_status(&mut self, level: StatusLevel, message: String) {
        let severity = match level {
            StatusLevel::Info => {
                info!(status = %message, "server status");
                Severity::Info
            }
            StatusLevel::Warning => {
                warn!(status = %message, "server status");
                Severity::Warn
            }
            StatusLevel::Error => {
                warn!(status = %message, "server status");
                Severity::Error
            }
        };
        self.problems
            .insert(message.clone(), Problem::new(severity, message));
    }

    fn handle_advertise(&mut self, channels: Vec<ChannelInfo>, link: &Arc<dyn TransportLink>) {
        self.resolver
            .on_advertise(channels, &self.registry, link.as_ref(), &mut self.problems);
        self.has_topics = true;
        self.sync_topic_stats();
    }

    fn handle_unadvertise(&mut self, ids: Vec<ChannelId>, link: &Arc<dyn TransportLink>) {
        self.resolver
            .on_unadvertise(ids, link.as_ref(), &mut self.problems);
        self.has_topics = true;
        self.sync_topic_stats();
    }

    fn handle_message(&mut self, subscription_id: SubscriptionId, timestamp: Time, payload: Vec<u8>) {
        let channel = match self.resolver.lookup(subscription_id) {
            Lookup::Resolved(channel) => channel,
            Lookup::RecentlyCanceled => return,
            Lookup::Unknown => {
                self.problems.insert(
                    format!("message-missing-subscription:{subscription_id}"),
                    Problem::warn(format!(
                        "Received message on unknown subscription id: {subscription_id}. \
                         This might be a server bug."
                    )),
                );
                return;
            }
        };

        let message = match channel.decoder.decode(&payload) {
            Ok(message) => message,
            Err(error) => {
                self.problems.insert(
                    format!("message:{}", channel.channel.topic),
                    Problem::error(format!(
                        "Failed to decode message on {}",
                        channel.channel.topic
                    ))
                    .with_cause(format!("{error:#}")),
                );
                return;
            }
        };

        self.ingest.ingest(
            crate::types::MessageEvent {
                topic: channel.channel.topic.clone(),
                receive_time: timestamp,
                message,
                size_in_bytes: payload.len(),
                schema_name: channel.channel.schema_name.clone(),
            },
            &mut self.problems,
        );
    }

    fn handle_disconnect(&mut self, cause: Option<String>) {
        self.presence = Presence::Reconnecting;
        self.link = None;
        self.resolver.on_disconnect();
        let mut problem = Problem::error("Connection failed").with_tip(format!(
            "Check that the server at {} is reachable",
            self.config.name
        ));
        if let Some(cause) = cause {
            problem = problem.with_cause(cause);
        }
        self.problems.insert("connection-failed", problem);
    }

    /// Forget data tied to the previous server session so nothing leaks
    /// across an identity swap.
    fn reset_session_state(&mut self) {
        self.ingest.reset();
        self.problems.clear();
    }

    fn sync_topic_stats(&mut self) {
        let advertised: HashSet<String> = self
            .resolver
            .advertised_topics()
            .into_iter()
            .map(|t| t.name)
            .collect();
        self.ingest.retain_topic_stats(&advertised);
    }

    fn setup_publishers(&mut self, link: &Arc<dyn TransportLink>) {
        if self.unresolved_publications.is_empty() {
            return;
        }
        self.problems.remove_matching(|key| key.starts_with("pub:"));
        let pending = std::mem::take(&mut self.unresolved_publications);
        for publication in pending {
            self.advertise_channel(publication, link);
        }
    }

    fn advertise_channel(&mut self, publication: AdvertiseOptions, link: &Arc<dyn TransportLink>) {
        let supported = self
            .server
            .as_ref()
            .map(|s| s.supported_encodings.clone())
            .unwrap_or_default();
        let encoding = if supported.is_empty() {
            "json".to_string()
        } else {
            match supported.iter().find(|e| e.as_str() == "json") {
                Some(encoding) => encoding.clone(),
                None => {
                    self.problems.insert(
                        format!("pub:encoding:{}", publication.topic),
                        Problem::warn(format!(
                            "Cannot advertise topic '{}': server supports none of the \
                             client publication encodings",
                            publication.topic
                        )),
                    );
                    return;
                }
            }
        };

        let channel_id =
            link.advertise(&publication.topic, &encoding, &publication.schema_name);
        self.problems
            .remove(&format!("pub:encoding:{}", publication.topic));
        self.publications_by_topic.insert(
            publication.topic.clone(),
            ClientPublication { channel_id, options: publication },
        );
    }

    fn unadvertise_channel(&mut self, topic: &str, link: &Arc<dyn TransportLink>) {
        if let Some(publication) = self.publications_by_topic.remove(topic) {
            link.unadvertise(publication.channel_id);
            self.problems.remove(&format!("pub:encoding:{topic}"));
        }
    }

    fn build_state(&mut self) -> PlayerState {
        let active_data = self.has_topics.then(|| ActiveData {
            messages: self.ingest.take_frame(),
            total_bytes_received: self.ingest.total_bytes(),
            start_time: self.ingest.start_time(),
            current_time: self.ingest.current_time(),
            end_time: self.ingest.end_time(),
            is_playing: true,
            speed: 1.0,
            last_seek_time: self.ingest.seek_count(),
            topics: self.resolver.advertised_topics(),
            topic_stats: self.ingest.topic_stats().clone(),
        });
        PlayerState {
            presence: self.presence,
            name: Some(self.name.clone()),
            player_id: self.id.clone(),
            capabilities: self.capabilities.clone(),
            progress: Progress::default(),
            problems: self.problems.to_vec(),
            active_data,
        }
    }
}

/// Player for live, protocol-driven sources.
///
/// The server's dynamic channel set is resolved into transport
/// subscriptions, stream discontinuities are detected per message, and the
/// connection is retried indefinitely until [`Player::close`] is called.
pub struct SocketPlayer {
    core: Arc<Mutex<PlayerCore>>,
    emit: Arc<Notify>,
    cancel: CancellationToken,
    listener_installed: bool,
}

impl SocketPlayer {
    /// Create the player and start connecting immediately.
    pub fn new(
        connector: impl Connector,
        config: SocketPlayerConfig,
        registry: DecoderRegistry,
    ) -> Self {
        let core = Arc::new(Mutex::new(PlayerCore::new(config.clone(), registry)));
        let emit = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        tokio::spawn(connection_task(
            Arc::clone(&core),
            Arc::clone(&emit),
            cancel.clone(),
            Arc::new(connector),
            config,
        ));

        SocketPlayer { core, emit, cancel, listener_installed: false }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PlayerCore> {
        self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn require_capability(&self, capability: Capability) -> Result<Arc<dyn TransportLink>> {
        let core = self.lock();
        if !core.capabilities.contains(&capability) {
            return Err(PipelineError::unsupported(capability));
        }
        core.link.clone().ok_or(PipelineError::NotConnected)
    }
}

impl Player for SocketPlayer {
    fn set_listener(&mut self, listener: Box<dyn PlayerStateListener>) {
        assert!(
            !self.listener_installed,
            "SocketPlayer::set_listener called twice; a player emits to exactly one listener"
        );
        self.listener_installed = true;
        tokio::spawn(emit_task(
            Arc::clone(&self.core),
            Arc::clone(&self.emit),
            self.cancel.clone(),
            listener,
        ));
        self.emit.notify_one();
    }

    fn close(&self) {
        let link = {
            let mut core = self.lock();
            core.closed = true;
            core.link.take()
        };
        if let Some(link) = link {
            link.close();
        }
        self.cancel.cancel();
    }

    fn set_subscriptions(&self, subscriptions: Vec<SubscribePayload>) {
        let topics: BTreeSet<String> =
            subscriptions.into_iter().map(|payload| payload.topic).collect();
        {
            let mut core = self.lock();
            if core.closed {
                return;
            }
            let link = core.link.clone();
            let removed = core
                .resolver
                .set_subscriptions(topics, link.as_deref());
            core.ingest.drop_topic_stats(&removed);
        }
        self.emit.notify_one();
    }

    fn set_publishers(&self, publishers: Vec<AdvertiseOptions>) {
        let mut unique: Vec<AdvertiseOptions> = Vec::new();
        for publisher in publishers {
            if !unique.contains(&publisher) {
                unique.push(publisher);
            }
        }

        {
            let mut core = self.lock();
            let link = core.link.clone();
            let publishable =
                core.capabilities.contains(&Capability::Publish) && !core.closed;
            match (link, publishable) {
                (Some(link), true) => {
                    let removed: Vec<String> = core
                        .publications_by_topic
                        .values()
                        .filter(|p| !unique.contains(&p.options))
                        .map(|p| p.options.topic.clone())
                        .collect();
                    for topic in removed {
                        core.unadvertise_channel(&topic, &link);
                    }
                    let added: Vec<AdvertiseOptions> = unique
                        .into_iter()
                        .filter(|options| {
                            !core
                                .publications_by_topic
                                .values()
                                .any(|p| &p.options == options)
                        })
                        .collect();
                    for options in added {
                        core.advertise_channel(options, &link);
                    }
                }
                _ => {
                    // Remembered until the server grants the capability.
                    core.unresolved_publications = unique;
                }
            }
        }
        self.emit.notify_one();
    }

    fn set_parameter(&self, key: String, value: serde_json::Value) -> Result<()> {
        let link = self.require_capability(Capability::SetParameters)?;
        debug!(key = %key, "setting remote parameter");
        link.set_parameter(&key, &value);
        Ok(())
    }

    fn publish(&self, payload: PublishPayload) -> Result<()> {
        let link = self.require_capability(Capability::Publish)?;
        let core = self.lock();
        let publication = core
            .publications_by_topic
            .get(&payload.topic)
            .ok_or_else(|| PipelineError::UnknownPublication { topic: payload.topic.clone() })?;
        let bytes = serde_json::to_vec(&payload.msg).map_err(|e| {
            PipelineError::UnsupportedEncoding {
                topic: payload.topic.clone(),
                encoding: e.to_string(),
            }
        })?;
        link.publish(publication.channel_id, bytes);
        Ok(())
    }

    fn start_playback(&self) -> Result<()> {
        Err(PipelineError::unsupported(Capability::PlaybackControl))
    }

    fn pause_playback(&self) -> Result<()> {
        Err(PipelineError::unsupported(Capability::PlaybackControl))
    }

    fn seek_playback(&self, _time: Time) -> Result<()> {
        Err(PipelineError::unsupported(Capability::PlaybackControl))
    }

    fn set_playback_speed(&self, _fraction: f64) -> Result<()> {
        Err(PipelineError::unsupported(Capability::SetSpeed))
    }

    fn request_backfill(&self) {
        // Live sources have no backfill; new subscriptions deliver from the
        // next message onward.
    }

    fn set_global_variables(&self, _vars: Arc<GlobalVariables>) {
        // Socket sources have no use for global variables.
    }
}

impl Drop for SocketPlayer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Dial, run, and re-dial the transport until the player closes.
async fn connection_task(
    core: Arc<Mutex<PlayerCore>>,
    emit: Arc<Notify>,
    cancel: CancellationToken,
    connector: Arc<dyn Connector>,
    config: SocketPlayerConfig,
) {
    loop {
        {
            let mut locked = lock_core(&core);
            if locked.closed {
                break;
            }
            locked.presence = Presence::Initializing;
        }
        emit.notify_one();

        let attempt = tokio::time::timeout(config.connect_timeout(), connector.connect());
        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = attempt => outcome,
        };

        let cause = match outcome {
            Ok(Ok(mut connection)) => {
                lock_core(&core).link = Some(Arc::clone(&connection.link));
                run_connection(&core, &emit, &cancel, &mut connection).await;
                None
            }
            Ok(Err(error)) => {
                warn!(error = %error, "connection attempt failed");
                Some(error.to_string())
            }
            Err(_) => {
                warn!(timeout = ?config.connect_timeout(), "connection attempt timed out");
                Some("connection attempt timed out".to_string())
            }
        };

        if cancel.is_cancelled() {
            break;
        }
        {
            let mut locked = lock_core(&core);
            if locked.closed {
                break;
            }
            locked.handle_disconnect(cause);
        }
        emit.notify_one();

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.reconnect_delay()) => {}
        }
    }
    debug!("connection task ended");
}

/// Process events from one established connection until it closes.
async fn run_connection(
    core: &Arc<Mutex<PlayerCore>>,
    emit: &Arc<Notify>,
    cancel: &CancellationToken,
    connection: &mut TransportConnection,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            event = connection.events.recv() => event,
        };
        // A dropped event stream is equivalent to a close.
        let Some(event) = event else { return };

        {
            let mut locked = lock_core(core);
            if locked.closed {
                return;
            }
            match event {
                TransportEvent::Open => locked.handle_open(),
                TransportEvent::ServerInfo(info) => {
                    locked.handle_server_info(info, &connection.link)
                }
                TransportEvent::Status { level, message } => {
                    locked.handle_status(level, message)
                }
                TransportEvent::Advertise(channels) => {
                    locked.handle_advertise(channels, &connection.link)
                }
                TransportEvent::Unadvertise(ids) => {
                    locked.handle_unadvertise(ids, &connection.link)
                }
                TransportEvent::Message { subscription_id, timestamp, payload } => {
                    locked.handle_message(subscription_id, timestamp, payload)
                }
                TransportEvent::Close { reason } => {
                    info!(reason = ?reason, "transport closed");
                    return;
                }
            }
        }
        emit.notify_one();
    }
}

/// Deliver state snapshots to the listener, one frame in flight.
///
/// Wakeups coalesce through the notifier: however many events arrived while
/// the previous delivery was pending, the trailing emission drains whatever
/// accumulated.
async fn emit_task(
    core: Arc<Mutex<PlayerCore>>,
    emit: Arc<Notify>,
    cancel: CancellationToken,
    mut listener: Box<dyn PlayerStateListener>,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = emit.notified() => {}
        }
        let state = lock_core(&core).build_state();
        listener.on_state(state).await;
    }
    debug!("emit task ended");
}

fn lock_core(core: &Arc<Mutex<PlayerCore>>) -> std::sync::MutexGuard<'_, PlayerCore> {
    core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

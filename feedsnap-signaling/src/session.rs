//! Stream session manager
//!
//! Drives every feed's subscription against the gateway. One signaling session
//! is opened per [`SessionManager::connect`]; the feed list is fetched on a
//! dedicated handle, then each feed is negotiated on its own handle in its own
//! task so that a slow or failing feed never holds up the others.

use crate::client::JanusClient;
use crate::protocol::{JanusKind, JanusMessage, Jsep, JsepType, StreamingRequest, STREAMING_PLUGIN};
use crate::transport::SignalingConnector;
use async_trait::async_trait;
use dashmap::DashMap;
use feedsnap_core::{
    FeedDescriptor, FeedEvent, FeedId, FeedRegistry, FeedSnapError, FeedState, IceConfiguration,
    JanusConfig, RenderTarget, Result,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Answer produced by the media stack for a gateway offer
pub struct MediaAnswer {
    /// SDP answer to send back with `start`
    pub jsep: Jsep,
    /// Surface the feed will be rendered into, if already known
    pub render_target: Option<Weak<dyn RenderTarget>>,
}

impl MediaAnswer {
    /// Answer without a render target
    pub fn new(jsep: Jsep) -> Self {
        Self {
            jsep,
            render_target: None,
        }
    }

    /// Attach the surface the feed renders into
    pub fn with_render_target(mut self, target: &Arc<dyn RenderTarget>) -> Self {
        self.render_target = Some(Arc::downgrade(target));
        self
    }
}

impl std::fmt::Debug for MediaAnswer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaAnswer")
            .field("jsep", &self.jsep)
            .field("render_target", &self.render_target.is_some())
            .finish()
    }
}

/// The local media stack: turns offers into answers and owns the rendered surfaces
#[async_trait]
pub trait MediaNegotiator: Send + Sync {
    /// Produce an answer for the gateway's offer on `feed`
    async fn answer(
        &self,
        feed: &FeedDescriptor,
        offer: &Jsep,
        ice: &IceConfiguration,
    ) -> Result<MediaAnswer>;

    /// Tear down whatever media state exists for `feed_id`
    async fn release(&self, _feed_id: FeedId) {}
}

/// Timing knobs for the session manager
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// How long to wait for any single signaling reply or offer
    pub transaction_timeout: Duration,
    /// Keepalive period for the gateway session
    pub keepalive_interval: Duration,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            transaction_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(25),
        }
    }
}

impl From<&JanusConfig> for SessionManagerConfig {
    fn from(config: &JanusConfig) -> Self {
        Self {
            transaction_timeout: config.transaction_timeout(),
            ..Self::default()
        }
    }
}

struct ActiveSession {
    client: JanusClient,
    session_id: u64,
    list_handle: u64,
    address: String,
    ice: IceConfiguration,
    feed_handles: DashMap<FeedId, u64>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Flips to `true` once the session is being torn down
    closing: watch::Sender<bool>,
}

impl ActiveSession {
    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }
}

struct ManagerInner {
    registry: FeedRegistry,
    connector: Arc<dyn SignalingConnector>,
    negotiator: Arc<dyn MediaNegotiator>,
    config: SessionManagerConfig,
    active: Mutex<Option<Arc<ActiveSession>>>,
}

/// Owns the signaling session and every feed's subscription lifecycle
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("registry", &self.inner.registry)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl SessionManager {
    /// Create a manager that records feed state in `registry`
    pub fn new(
        registry: FeedRegistry,
        connector: Arc<dyn SignalingConnector>,
        negotiator: Arc<dyn MediaNegotiator>,
        config: SessionManagerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                registry,
                connector,
                negotiator,
                config,
                active: Mutex::new(None),
            }),
        }
    }

    /// Registry this manager writes to
    pub fn registry(&self) -> &FeedRegistry {
        &self.inner.registry
    }

    /// Ids of all feeds of the current session, in discovery order
    pub fn feed_ids(&self) -> Vec<FeedId> {
        self.inner.registry.ids()
    }

    /// Whether a signaling session is open
    pub fn is_connected(&self) -> bool {
        self.current_session()
            .map_or(false, |session| !session.client.is_closed())
    }

    fn current_session(&self) -> Option<Arc<ActiveSession>> {
        self.inner.active.lock().clone()
    }

    /// Apply `event` only while `session` is still the open one
    ///
    /// Returns `Ok(None)` when the session was closed or replaced, leaving
    /// the registry untouched.
    fn apply_if_current(
        &self,
        session: &Arc<ActiveSession>,
        feed_id: FeedId,
        event: FeedEvent,
    ) -> Result<Option<FeedState>> {
        let active = self.inner.active.lock();
        match active.as_ref() {
            Some(current) if Arc::ptr_eq(current, session) => {
                self.inner.registry.apply(feed_id, event).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Open a signaling session, list the feeds and start subscribing to all of them
    ///
    /// Resolves as soon as the list is known; each feed's negotiation carries
    /// on in the background and is observable through the registry.
    pub async fn connect(
        &self,
        address: &str,
        ice: IceConfiguration,
    ) -> Result<Vec<FeedDescriptor>> {
        if self.current_session().is_some() {
            info!("Replacing existing signaling session");
            if let Err(e) = self.disconnect().await {
                warn!("Error while closing previous session: {}", e);
            }
        }

        let link = self.inner.connector.open(address).await?;
        let client = JanusClient::new(link, self.inner.config.transaction_timeout);

        let session_id = client.create_session().await.map_err(|e| match e {
            FeedSnapError::SignalingUnavailable { .. } => e,
            other => FeedSnapError::SignalingUnavailable {
                address: address.to_string(),
                reason: other.to_string(),
            },
        })?;
        debug!("Created signaling session {}", session_id);

        let (list_handle, descriptors) = match Self::open_listing(&client, session_id).await {
            Ok(listing) => listing,
            Err(e) => {
                if let Err(destroy_err) = client.destroy(session_id).await {
                    warn!("Failed to destroy session {}: {}", session_id, destroy_err);
                }
                return Err(e);
            }
        };

        let registry = &self.inner.registry;
        registry.clear();
        for descriptor in &descriptors {
            registry.upsert(descriptor.clone());
        }

        let session = Arc::new(ActiveSession {
            client,
            session_id,
            list_handle,
            address: address.to_string(),
            ice,
            feed_handles: DashMap::new(),
            tasks: Mutex::new(Vec::new()),
            closing: watch::channel(false).0,
        });
        *self.inner.active.lock() = Some(session.clone());

        session.track(self.spawn_keepalive(&session));
        session.track(self.spawn_watchdog(&session));
        for descriptor in &descriptors {
            session.track(self.spawn_subscribe(descriptor.id));
        }

        info!(
            "Connected to {} with {} feeds",
            session.address,
            descriptors.len()
        );
        Ok(descriptors)
    }

    async fn open_listing(
        client: &JanusClient,
        session_id: u64,
    ) -> Result<(u64, Vec<FeedDescriptor>)> {
        let list_handle = client.attach(session_id, STREAMING_PLUGIN).await?;
        let descriptors = Self::list_feeds(client, session_id, list_handle).await?;
        Ok((list_handle, descriptors))
    }

    async fn list_feeds(
        client: &JanusClient,
        session_id: u64,
        handle_id: u64,
    ) -> Result<Vec<FeedDescriptor>> {
        let reply = client
            .message(session_id, handle_id, StreamingRequest::List, None)
            .await?;
        Ok(reply
            .stream_list()?
            .into_iter()
            .map(|stream| stream.into_descriptor())
            .collect())
    }

    /// Re-read the feed list from the gateway
    ///
    /// New feeds are registered and subscribed; feeds the gateway no longer
    /// reports are torn down and removed.
    pub async fn refresh(&self) -> Result<Vec<FeedDescriptor>> {
        let session = self.current_session().ok_or(FeedSnapError::NotConnected)?;
        let descriptors =
            Self::list_feeds(&session.client, session.session_id, session.list_handle).await?;

        let reported: HashSet<FeedId> = descriptors.iter().map(|d| d.id).collect();
        for stale in self
            .inner
            .registry
            .ids()
            .into_iter()
            .filter(|id| !reported.contains(id))
        {
            info!("Feed {} no longer reported by the gateway", stale);
            self.inner.registry.remove(stale);
            if let Some((_, handle_id)) = session.feed_handles.remove(&stale) {
                if let Err(e) = session
                    .client
                    .message(session.session_id, handle_id, StreamingRequest::Stop, None)
                    .await
                {
                    debug!("Stop for feed {} not acknowledged: {}", stale, e);
                }
                if let Err(e) = session.client.detach(session.session_id, handle_id).await {
                    warn!("Failed to detach handle {} of feed {}: {}", handle_id, stale, e);
                }
            }
            self.inner.negotiator.release(stale).await;
        }

        for descriptor in &descriptors {
            if self.inner.registry.upsert(descriptor.clone()) {
                session.track(self.spawn_subscribe(descriptor.id));
            }
        }
        Ok(descriptors)
    }

    fn spawn_subscribe(&self, feed_id: FeedId) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.subscribe(feed_id).await {
                warn!("Subscription to feed {} failed: {}", feed_id, e);
            }
        })
    }

    fn spawn_keepalive(&self, session: &Arc<ActiveSession>) -> JoinHandle<()> {
        let weak = Arc::downgrade(session);
        let period = self.inner.config.keepalive_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(session) = weak.upgrade() else { break };
                match session.client.keepalive(session.session_id).await {
                    Ok(()) => debug!("Keepalive sent for session {}", session.session_id),
                    Err(FeedSnapError::NotConnected) => break,
                    Err(e) => warn!("Keepalive failed: {}", e),
                }
            }
        })
    }

    fn spawn_watchdog(&self, session: &Arc<ActiveSession>) -> JoinHandle<()> {
        let mut closed = session.client.closed_signal();
        let session_id = session.session_id;
        let registry = self.inner.registry.clone();
        tokio::spawn(async move {
            if closed.wait_for(|closed| *closed).await.is_err() {
                // Client dropped, which only happens on disconnect
                return;
            }

            error!("Signaling connection for session {} lost", session_id);
            for feed in registry.all() {
                if feed.session.state == FeedState::Watching {
                    if let Err(e) = registry.apply(feed.descriptor.id, FeedEvent::Error) {
                        warn!("Could not fail feed {}: {}", feed.descriptor.id, e);
                    }
                }
            }
        })
    }

    /// Subscribe to a feed
    ///
    /// A no-op when the feed is already Watching or Negotiating. Otherwise the
    /// feed is negotiated from scratch and ends up Watching, or Failed with the
    /// error returned. Failures are not retried.
    pub async fn subscribe(&self, feed_id: FeedId) -> Result<()> {
        let registry = &self.inner.registry;
        let descriptor = registry
            .get(feed_id)
            .ok_or(FeedSnapError::FeedNotFound { feed_id })?
            .descriptor;
        let session = self.current_session().ok_or(FeedSnapError::NotConnected)?;

        match registry.apply(feed_id, FeedEvent::SubscribeIssued) {
            Ok(_) => {}
            Err(FeedSnapError::InvalidTransition {
                from: FeedState::Negotiating | FeedState::Watching,
                ..
            }) => {
                debug!("Feed {} already subscribed", feed_id);
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let mut closing = session.closing.subscribe();
        let outcome = tokio::select! {
            outcome = self.negotiate(&session, &descriptor) => outcome,
            _ = closing.wait_for(|closing| *closing) => {
                debug!("Negotiation for feed {} abandoned with its session", feed_id);
                return Err(FeedSnapError::NotConnected);
            }
        };

        match outcome {
            Ok(events) => {
                if self
                    .apply_if_current(&session, feed_id, FeedEvent::NegotiationSucceeded)?
                    .is_none()
                {
                    return Err(FeedSnapError::NotConnected);
                }
                session.track(self.spawn_feed_monitor(&session, feed_id, events));
                info!("Watching feed {} ({})", feed_id, descriptor.description);
                Ok(())
            }
            Err(e) => {
                error!("Negotiation for feed {} failed: {}", feed_id, e);
                if registry.contains(feed_id) {
                    if let Err(transition_err) =
                        self.apply_if_current(&session, feed_id, FeedEvent::Error)
                    {
                        warn!("Could not fail feed {}: {}", feed_id, transition_err);
                    }
                }
                if let Some((_, handle_id)) = session.feed_handles.remove(&feed_id) {
                    session.client.release_handle(handle_id);
                }
                Err(e)
            }
        }
    }

    /// Run the watch/offer/answer/start exchange, returning the handle's event stream
    async fn negotiate(
        &self,
        session: &Arc<ActiveSession>,
        feed: &FeedDescriptor,
    ) -> Result<mpsc::UnboundedReceiver<JanusMessage>> {
        let client = &session.client;
        let feed_id = feed.id;

        if let Some((_, stale)) = session.feed_handles.remove(&feed_id) {
            debug!("Detaching stale handle {} of feed {}", stale, feed_id);
            if let Err(e) = client.detach(session.session_id, stale).await {
                warn!("Failed to detach stale handle {}: {}", stale, e);
            }
        }

        let handle_id = client.attach(session.session_id, STREAMING_PLUGIN).await?;
        session.feed_handles.insert(feed_id, handle_id);
        let mut events = client.handle_events(handle_id);

        client
            .message(
                session.session_id,
                handle_id,
                StreamingRequest::Watch { id: feed_id },
                None,
            )
            .await?;

        let offer = tokio::time::timeout(
            self.inner.config.transaction_timeout,
            Self::await_offer(feed_id, &mut events),
        )
        .await
        .map_err(|_| FeedSnapError::Negotiation {
            feed_id,
            reason: "no offer received".to_string(),
        })??;

        let answer = self
            .inner
            .negotiator
            .answer(feed, &offer, &session.ice)
            .await
            .map_err(|e| match e {
                FeedSnapError::Negotiation { .. } => e,
                other => FeedSnapError::Negotiation {
                    feed_id,
                    reason: other.to_string(),
                },
            })?;
        if answer.jsep.kind != JsepType::Answer {
            return Err(FeedSnapError::Negotiation {
                feed_id,
                reason: "media stack did not produce an answer".to_string(),
            });
        }
        if let Some(target) = answer.render_target {
            self.inner.registry.bind_weak_render_target(feed_id, target)?;
        }

        client
            .message(
                session.session_id,
                handle_id,
                StreamingRequest::Start,
                Some(answer.jsep),
            )
            .await?;

        Ok(events)
    }

    async fn await_offer(
        feed_id: FeedId,
        events: &mut mpsc::UnboundedReceiver<JanusMessage>,
    ) -> Result<Jsep> {
        while let Some(event) = events.recv().await {
            let event = event.into_result()?;
            match (event.janus, event.jsep) {
                (_, Some(jsep)) if jsep.kind == JsepType::Offer => return Ok(jsep),
                (JanusKind::Hangup | JanusKind::Detached, _) => {
                    return Err(FeedSnapError::Negotiation {
                        feed_id,
                        reason: event.reason.unwrap_or_else(|| "hung up".to_string()),
                    })
                }
                (kind, _) => debug!("Feed {}: {:?} while waiting for offer", feed_id, kind),
            }
        }
        Err(FeedSnapError::NotConnected)
    }

    /// Watch a negotiated feed's handle for hangups and plugin errors
    fn spawn_feed_monitor(
        &self,
        session: &Arc<ActiveSession>,
        feed_id: FeedId,
        mut events: mpsc::UnboundedReceiver<JanusMessage>,
    ) -> JoinHandle<()> {
        let registry = self.inner.registry.clone();
        let mut closing = session.closing.subscribe();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                    _ = closing.wait_for(|closing| *closing) => break,
                };
                let failure = match event.janus {
                    JanusKind::Hangup | JanusKind::Detached => {
                        Some(event.reason.clone().unwrap_or_else(|| "hung up".to_string()))
                    }
                    _ => event.plugin_error().map(|(code, reason)| format!("{} ({})", reason, code)),
                };
                match failure {
                    Some(reason) => {
                        if registry.state(feed_id) == Some(FeedState::Watching) {
                            error!("Feed {} failed: {}", feed_id, reason);
                            if let Err(e) = registry.apply(feed_id, FeedEvent::Error) {
                                warn!("Could not fail feed {}: {}", feed_id, e);
                            }
                        } else {
                            warn!("Feed {} reported {} while not watching", feed_id, reason);
                        }
                    }
                    None => debug!(
                        "Feed {}: {:?} {:?}",
                        feed_id,
                        event.janus,
                        event.streaming_status()
                    ),
                }
            }
        })
    }

    /// Pause a Watching feed on the gateway (Watching -> Disabled)
    pub async fn pause(&self, feed_id: FeedId) -> Result<()> {
        self.toggle_media(feed_id, FeedEvent::Paused, StreamingRequest::Pause)
            .await
    }

    /// Resume a paused feed (Disabled -> Watching)
    pub async fn resume(&self, feed_id: FeedId) -> Result<()> {
        self.toggle_media(feed_id, FeedEvent::Resumed, StreamingRequest::Start)
            .await
    }

    async fn toggle_media(
        &self,
        feed_id: FeedId,
        event: FeedEvent,
        request: StreamingRequest,
    ) -> Result<()> {
        let registry = &self.inner.registry;
        let current = registry
            .state(feed_id)
            .ok_or(FeedSnapError::FeedNotFound { feed_id })?;
        if current.on_event(event).is_none() {
            warn!("Feed {}: {:?} not allowed while {}", feed_id, event, current);
            return Err(FeedSnapError::InvalidTransition {
                feed_id,
                from: current,
                to: event.target(),
            });
        }

        let session = self.current_session().ok_or(FeedSnapError::NotConnected)?;
        let handle_id = session
            .feed_handles
            .get(&feed_id)
            .map(|handle| *handle)
            .ok_or(FeedSnapError::FeedNotFound { feed_id })?;

        session
            .client
            .message(session.session_id, handle_id, request, None)
            .await?;
        self.apply_if_current(&session, feed_id, event)?
            .ok_or(FeedSnapError::NotConnected)?;
        Ok(())
    }

    /// Close the signaling session and forget every feed
    ///
    /// In-flight negotiations are abandoned. Afterwards every previously known
    /// feed id is unknown to the registry.
    pub async fn disconnect(&self) -> Result<()> {
        let session = self.inner.active.lock().take();
        let feeds = self.inner.registry.ids();

        let Some(session) = session else {
            self.inner.registry.clear();
            debug!("Disconnect requested with no open session");
            return Ok(());
        };

        session.closing.send_replace(true);
        for task in session.tasks.lock().drain(..) {
            task.abort();
        }

        let outcome = match session.client.destroy(session.session_id).await {
            Ok(()) | Err(FeedSnapError::NotConnected) => Ok(()),
            Err(e) => {
                warn!("Failed to destroy session {}: {}", session.session_id, e);
                Err(e)
            }
        };

        self.inner.registry.clear();
        for feed_id in feeds {
            self.inner.negotiator.release(feed_id).await;
        }

        info!("Disconnected from {}", session.address);
        outcome
    }
}

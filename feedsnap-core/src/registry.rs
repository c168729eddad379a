//! Feed registry
//!
//! The single piece of shared mutable state in feedsnap. Holds one
//! [`FeedSession`] per known [`FeedDescriptor`] and enforces the lifecycle
//! table from [`FeedState::can_transition_to`]. The lock is never held across
//! an `.await`, so every read here is an atomic snapshot.

use crate::error::{FeedSnapError, Result};
use crate::feed::{FeedDescriptor, FeedEvent, FeedId, FeedState};
use crate::frame::RenderTarget;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Per-feed subscription state
#[derive(Debug, Clone)]
pub struct FeedSession {
    /// Feed this session belongs to
    pub feed_id: FeedId,
    /// Lifecycle state
    pub state: FeedState,
    /// Capture and render eligibility, independent of `state`
    pub enabled: bool,
    render_target: Option<Weak<dyn RenderTarget>>,
}

impl FeedSession {
    fn new(feed_id: FeedId) -> Self {
        Self {
            feed_id,
            state: FeedState::Idle,
            enabled: true,
            render_target: None,
        }
    }

    /// Upgrade the render target reference, if the surface is still alive
    pub fn render_target(&self) -> Option<Arc<dyn RenderTarget>> {
        self.render_target.as_ref().and_then(Weak::upgrade)
    }

    /// Whether the feed takes part in "all active" captures
    pub fn is_active(&self) -> bool {
        self.state == FeedState::Watching && self.enabled
    }
}

/// A descriptor together with its session, as returned by lookups
#[derive(Debug, Clone)]
pub struct RegisteredFeed {
    /// Immutable descriptor
    pub descriptor: FeedDescriptor,
    /// Session state at the time of the lookup
    pub session: FeedSession,
}

struct Entry {
    descriptor: FeedDescriptor,
    session: FeedSession,
    state_tx: watch::Sender<FeedState>,
}

#[derive(Default)]
struct RegistryInner {
    order: Vec<FeedId>,
    feeds: HashMap<FeedId, Entry>,
}

/// Shared handle to the feed registry
#[derive(Clone, Default)]
pub struct FeedRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl std::fmt::Debug for FeedRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("FeedRegistry")
            .field("feeds", &inner.order)
            .finish()
    }
}

impl FeedRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a descriptor
    ///
    /// A session in `Idle` with `enabled = true` is created when the feed is
    /// new; an existing session is left untouched. Returns `true` if the feed
    /// was not known before.
    pub fn upsert(&self, descriptor: FeedDescriptor) -> bool {
        let mut inner = self.inner.write();
        let id = descriptor.id;

        if let Some(entry) = inner.feeds.get_mut(&id) {
            entry.descriptor = descriptor;
            return false;
        }

        let (state_tx, _) = watch::channel(FeedState::Idle);
        inner.feeds.insert(
            id,
            Entry {
                descriptor,
                session: FeedSession::new(id),
                state_tx,
            },
        );
        inner.order.push(id);
        debug!("Registered feed {}", id);
        true
    }

    /// Look up a feed
    pub fn get(&self, id: FeedId) -> Option<RegisteredFeed> {
        self.inner.read().feeds.get(&id).map(|entry| RegisteredFeed {
            descriptor: entry.descriptor.clone(),
            session: entry.session.clone(),
        })
    }

    /// Whether the feed is known
    pub fn contains(&self, id: FeedId) -> bool {
        self.inner.read().feeds.contains_key(&id)
    }

    /// Current state of a feed
    pub fn state(&self, id: FeedId) -> Option<FeedState> {
        self.inner.read().feeds.get(&id).map(|entry| entry.session.state)
    }

    /// Live render target of a feed, if one is bound and still alive
    pub fn render_target(&self, id: FeedId) -> Option<Arc<dyn RenderTarget>> {
        self.inner
            .read()
            .feeds
            .get(&id)
            .and_then(|entry| entry.session.render_target())
    }

    /// All feeds in discovery order
    pub fn all(&self) -> Vec<RegisteredFeed> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.feeds.get(id))
            .map(|entry| RegisteredFeed {
                descriptor: entry.descriptor.clone(),
                session: entry.session.clone(),
            })
            .collect()
    }

    /// Ids of every known feed in discovery order
    pub fn ids(&self) -> Vec<FeedId> {
        self.inner.read().order.clone()
    }

    /// Ids of feeds that are Watching and enabled, in discovery order
    pub fn active_ids(&self) -> Vec<FeedId> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter(|id| {
                inner
                    .feeds
                    .get(id)
                    .map_or(false, |entry| entry.session.is_active())
            })
            .copied()
            .collect()
    }

    /// Number of known feeds
    pub fn len(&self) -> usize {
        self.inner.read().feeds.len()
    }

    /// Whether no feeds are known
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Toggle capture/render eligibility without touching `state`
    pub fn set_enabled(&self, id: FeedId, enabled: bool) -> Result<()> {
        let mut inner = self.inner.write();
        let entry = inner
            .feeds
            .get_mut(&id)
            .ok_or(FeedSnapError::FeedNotFound { feed_id: id })?;
        entry.session.enabled = enabled;
        debug!("Feed {} enabled={}", id, enabled);
        Ok(())
    }

    /// Move a feed to `next`, returning the previous state
    pub fn transition(&self, id: FeedId, next: FeedState) -> Result<FeedState> {
        let mut inner = self.inner.write();
        let entry = inner
            .feeds
            .get_mut(&id)
            .ok_or(FeedSnapError::FeedNotFound { feed_id: id })?;

        let current = entry.session.state;
        if !current.can_transition_to(next) {
            warn!("Rejected transition for feed {}: {} -> {}", id, current, next);
            return Err(FeedSnapError::InvalidTransition {
                feed_id: id,
                from: current,
                to: next,
            });
        }

        entry.session.state = next;
        entry.state_tx.send_replace(next);
        debug!("Feed {}: {} -> {}", id, current, next);
        Ok(current)
    }

    /// Apply a lifecycle event, returning the state it led to
    ///
    /// Fails with `InvalidTransition` when the event has no edge out of the
    /// feed's current state.
    pub fn apply(&self, id: FeedId, event: FeedEvent) -> Result<FeedState> {
        let mut inner = self.inner.write();
        let entry = inner
            .feeds
            .get_mut(&id)
            .ok_or(FeedSnapError::FeedNotFound { feed_id: id })?;

        let current = entry.session.state;
        let next = current.on_event(event).ok_or_else(|| {
            warn!("Feed {}: {:?} not allowed while {}", id, event, current);
            FeedSnapError::InvalidTransition {
                feed_id: id,
                from: current,
                to: event.target(),
            }
        })?;

        entry.session.state = next;
        entry.state_tx.send_replace(next);
        debug!("Feed {}: {} -> {} ({:?})", id, current, next, event);
        Ok(next)
    }

    /// Bind the surface a feed is rendered into
    ///
    /// Only a weak reference is kept.
    pub fn bind_render_target(&self, id: FeedId, target: &Arc<dyn RenderTarget>) -> Result<()> {
        let mut inner = self.inner.write();
        let entry = inner
            .feeds
            .get_mut(&id)
            .ok_or(FeedSnapError::FeedNotFound { feed_id: id })?;
        entry.session.render_target = Some(Arc::downgrade(target));
        Ok(())
    }

    /// Bind an already-downgraded surface reference
    pub fn bind_weak_render_target(&self, id: FeedId, target: Weak<dyn RenderTarget>) -> Result<()> {
        let mut inner = self.inner.write();
        let entry = inner
            .feeds
            .get_mut(&id)
            .ok_or(FeedSnapError::FeedNotFound { feed_id: id })?;
        entry.session.render_target = Some(target);
        Ok(())
    }

    /// Subscribe to a feed's state changes
    ///
    /// The receiver reports closure once the feed is removed or the registry
    /// is cleared.
    pub fn watch_state(&self, id: FeedId) -> Option<watch::Receiver<FeedState>> {
        self.inner
            .read()
            .feeds
            .get(&id)
            .map(|entry| entry.state_tx.subscribe())
    }

    /// Wait until a feed's state satisfies `predicate`
    ///
    /// Fails with `FeedNotFound` if the feed is unknown or disappears while
    /// waiting.
    pub async fn wait_for_state<F>(&self, id: FeedId, mut predicate: F) -> Result<FeedState>
    where
        F: FnMut(FeedState) -> bool,
    {
        let mut rx = self
            .watch_state(id)
            .ok_or(FeedSnapError::FeedNotFound { feed_id: id })?;
        let state = rx
            .wait_for(|state| predicate(*state))
            .await
            .map_err(|_| FeedSnapError::FeedNotFound { feed_id: id })?;
        Ok(*state)
    }

    /// Remove a single feed
    pub fn remove(&self, id: FeedId) -> Option<FeedDescriptor> {
        let mut inner = self.inner.write();
        let entry = inner.feeds.remove(&id)?;
        inner.order.retain(|known| *known != id);
        debug!("Removed feed {}", id);
        Some(entry.descriptor)
    }

    /// Remove every feed
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        let count = inner.feeds.len();
        inner.feeds.clear();
        inner.order.clear();
        debug!("Cleared {} feeds", count);
    }
}

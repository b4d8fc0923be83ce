use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::awareness::{
    update_local, AwarenessChannel, AwarenessEvent, CursorRange, PeerRecord, PeerSlot,
};
use super::document::DocumentHandle;
use super::identity::{resolve_identity, IdentityCache, LocalIdentity, UserProfile};
use super::lifecycle::Lifecycle;
use super::liveness::{HostEvent, LivenessStats, RebroadcastController};
use super::projector::{project, Decoration, DecorationSet, RenderSurface};
use super::PresenceConfig;

/// Every task a session spawned, released together.
#[derive(Default)]
pub struct Subscriptions {
    tasks: Vec<JoinHandle<()>>,
}

impl Subscriptions {
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(task));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn dispose(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        self.dispose();
    }
}

pub struct SessionOptions {
    pub doc_id: String,
    pub profile: UserProfile,
    pub channel: Arc<dyn AwarenessChannel>,
    pub document: DocumentHandle,
    pub surface: Arc<dyn RenderSurface>,
    pub host_events: mpsc::Receiver<HostEvent>,
    pub config: PresenceConfig,
    /// Reuse identities across sessions of the same document view.
    pub identities: Option<IdentityCache>,
}

/// Presence for one open document.
///
/// Owns the awareness subscriptions and timers. `dispose` (or dropping the
/// session) clears the local record and releases all of them; a task still
/// running on another worker can no longer write once `dispose` returns.
pub struct PresenceSession {
    doc_id: String,
    identity: LocalIdentity,
    channel: Arc<dyn AwarenessChannel>,
    document: DocumentHandle,
    subscriptions: Subscriptions,
    lifecycle: Arc<Lifecycle>,
    stats: Arc<LivenessStats>,
}

impl PresenceSession {
    /// Resolve the identity, publish it and start projecting and rebroadcasting.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(options: SessionOptions) -> Self {
        let SessionOptions {
            doc_id,
            profile,
            channel,
            document,
            surface,
            host_events,
            config,
            identities,
        } = options;

        let local_slot = channel.local_slot();
        let states = channel.states();
        let peers = states
            .iter()
            .filter(|(slot, _)| **slot != local_slot)
            .map(|(_, record)| record);
        let identity = match &identities {
            Some(cache) => cache.get_or_resolve(&doc_id, &profile, peers),
            None => resolve_identity(&profile, peers),
        };
        update_local(&*channel, |record| record.user = Some(identity.as_peer_user()));

        let lifecycle = Lifecycle::new();
        let mut subscriptions = Subscriptions::default();

        let events = channel.subscribe();
        subscriptions.spawn(project_loop(
            channel.clone(),
            document.clone(),
            surface,
            events,
            lifecycle.clone(),
        ));

        let controller = RebroadcastController::new(channel.clone(), config, lifecycle.clone());
        let stats = controller.stats();
        subscriptions.spawn(controller.run(host_events));

        info!(
            "Presence session started for document {} as {} on slot {}",
            doc_id, identity.display_name, local_slot
        );
        Self {
            doc_id,
            identity,
            channel,
            document,
            subscriptions,
            lifecycle,
            stats,
        }
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    pub fn local_slot(&self) -> PeerSlot {
        self.channel.local_slot()
    }

    pub fn stats(&self) -> &LivenessStats {
        &self.stats
    }

    pub fn is_disposed(&self) -> bool {
        self.lifecycle.is_disposed()
    }

    /// Publish the local selection, clamped to the document.
    pub fn set_selection(&self, anchor: usize, head: usize) {
        let cursor = self.document.clamp(CursorRange::new(anchor, head));
        self.lifecycle
            .while_live(|| update_local(&*self.channel, |record| record.cursor = Some(cursor)));
    }

    pub fn clear_selection(&self) {
        self.lifecycle
            .while_live(|| update_local(&*self.channel, |record| record.cursor = None));
    }

    /// Records of every other peer currently visible.
    pub fn peers(&self) -> Vec<(PeerSlot, PeerRecord)> {
        let local = self.channel.local_slot();
        self.channel
            .states()
            .into_iter()
            .filter(|(slot, _)| *slot != local)
            .collect()
    }

    /// Project the current snapshot on demand.
    pub fn decorations(&self) -> Vec<Decoration> {
        project(
            &self.channel.states(),
            self.channel.local_slot(),
            self.document.len(),
        )
    }

    /// Remove the local record and release every subscription. Idempotent.
    pub fn dispose(&mut self) {
        let channel = &*self.channel;
        if !self.lifecycle.dispose(|| channel.clear()) {
            return;
        }
        self.subscriptions.dispose();
        info!("Presence session for document {} disposed", self.doc_id);
    }
}

impl Drop for PresenceSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn render(
    channel: &dyn AwarenessChannel,
    document: &DocumentHandle,
    surface: &dyn RenderSurface,
    lifecycle: &Lifecycle,
) {
    lifecycle.while_live(|| {
        let decorations = project(&channel.states(), channel.local_slot(), document.len());
        surface.apply(DecorationSet::new(decorations));
    });
}

async fn project_loop(
    channel: Arc<dyn AwarenessChannel>,
    document: DocumentHandle,
    surface: Arc<dyn RenderSurface>,
    mut events: broadcast::Receiver<AwarenessEvent>,
    lifecycle: Arc<Lifecycle>,
) {
    render(&*channel, &document, &*surface, &lifecycle);
    loop {
        match events.recv().await {
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => debug!("Projection skipped {} events", skipped),
            Err(RecvError::Closed) => break,
        }
        if lifecycle.is_disposed() {
            break;
        }
        render(&*channel, &document, &*surface, &lifecycle);
    }
}

//! In-process transport: one [`LocalBus`] per origin, one [`TabChannel`] per tab.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use pulse_config::ChannelConfig;
use pulse_core::MessageKind;
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::message::BroadcastMessage;
use crate::subscription::Subscription;
use crate::{Broadcaster, Listener};

/// Encoded frame plus the tab that sent it.
#[derive(Debug, Clone)]
struct Envelope {
    origin: u64,
    frame: Arc<str>,
}

/// Shared medium for every tab of one application origin.
///
/// Cloning is cheap; all clones publish to the same subscribers.
#[derive(Clone)]
pub struct LocalBus {
    name: Arc<str>,
    enabled: bool,
    sender: broadcast::Sender<Envelope>,
    next_tab: Arc<AtomicU64>,
}

impl std::fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBus")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("subscriber_count", &self.sender.receiver_count())
            .finish_non_exhaustive()
    }
}

impl LocalBus {
    #[must_use]
    pub fn new(config: &ChannelConfig) -> Self {
        let (sender, _rx) = broadcast::channel(config.capacity.max(1));
        Self {
            name: Arc::from(config.name.as_str()),
            enabled: config.enabled,
            sender,
            next_tab: Arc::new(AtomicU64::new(1)),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attach a new tab. Messages a tab publishes are not echoed back to it.
    #[must_use]
    pub fn open_tab(&self) -> TabChannel {
        TabChannel {
            tab_id: self.next_tab.fetch_add(1, Ordering::Relaxed),
            bus: self.clone(),
        }
    }

    /// Broadcaster for a new tab, or [`NullChannel`] when the channel is
    /// disabled and every tab runs alone.
    #[must_use]
    pub fn tab_broadcaster(&self) -> Arc<dyn Broadcaster> {
        if self.enabled {
            Arc::new(self.open_tab())
        } else {
            tracing::debug!(channel = %self.name, "channel disabled; tab runs in single-tab mode");
            Arc::new(NullChannel)
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn send(&self, envelope: Envelope) {
        match self.sender.send(envelope) {
            Ok(count) => tracing::trace!(channel = %self.name, count, "broadcast delivered"),
            Err(_) => tracing::debug!(channel = %self.name, "no subscribers for broadcast"),
        }
    }
}

/// One tab's endpoint on a [`LocalBus`].
#[derive(Debug, Clone)]
pub struct TabChannel {
    tab_id: u64,
    bus: LocalBus,
}

impl TabChannel {
    #[must_use]
    pub const fn tab_id(&self) -> u64 {
        self.tab_id
    }
}

impl Broadcaster for TabChannel {
    fn publish(&self, kind: MessageKind, payload: serde_json::Value) {
        let message = BroadcastMessage::new(kind, payload);
        match message.encode() {
            Ok(frame) => self.bus.send(Envelope {
                origin: self.tab_id,
                frame: Arc::from(frame),
            }),
            Err(error) => tracing::warn!(%error, %kind, "dropping unencodable broadcast"),
        }
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        // Register before returning so nothing published after this call is missed.
        let receiver = self.bus.sender.subscribe();
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(
                channel = %self.bus.name,
                "no async runtime; cross-tab channel unavailable, running single-tab"
            );
            return Subscription::inert();
        };
        let task = runtime.spawn(pump(receiver, self.tab_id, listener));
        Subscription::from_task(task)
    }
}

async fn pump(mut receiver: broadcast::Receiver<Envelope>, tab_id: u64, listener: Listener) {
    loop {
        match receiver.recv().await {
            Ok(envelope) => {
                if envelope.origin == tab_id {
                    continue;
                }
                match BroadcastMessage::decode(&envelope.frame) {
                    Ok(message) => dispatch(&listener, &message, tab_id),
                    Err(error) => tracing::warn!(tab_id, %error, "ignoring malformed broadcast"),
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(tab_id, skipped, "broadcast receiver lagged; messages dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn dispatch(listener: &Listener, message: &BroadcastMessage, tab_id: u64) {
    if catch_unwind(AssertUnwindSafe(|| listener(message))).is_err() {
        tracing::warn!(tab_id, kind = %message.kind, "broadcast listener panicked");
    }
}

/// Broadcaster for single-tab mode: publishes go nowhere, subscriptions are inert.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullChannel;

impl Broadcaster for NullChannel {
    fn publish(&self, kind: MessageKind, _payload: serde_json::Value) {
        tracing::trace!(%kind, "single-tab mode; broadcast skipped");
    }

    fn subscribe(&self, _listener: Listener) -> Subscription {
        Subscription::inert()
    }
}

//! # pulse-channel
//!
//! Best-effort publish/subscribe between the tabs of one application origin.
//!
//! - [`BroadcastMessage`]: the `{type, data, timestamp}` wire record
//! - [`Broadcaster`]: the seam the identity engine depends on
//! - [`LocalBus`] / [`TabChannel`]: in-process transport on `tokio::sync::broadcast`
//! - [`NullChannel`]: single-tab mode when the channel is disabled or unavailable
//!
//! Delivery is at-most-once to tabs subscribed at send time. Nothing here is
//! authoritative; receivers treat every message as a hint.

mod bus;
mod error;
mod message;
mod subscription;

pub use bus::{LocalBus, NullChannel, TabChannel};
pub use error::ChannelError;
pub use message::BroadcastMessage;
pub use subscription::Subscription;

use std::sync::Arc;

use pulse_core::MessageKind;

/// Callback invoked for every message delivered to a subscriber.
pub type Listener = Arc<dyn Fn(&BroadcastMessage) + Send + Sync>;

/// Origin-scoped fan-out used by one tab.
pub trait Broadcaster: Send + Sync {
    /// Fire-and-forget. Encoding failures and a missing audience are logged,
    /// never returned.
    fn publish(&self, kind: MessageKind, payload: serde_json::Value);

    /// Register a listener for messages from sibling tabs. Dropping the
    /// returned [`Subscription`] unsubscribes.
    fn subscribe(&self, listener: Listener) -> Subscription;
}

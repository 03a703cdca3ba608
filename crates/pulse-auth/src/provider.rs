//! Contracts consumed from the identity provider and the profile backend.

use async_trait::async_trait;
use pulse_core::{AuthEvent, Profile, Session, SessionTokens};
use tokio::sync::broadcast;

use crate::error::AuthError;

/// Push event from the identity provider (`onAuthStateChange`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthStateChange {
    pub event: AuthEvent,
    pub session: Option<Session>,
}

impl AuthStateChange {
    #[must_use]
    pub const fn new(event: AuthEvent, session: Option<Session>) -> Self {
        Self { event, session }
    }
}

/// One tab's client of the identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Ground truth for "who is signed in".
    async fn get_session(&self) -> Result<Option<Session>, AuthError>;

    /// Push events raised by this client. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange>;

    /// Activate a session from a token pair.
    async fn set_session(&self, tokens: SessionTokens) -> Result<Session, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    async fn update_password(&self, new_password: &str) -> Result<(), AuthError>;
}

/// Single-row profile lookup keyed by user id.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn fetch_profile(&self, user_id: &str) -> Result<Profile, AuthError>;
}

//! In-process identity provider and profile source.
//!
//! [`InMemoryAuthBackend`] plays the hosted identity service plus the
//! origin-scoped storage its browser SDK shares between tabs. Each
//! [`InMemoryIdentityProvider`] is one tab's SDK client: it sees the shared
//! current session but raises push events only to its own subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use pulse_core::{AuthEvent, Profile, Session, SessionTokens, User};
use tokio::sync::broadcast;

use crate::error::AuthError;
use crate::provider::{AuthStateChange, IdentityProvider, ProfileSource};

const SESSION_TTL_SECS: i64 = 3600;
const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
struct Account {
    user: User,
    password: String,
}

#[derive(Debug, Default)]
struct BackendState {
    /// Keyed by lowercase email.
    accounts: HashMap<String, Account>,
    /// Every session ever issued, keyed by access token.
    issued: HashMap<String, Session>,
    current: Option<Session>,
    offline: bool,
    password_delay: Option<Duration>,
    counter: u64,
}

impl BackendState {
    fn user(&self, user_id: &str) -> Option<&User> {
        self.accounts
            .values()
            .map(|account| &account.user)
            .find(|user| user.id == user_id)
    }

    fn mint(&mut self, user: User) -> Session {
        self.counter += 1;
        let n = self.counter;
        let session = Session {
            access_token: format!("at_{}_{n}", user.id),
            refresh_token: format!("rt_{}_{n}", user.id),
            expires_at: Utc::now() + TimeDelta::seconds(SESSION_TTL_SECS),
            user,
        };
        self.issued
            .insert(session.access_token.clone(), session.clone());
        session
    }

    fn ensure_online(&self) -> Result<(), AuthError> {
        if self.offline {
            Err(AuthError::Unavailable("identity service offline".into()))
        } else {
            Ok(())
        }
    }
}

/// Shared identity service. Clones refer to the same accounts and sessions.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAuthBackend {
    state: Arc<Mutex<BackendState>>,
}

impl InMemoryAuthBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an account with a confirmed email.
    pub fn add_account(&self, user_id: &str, email: &str, password: &str) -> User {
        let user = User::new(user_id)
            .with_email(email)
            .with_email_confirmed(true);
        self.lock().accounts.insert(
            email.to_lowercase(),
            Account {
                user: user.clone(),
                password: password.to_string(),
            },
        );
        user
    }

    /// Issue a fresh session for a known user without activating it.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Provider` if the user does not exist.
    pub fn mint_session(&self, user_id: &str) -> Result<Session, AuthError> {
        let mut state = self.lock();
        let user = state
            .user(user_id)
            .cloned()
            .ok_or_else(|| AuthError::Provider(format!("unknown user {user_id}")))?;
        Ok(state.mint(user))
    }

    /// Look up an issued, unexpired session by its access token.
    #[must_use]
    pub fn session_for_token(&self, access_token: &str) -> Option<Session> {
        self.lock()
            .issued
            .get(access_token)
            .filter(|session| session.expires_at > Utc::now())
            .cloned()
    }

    /// The session every tab's client currently sees.
    #[must_use]
    pub fn current_session(&self) -> Option<Session> {
        self.lock().current.clone()
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Delay applied to password updates, to exercise client timeouts.
    pub fn set_password_delay(&self, delay: Option<Duration>) {
        self.lock().password_delay = delay;
    }

    #[must_use]
    pub fn password_matches(&self, email: &str, password: &str) -> bool {
        self.lock()
            .accounts
            .get(&email.to_lowercase())
            .is_some_and(|account| account.password == password)
    }

    /// A new tab's client.
    #[must_use]
    pub fn client(&self) -> InMemoryIdentityProvider {
        let (events, _rx) = broadcast::channel(EVENT_CAPACITY);
        InMemoryIdentityProvider {
            backend: self.clone(),
            events,
        }
    }
}

/// One tab's client of an [`InMemoryAuthBackend`].
#[derive(Debug, Clone)]
pub struct InMemoryIdentityProvider {
    backend: InMemoryAuthBackend,
    events: broadcast::Sender<AuthStateChange>,
}

impl InMemoryIdentityProvider {
    fn emit(&self, event: AuthEvent, session: Option<Session>) {
        if self
            .events
            .send(AuthStateChange::new(event, session))
            .is_err()
        {
            tracing::debug!(%event, "no subscribers for auth event");
        }
    }

    /// Password sign-in from this tab.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` on a bad email/password pair.
    pub fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let session = {
            let mut state = self.backend.lock();
            state.ensure_online()?;
            let user = state
                .accounts
                .get(&email.to_lowercase())
                .filter(|account| account.password == password)
                .map(|account| account.user.clone())
                .ok_or(AuthError::InvalidCredentials)?;
            let session = state.mint(user);
            state.current = Some(session.clone());
            session
        };
        tracing::debug!(user_id = %session.user_id(), "signed in");
        self.emit(AuthEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    /// Rotate the current session's tokens.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotAuthenticated` when no session is active.
    pub fn refresh_session(&self) -> Result<Session, AuthError> {
        let session = {
            let mut state = self.backend.lock();
            state.ensure_online()?;
            let user = state
                .current
                .as_ref()
                .map(|session| session.user.clone())
                .ok_or(AuthError::NotAuthenticated)?;
            let session = state.mint(user);
            state.current = Some(session.clone());
            session
        };
        self.emit(AuthEvent::TokenRefreshed, Some(session.clone()));
        Ok(session)
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        let state = self.backend.lock();
        state.ensure_online()?;
        Ok(state.current.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange> {
        self.events.subscribe()
    }

    async fn set_session(&self, tokens: SessionTokens) -> Result<Session, AuthError> {
        let session = {
            let mut state = self.backend.lock();
            state.ensure_online()?;
            let session = state
                .issued
                .get(&tokens.access_token)
                .filter(|session| session.refresh_token == tokens.refresh_token)
                .filter(|session| session.expires_at > Utc::now())
                .cloned()
                .ok_or_else(|| AuthError::Provider("invalid or expired session tokens".into()))?;
            state.current = Some(session.clone());
            session
        };
        self.emit(AuthEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        {
            let mut state = self.backend.lock();
            state.ensure_online()?;
            state.current = None;
        }
        self.emit(AuthEvent::SignedOut, None);
        Ok(())
    }

    async fn update_password(&self, new_password: &str) -> Result<(), AuthError> {
        let delay = {
            let state = self.backend.lock();
            state.ensure_online()?;
            state.password_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let session = {
            let mut state = self.backend.lock();
            let session = state.current.clone().ok_or(AuthError::NotAuthenticated)?;
            let account = state
                .accounts
                .values_mut()
                .find(|account| account.user.id == session.user_id())
                .ok_or_else(|| AuthError::Provider("account no longer exists".into()))?;
            account.password = new_password.to_string();
            session
        };
        self.emit(AuthEvent::UserUpdated, Some(session));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StaticProfileSource
// ---------------------------------------------------------------------------

/// Profiles served from a map. Clones share rows and the availability switch.
#[derive(Debug, Clone, Default)]
pub struct StaticProfileSource {
    profiles: Arc<Mutex<HashMap<String, Profile>>>,
    unavailable: Arc<AtomicBool>,
}

impl StaticProfileSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_profile(self, profile: Profile) -> Self {
        self.insert(profile);
        self
    }

    pub fn insert(&self, profile: Profile) {
        self.profiles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(profile.id.clone(), profile);
    }

    /// Make every fetch fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProfileSource for StaticProfileSource {
    async fn fetch_profile(&self, user_id: &str) -> Result<Profile, AuthError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AuthError::ProfileFetch("profile backend unavailable".into()));
        }
        self.profiles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned()
            .ok_or_else(|| AuthError::ProfileFetch(format!("no profile row for {user_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use pulse_core::Role;

    fn backend() -> InMemoryAuthBackend {
        let backend = InMemoryAuthBackend::new();
        backend.add_account("user_1", "ada@example.com", "hunter22");
        backend
    }

    #[tokio::test]
    async fn sign_in_is_visible_to_every_client() {
        let backend = backend();
        let tab_a = backend.client();
        let tab_b = backend.client();

        let session = tab_a
            .sign_in_with_password("Ada@Example.com", "hunter22")
            .unwrap();
        assert_eq!(tab_b.get_session().await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn events_stay_on_the_emitting_client() {
        let backend = backend();
        let tab_a = backend.client();
        let tab_b = backend.client();
        let mut events_a = tab_a.subscribe();
        let mut events_b = tab_b.subscribe();

        tab_a.sign_in_with_password("ada@example.com", "hunter22").unwrap();

        let change = events_a.recv().await.unwrap();
        assert_eq!(change.event, AuthEvent::SignedIn);
        assert!(events_b.try_recv().is_err());
    }

    #[test]
    fn wrong_password_is_rejected() {
        let backend = backend();
        let err = backend
            .client()
            .sign_in_with_password("ada@example.com", "nope")
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert_eq!(backend.current_session(), None);
    }

    #[tokio::test]
    async fn set_session_requires_issued_pair() {
        let backend = backend();
        let client = backend.client();
        let minted = backend.mint_session("user_1").unwrap();

        let bogus = SessionTokens::new(minted.access_token.clone(), "rt_other").unwrap();
        assert!(client.set_session(bogus).await.is_err());

        let active = client.set_session(minted.tokens()).await.unwrap();
        assert_eq!(active, minted);
        assert_eq!(backend.current_session(), Some(minted));
    }

    #[tokio::test]
    async fn refresh_rotates_tokens_for_same_user() {
        let backend = backend();
        let client = backend.client();
        let first = client.sign_in_with_password("ada@example.com", "hunter22").unwrap();
        let second = client.refresh_session().unwrap();
        assert_eq!(first.user_id(), second.user_id());
        assert_ne!(first.access_token, second.access_token);
    }

    #[tokio::test]
    async fn offline_backend_fails_get_session() {
        let backend = backend();
        backend.set_offline(true);
        let err = backend.client().get_session().await.unwrap_err();
        assert!(matches!(err, AuthError::Unavailable(_)));
    }

    #[tokio::test]
    async fn update_password_emits_user_updated() {
        let backend = backend();
        let client = backend.client();
        client.sign_in_with_password("ada@example.com", "hunter22").unwrap();
        let mut events = client.subscribe();

        client.update_password("correct horse").await.unwrap();
        assert!(backend.password_matches("ada@example.com", "correct horse"));
        assert_eq!(events.recv().await.unwrap().event, AuthEvent::UserUpdated);
    }

    #[tokio::test]
    async fn sign_out_clears_shared_session() {
        let backend = backend();
        let client = backend.client();
        client.sign_in_with_password("ada@example.com", "hunter22").unwrap();
        client.sign_out().await.unwrap();
        assert_eq!(backend.current_session(), None);
    }

    #[tokio::test]
    async fn profile_source_serves_rows_and_failures() {
        let source = StaticProfileSource::new().with_profile(Profile {
            role: Role::TeamAdmin,
            ..Profile::placeholder("user_1")
        });
        assert_eq!(
            source.fetch_profile("user_1").await.unwrap().role,
            Role::TeamAdmin
        );
        assert!(source.fetch_profile("user_2").await.is_err());

        source.set_unavailable(true);
        assert!(matches!(
            source.fetch_profile("user_1").await.unwrap_err(),
            AuthError::ProfileFetch(_)
        ));
    }
}

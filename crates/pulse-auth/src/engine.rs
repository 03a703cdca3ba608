//! Identity reconciliation engine: one per tab.
//!
//! [`IdentityEngine::mount`] reads the persisted store, subscribes to the
//! provider's push events and the cross-tab channel, and spawns a task that
//! feeds every input through [`TabState::reduce`] and runs the resulting
//! effects. UI code reads [`IdentitySnapshot`]s from a watch channel.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use pulse_channel::{BroadcastMessage, Broadcaster, Subscription};
use pulse_config::{PasswordConfig, PulseConfig};
use pulse_core::{AuthPhase, ImpersonationState, Permissions, ProfileView, User};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};

use crate::error::{AuthError, ImpersonationError};
use crate::impersonation::{ImpersonationApi, ImpersonationOverlay};
use crate::provider::{AuthStateChange, IdentityProvider, ProfileSource};
use crate::reconcile::{
    Bootstrap, Effect, LocalSignal, ProfileLoaded, ProviderSignal, Signal, TabState,
};
use crate::store::SessionStore;
use crate::validity::{SESSION_EXPIRY_MARGIN_SECS, is_session_valid_at};

/// Collaborators of one tab.
#[derive(Clone)]
pub struct EngineDeps {
    pub provider: Arc<dyn IdentityProvider>,
    pub profiles: Arc<dyn ProfileSource>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub store: SessionStore,
    /// `None` disables impersonation for this tab.
    pub impersonation: Option<Arc<dyn ImpersonationApi>>,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub expiry_margin_secs: i64,
    pub password: PasswordConfig,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            expiry_margin_secs: SESSION_EXPIRY_MARGIN_SECS,
            password: PasswordConfig::default(),
        }
    }
}

impl From<&PulseConfig> for EngineOptions {
    fn from(config: &PulseConfig) -> Self {
        Self {
            expiry_margin_secs: config.session.expiry_margin_secs,
            password: config.password.clone(),
        }
    }
}

/// What the UI layer sees of one tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentitySnapshot {
    pub phase: AuthPhase,
    pub user: Option<User>,
    /// Profile and the permissions derived from it, replaced together.
    pub profile: Option<ProfileView>,
    pub loading: bool,
    pub impersonation: ImpersonationState,
}

impl IdentitySnapshot {
    fn of(state: &TabState) -> Self {
        Self {
            phase: state.phase(),
            user: state.user().cloned(),
            profile: state.profile().cloned(),
            loading: state.is_loading(),
            impersonation: state.impersonation().clone(),
        }
    }

    #[must_use]
    pub const fn has_session(&self) -> bool {
        self.user.is_some()
    }

    /// Permissions of the current profile; none while it is loading.
    #[must_use]
    pub fn permissions(&self) -> Permissions {
        self.profile
            .as_ref()
            .map_or_else(Permissions::none, ProfileView::permissions)
    }

    #[must_use]
    pub const fn is_impersonating(&self) -> bool {
        self.impersonation.is_impersonating()
    }

    #[must_use]
    pub fn original_user_id(&self) -> Option<&str> {
        self.impersonation.original_user_id()
    }
}

/// Outcome of a password update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordUpdate {
    Applied,
    /// The provider did not answer in time; the update is idempotent so it is
    /// assumed to have gone through.
    AssumedApplied,
}

enum Inbound {
    Signal(Signal),
    Shutdown,
}

pub struct IdentityEngine;

impl IdentityEngine {
    /// Mount a tab. Must be called inside a tokio runtime.
    pub fn mount(deps: EngineDeps, options: EngineOptions) -> EngineHandle {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));

        // Subscribe before the first verification so no event can slip between.
        let events = deps.provider.subscribe();
        let listener_tx = inbox_tx.clone();
        let subscription = deps
            .broadcaster
            .subscribe(Arc::new(move |message: &BroadcastMessage| {
                let _ = listener_tx.send(Inbound::Signal(Signal::Broadcast(message.clone())));
            }));

        let persisted = deps
            .store
            .load_session()
            .filter(|session| is_session_valid_at(Some(session), Utc::now(), options.expiry_margin_secs));
        let mut state = TabState::new();
        let initial = state.reduce(Signal::Bootstrap(Bootstrap {
            session: persisted,
            original_user_id: deps.store.load_original_user_id(),
        }));

        let (snapshot_tx, snapshot_rx) = watch::channel(IdentitySnapshot::of(&state));
        let overlay = deps.impersonation.clone().map(|api| {
            ImpersonationOverlay::new(Arc::clone(&deps.provider), api, deps.store.clone())
        });

        let runner = Runner {
            state,
            deps: deps.clone(),
            inbox: inbox_tx.clone(),
            alive: Arc::clone(&alive),
            snapshots: snapshot_tx,
        };
        tokio::spawn(runner.run(inbox_rx, events, subscription, initial));

        EngineHandle {
            inbox: inbox_tx,
            snapshots: snapshot_rx,
            alive,
            provider: deps.provider,
            store: deps.store,
            overlay,
            password: options.password,
        }
    }
}

/// A mounted tab. Dropping the handle unmounts it.
pub struct EngineHandle {
    inbox: mpsc::UnboundedSender<Inbound>,
    snapshots: watch::Receiver<IdentitySnapshot>,
    alive: Arc<AtomicBool>,
    provider: Arc<dyn IdentityProvider>,
    store: SessionStore,
    overlay: Option<ImpersonationOverlay>,
    password: PasswordConfig,
}

impl EngineHandle {
    #[must_use]
    pub fn snapshot(&self) -> IdentitySnapshot {
        self.snapshots.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<IdentitySnapshot> {
        self.snapshots.clone()
    }

    /// Wait until nothing is loading.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::EngineStopped` if the tab unmounts first.
    pub async fn settled(&self) -> Result<IdentitySnapshot, AuthError> {
        let mut rx = self.snapshots.clone();
        let snapshot = rx
            .wait_for(|snapshot| !snapshot.loading)
            .await
            .map_err(|_| AuthError::EngineStopped)?;
        Ok(snapshot.clone())
    }

    /// Refetch the current user's profile.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::EngineStopped` after [`shutdown`](Self::shutdown).
    pub fn refresh_user_data(&self) -> Result<(), AuthError> {
        self.send(Signal::Local(LocalSignal::RefreshProfile))
    }

    /// Re-verify the session with the provider, then refetch the profile.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::EngineStopped` after [`shutdown`](Self::shutdown).
    pub fn force_refresh_user_data(&self) -> Result<(), AuthError> {
        self.send(Signal::Local(LocalSignal::ForceRefresh))
    }

    /// # Errors
    ///
    /// See [`ImpersonationOverlay::start`].
    pub async fn start_impersonation(
        &self,
        target_user_id: &str,
    ) -> Result<ImpersonationState, ImpersonationError> {
        let overlay = self.overlay.as_ref().ok_or(ImpersonationError::NotConfigured)?;
        let result = overlay.start(target_user_id).await;
        self.sync_impersonation();
        result
    }

    /// # Errors
    ///
    /// See [`ImpersonationOverlay::stop`].
    pub async fn stop_impersonation(&self) -> Result<ImpersonationState, ImpersonationError> {
        let overlay = self.overlay.as_ref().ok_or(ImpersonationError::NotConfigured)?;
        let result = overlay.stop().await;
        self.sync_impersonation();
        result
    }

    /// Sign out through the provider and drop any impersonation overlay.
    ///
    /// # Errors
    ///
    /// Returns the provider's error; local state then stays as it was.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.provider.sign_out().await?;
        if let Err(error) = self.store.clear_original_user_id() {
            tracing::warn!(%error, "failed to clear impersonation key on sign-out");
        }
        self.sync_impersonation();
        Ok(())
    }

    /// # Errors
    ///
    /// `AuthError::InvalidPassword` for a too-short password, otherwise the
    /// provider's error. A provider timeout is not an error.
    pub async fn update_password(&self, new_password: &str) -> Result<PasswordUpdate, AuthError> {
        if new_password.chars().count() < self.password.min_length {
            return Err(AuthError::InvalidPassword(format!(
                "must be at least {} characters",
                self.password.min_length
            )));
        }
        let timeout = self.password.update_timeout();
        match tokio::time::timeout(timeout, self.provider.update_password(new_password)).await {
            Ok(Ok(())) => Ok(PasswordUpdate::Applied),
            Ok(Err(error)) => Err(error),
            Err(_) => {
                tracing::warn!(
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "password update timed out; assuming it was applied"
                );
                Ok(PasswordUpdate::AssumedApplied)
            }
        }
    }

    /// Unmount: unsubscribe from both channels and ignore late results.
    pub fn shutdown(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            let _ = self.inbox.send(Inbound::Shutdown);
        }
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn send(&self, signal: Signal) -> Result<(), AuthError> {
        if !self.is_alive() {
            return Err(AuthError::EngineStopped);
        }
        self.inbox
            .send(Inbound::Signal(signal))
            .map_err(|_| AuthError::EngineStopped)
    }

    fn sync_impersonation(&self) {
        let original = self.store.load_original_user_id();
        if self
            .send(Signal::Local(LocalSignal::ImpersonationLoaded(original)))
            .is_err()
        {
            tracing::debug!("engine stopped; impersonation state not synced");
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

struct Runner {
    state: TabState,
    deps: EngineDeps,
    inbox: mpsc::UnboundedSender<Inbound>,
    alive: Arc<AtomicBool>,
    snapshots: watch::Sender<IdentitySnapshot>,
}

impl Runner {
    async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<Inbound>,
        mut events: broadcast::Receiver<AuthStateChange>,
        subscription: Subscription,
        initial: Vec<Effect>,
    ) {
        self.execute(initial);
        self.publish_snapshot();

        let mut provider_open = true;
        loop {
            let signal = tokio::select! {
                inbound = inbox.recv() => match inbound {
                    Some(Inbound::Signal(signal)) => signal,
                    Some(Inbound::Shutdown) | None => break,
                },
                event = events.recv(), if provider_open => match event {
                    Ok(change) => Signal::Provider(ProviderSignal::Event(change)),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "missed provider events; re-verifying");
                        Signal::Local(LocalSignal::ForceRefresh)
                    }
                    Err(RecvError::Closed) => {
                        tracing::debug!("provider event stream closed");
                        provider_open = false;
                        continue;
                    }
                },
            };
            if !self.alive.load(Ordering::SeqCst) {
                break;
            }
            let effects = self.state.reduce(signal);
            self.execute(effects);
            self.publish_snapshot();
        }

        subscription.unsubscribe();
        tracing::debug!("identity engine stopped");
    }

    fn execute(&mut self, effects: Vec<Effect>) {
        let mut queue = VecDeque::from(effects);
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::FetchProfile { user_id, generation } => self.fetch_profile(user_id, generation),
                Effect::Verify { epoch, seq } => self.verify(epoch, seq),
                Effect::PersistSession(session) => {
                    if let Err(error) = self.deps.store.save_session(&session) {
                        tracing::warn!(%error, "failed to persist session");
                    }
                }
                Effect::ClearPersistedSession => {
                    if let Err(error) = self.deps.store.clear_session() {
                        tracing::warn!(%error, "failed to clear persisted session");
                    }
                }
                Effect::Publish { kind, hint } => match serde_json::to_value(&hint) {
                    Ok(payload) => self.deps.broadcaster.publish(kind, payload),
                    Err(error) => tracing::warn!(%error, %kind, "failed to encode session hint"),
                },
                Effect::ReloadImpersonation => {
                    let original = self.deps.store.load_original_user_id();
                    queue.extend(
                        self.state
                            .reduce(Signal::Local(LocalSignal::ImpersonationLoaded(original))),
                    );
                }
            }
        }
    }

    fn fetch_profile(&self, user_id: String, generation: u64) {
        let profiles = Arc::clone(&self.deps.profiles);
        let inbox = self.inbox.clone();
        let alive = Arc::clone(&self.alive);
        tokio::spawn(async move {
            let result = profiles
                .fetch_profile(&user_id)
                .await
                .map_err(|e| e.to_string());
            if alive.load(Ordering::SeqCst) {
                let _ = inbox.send(Inbound::Signal(Signal::Profile(ProfileLoaded {
                    user_id,
                    generation,
                    result,
                })));
            }
        });
    }

    fn verify(&self, epoch: u64, seq: u64) {
        let provider = Arc::clone(&self.deps.provider);
        let inbox = self.inbox.clone();
        let alive = Arc::clone(&self.alive);
        tokio::spawn(async move {
            let result = provider.get_session().await.map_err(|e| e.to_string());
            if alive.load(Ordering::SeqCst) {
                let _ = inbox.send(Inbound::Signal(Signal::Provider(ProviderSignal::Verified {
                    epoch,
                    seq,
                    result,
                })));
            }
        });
    }

    fn publish_snapshot(&self) {
        let next = IdentitySnapshot::of(&self.state);
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

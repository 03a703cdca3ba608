//! Per-tab identity reducer.
//!
//! Every input a tab can observe is a [`Signal`] tagged with its source.
//! [`TabState::reduce`] folds it into the tab's view and returns the
//! [`Effect`]s the engine must run. No I/O happens here.
//!
//! Merge rules:
//! - provider push events and provider verifications are ground truth
//! - broadcast messages are hints: they schedule a verification and may
//!   trigger a profile refetch, but never set or clear the user themselves
//! - a verification is applied only if no push event was applied since it was
//!   issued and it is newer than the last applied verification
//! - a profile result is applied only for the current user and generation

use pulse_channel::BroadcastMessage;
use pulse_core::{
    AuthEvent, AuthPhase, ImpersonationState, MessageKind, Profile, ProfileView, Session, User,
};
use serde::{Deserialize, Serialize};

use crate::provider::AuthStateChange;

/// `data` of every cross-tab message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<AuthEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
}

// ---------------------------------------------------------------------------
// Signals and effects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Signal {
    /// One-shot read of the persisted store at mount.
    Bootstrap(Bootstrap),
    Provider(ProviderSignal),
    Broadcast(BroadcastMessage),
    Profile(ProfileLoaded),
    Local(LocalSignal),
}

#[derive(Debug, Clone, Default)]
pub struct Bootstrap {
    /// Persisted session, already filtered by the validity predicate.
    pub session: Option<Session>,
    pub original_user_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ProviderSignal {
    Event(AuthStateChange),
    /// Result of a `get_session` issued by [`Effect::Verify`].
    Verified {
        epoch: u64,
        seq: u64,
        result: Result<Option<Session>, String>,
    },
}

#[derive(Debug, Clone)]
pub struct ProfileLoaded {
    pub user_id: String,
    pub generation: u64,
    pub result: Result<Profile, String>,
}

#[derive(Debug, Clone)]
pub enum LocalSignal {
    /// Refetch the current user's profile.
    RefreshProfile,
    /// Re-verify the session with the provider and refetch the profile.
    ForceRefresh,
    /// Persisted impersonation key as just read from the store.
    ImpersonationLoaded(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    FetchProfile { user_id: String, generation: u64 },
    PersistSession(Session),
    ClearPersistedSession,
    Publish { kind: MessageKind, hint: SessionHint },
    Verify { epoch: u64, seq: u64 },
    ReloadImpersonation,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TabState {
    phase: AuthPhase,
    session: Option<Session>,
    profile: Option<ProfileView>,
    profile_pending: bool,
    profile_generation: u64,
    epoch: u64,
    verify_seq: u64,
    last_applied_verify: u64,
    impersonation: ImpersonationState,
}

impl Default for TabState {
    fn default() -> Self {
        Self::new()
    }
}

impl TabState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: AuthPhase::Booting,
            session: None,
            profile: None,
            profile_pending: false,
            profile_generation: 0,
            epoch: 0,
            verify_seq: 0,
            last_applied_verify: 0,
            impersonation: ImpersonationState::Inactive,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> AuthPhase {
        self.phase
    }

    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn user(&self) -> Option<&User> {
        self.session.as_ref().map(|session| &session.user)
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.session.as_ref().map(Session::user_id)
    }

    /// Profile paired with the permissions derived from it.
    #[must_use]
    pub const fn profile(&self) -> Option<&ProfileView> {
        self.profile.as_ref()
    }

    #[must_use]
    pub const fn impersonation(&self) -> &ImpersonationState {
        &self.impersonation
    }

    /// Booting, or a profile fetch is outstanding.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.phase == AuthPhase::Booting || self.profile_pending
    }

    pub fn reduce(&mut self, signal: Signal) -> Vec<Effect> {
        let mut effects = Vec::new();
        match signal {
            Signal::Bootstrap(bootstrap) => self.bootstrap(bootstrap, &mut effects),
            Signal::Provider(ProviderSignal::Event(change)) => self.push_event(change, &mut effects),
            Signal::Provider(ProviderSignal::Verified { epoch, seq, result }) => {
                self.verified(epoch, seq, result, &mut effects);
            }
            Signal::Broadcast(message) => self.hint(&message, &mut effects),
            Signal::Profile(loaded) => self.profile_loaded(loaded),
            Signal::Local(LocalSignal::RefreshProfile) => {
                if !self.profile_pending {
                    self.request_profile(&mut effects);
                }
            }
            Signal::Local(LocalSignal::ForceRefresh) => {
                self.request_verify(&mut effects);
                self.request_profile(&mut effects);
            }
            Signal::Local(LocalSignal::ImpersonationLoaded(original)) => {
                self.impersonation = ImpersonationState::from_original(original);
            }
        }
        effects
    }

    fn bootstrap(&mut self, bootstrap: Bootstrap, effects: &mut Vec<Effect>) {
        self.impersonation = ImpersonationState::from_original(bootstrap.original_user_id);
        if let Some(session) = bootstrap.session {
            tracing::debug!(user_id = %session.user_id(), "optimistic bootstrap from persisted session");
            self.session = Some(session);
            self.request_profile(effects);
        }
        self.request_verify(effects);
    }

    fn push_event(&mut self, change: AuthStateChange, effects: &mut Vec<Effect>) {
        self.epoch += 1;
        let previous_user = self.user_id().map(str::to_string);
        let refetch_same_user = matches!(change.event, AuthEvent::SignedIn | AuthEvent::UserUpdated);
        tracing::debug!(event = %change.event, epoch = self.epoch, "applying provider event");

        match change.session.clone() {
            Some(session) => self.apply_session(session, refetch_same_user, effects),
            None => self.apply_signed_out(true, effects),
        }

        let hint = match change.event {
            AuthEvent::SignedIn | AuthEvent::TokenRefreshed => SessionHint {
                user_id: self.user_id().map(str::to_string),
                event: Some(change.event),
                session: change.session,
            },
            AuthEvent::SignedOut => SessionHint {
                user_id: previous_user,
                event: Some(change.event),
                session: None,
            },
            AuthEvent::UserUpdated => SessionHint {
                user_id: self.user_id().map(str::to_string),
                event: Some(change.event),
                session: None,
            },
        };
        effects.push(Effect::Publish {
            kind: change.event.republish_kind(),
            hint,
        });
    }

    fn verified(
        &mut self,
        epoch: u64,
        seq: u64,
        result: Result<Option<Session>, String>,
        effects: &mut Vec<Effect>,
    ) {
        if epoch != self.epoch || seq <= self.last_applied_verify {
            tracing::debug!(epoch, seq, current_epoch = self.epoch, "discarding stale verification");
            return;
        }
        self.last_applied_verify = seq;

        match result {
            Ok(Some(session)) => self.apply_session(session, false, effects),
            Ok(None) => self.apply_signed_out(self.session.is_some(), effects),
            Err(error) if self.phase == AuthPhase::Booting => {
                tracing::warn!(%error, "session check failed at boot; treating tab as signed out");
                self.apply_signed_out(false, effects);
            }
            Err(error) => {
                tracing::warn!(%error, "session re-verification failed; keeping current identity");
            }
        }
    }

    fn hint(&mut self, message: &BroadcastMessage, effects: &mut Vec<Effect>) {
        let hint = message.payload_as::<SessionHint>().unwrap_or_else(|error| {
            tracing::debug!(%error, kind = %message.kind, "hint payload unreadable; verifying anyway");
            SessionHint::default()
        });
        tracing::debug!(kind = %message.kind, user_id = ?hint.user_id, "received cross-tab hint");

        self.request_verify(effects);

        let names_current_user = hint.user_id.is_some() && hint.user_id.as_deref() == self.user_id();
        if names_current_user && message.kind != MessageKind::SessionClear {
            self.request_profile(effects);
        }
    }

    fn profile_loaded(&mut self, loaded: ProfileLoaded) {
        if loaded.generation != self.profile_generation
            || self.user_id() != Some(loaded.user_id.as_str())
        {
            tracing::debug!(
                user_id = %loaded.user_id,
                generation = loaded.generation,
                "discarding stale profile result"
            );
            return;
        }
        self.profile_pending = false;

        let profile = match loaded.result {
            Ok(profile) if profile.id == loaded.user_id => profile,
            Ok(profile) => {
                tracing::warn!(
                    user_id = %loaded.user_id,
                    row_id = %profile.id,
                    "profile row belongs to another user; using default profile"
                );
                Profile::placeholder(&loaded.user_id)
            }
            Err(error) => {
                tracing::warn!(%error, user_id = %loaded.user_id, "profile fetch failed; using default profile");
                Profile::placeholder(&loaded.user_id)
            }
        };
        self.profile = Some(ProfileView::new(profile));
    }

    // --- transitions ---

    fn apply_session(&mut self, session: Session, refetch_same_user: bool, effects: &mut Vec<Effect>) {
        let user_changed = self.user_id() != Some(session.user_id());
        let session_changed = self.session.as_ref() != Some(&session);

        self.session = Some(session.clone());
        self.enter(AuthPhase::Authenticated);

        if user_changed {
            self.profile = None;
        }
        if user_changed || refetch_same_user || (self.profile.is_none() && !self.profile_pending) {
            self.request_profile(effects);
        }
        if session_changed {
            effects.push(Effect::PersistSession(session));
        }
        // The overlay key can change without the user changing (a failed or
        // interrupted start in another tab), so every applied state re-reads it.
        effects.push(Effect::ReloadImpersonation);
    }

    fn apply_signed_out(&mut self, clear_persisted: bool, effects: &mut Vec<Effect>) {
        self.session = None;
        self.profile = None;
        self.profile_pending = false;
        // Invalidate any fetch still in flight for the previous user.
        self.profile_generation += 1;
        self.enter(AuthPhase::Unauthenticated);

        if clear_persisted {
            effects.push(Effect::ClearPersistedSession);
        }
        effects.push(Effect::ReloadImpersonation);
    }

    fn request_profile(&mut self, effects: &mut Vec<Effect>) {
        let Some(user_id) = self.user_id().map(str::to_string) else {
            return;
        };
        self.profile_generation += 1;
        self.profile_pending = true;
        effects.push(Effect::FetchProfile {
            user_id,
            generation: self.profile_generation,
        });
    }

    fn request_verify(&mut self, effects: &mut Vec<Effect>) {
        self.verify_seq += 1;
        effects.push(Effect::Verify {
            epoch: self.epoch,
            seq: self.verify_seq,
        });
    }

    fn enter(&mut self, next: AuthPhase) {
        match self.phase.transition(next) {
            Ok(phase) => self.phase = phase,
            Err(error) => tracing::warn!(%error, "ignoring phase transition"),
        }
    }
}

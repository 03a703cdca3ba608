//! Status enums for the identity subsystem.
//!
//! Wire-facing enums use the casing of the identity provider and the cross-tab
//! channel (`SIGNED_IN`, `SESSION_UPDATE`); application enums use `snake_case`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::CoreError;

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Application role stored on a profile row.
///
/// Unknown role strings deserialize as [`Role::User`] so a new backend role
/// never locks a user out of the UI.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    TeamAdmin,
    PlatformAdmin,
    // Must stay last for `serde(other)`.
    #[default]
    #[serde(other)]
    User,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::TeamAdmin => "team_admin",
            Self::PlatformAdmin => "platform_admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AuthEvent
// ---------------------------------------------------------------------------

/// Push event emitted by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

impl AuthEvent {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SignedIn => "SIGNED_IN",
            Self::SignedOut => "SIGNED_OUT",
            Self::TokenRefreshed => "TOKEN_REFRESHED",
            Self::UserUpdated => "USER_UPDATED",
        }
    }

    /// Broadcast kind a tab republishes after applying this event.
    #[must_use]
    pub const fn republish_kind(self) -> MessageKind {
        match self {
            Self::SignedIn | Self::TokenRefreshed => MessageKind::SessionUpdate,
            Self::SignedOut => MessageKind::SessionClear,
            Self::UserUpdated => MessageKind::AuthStateChange,
        }
    }
}

impl fmt::Display for AuthEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// Kind of a cross-tab broadcast message (`type` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    SessionUpdate,
    SessionClear,
    AuthStateChange,
}

impl MessageKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SessionUpdate => "SESSION_UPDATE",
            Self::SessionClear => "SESSION_CLEAR",
            Self::AuthStateChange => "AUTH_STATE_CHANGE",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AuthPhase
// ---------------------------------------------------------------------------

/// Reconciliation phase of a single tab.
///
/// ```text
/// booting → authenticated ⇄ unauthenticated
///         → unauthenticated
/// ```
///
/// There is no terminal phase; a tab reconciles until it is unmounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthPhase {
    Booting,
    Authenticated,
    Unauthenticated,
}

impl AuthPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Booting => "booting",
            Self::Authenticated => "authenticated",
            Self::Unauthenticated => "unauthenticated",
        }
    }

    /// Valid next states from the current state.
    ///
    /// Self-transitions (a user switch, a token refresh) are always allowed and
    /// are not listed here.
    #[must_use]
    pub const fn allowed_next_states(self) -> &'static [Self] {
        match self {
            Self::Booting => &[Self::Authenticated, Self::Unauthenticated],
            Self::Authenticated => &[Self::Unauthenticated],
            Self::Unauthenticated => &[Self::Authenticated],
        }
    }

    /// Check whether a transition to `next` is valid.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self == next || self.allowed_next_states().contains(&next)
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidTransition` when `next` is not reachable.
    pub fn transition(self, next: Self) -> Result<Self, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                entity_type: "auth_phase".into(),
                from: self.as_str().into(),
                to: next.as_str().into(),
            })
        }
    }
}

impl fmt::Display for AuthPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

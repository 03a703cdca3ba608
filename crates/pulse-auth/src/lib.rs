//! # pulse-auth
//!
//! Identity/session reconciliation for one browser-style tab among many.
//!
//! - Persisted session record and impersonation key ([`store`])
//! - Session validity predicate ([`validity`])
//! - Identity provider and profile contracts, plus in-memory implementations
//! - Per-tab reducer ([`reconcile`]) and the engine that drives it ([`engine`])
//! - Impersonation overlay over the token-exchange endpoints ([`impersonation`])
//! - Debounced redirect guard ([`redirect`])

pub mod engine;
pub mod error;
pub mod impersonation;
pub mod memory;
pub mod provider;
pub mod reconcile;
pub mod redirect;
pub mod store;
pub mod validity;

pub use engine::{
    EngineDeps, EngineHandle, EngineOptions, IdentityEngine, IdentitySnapshot, PasswordUpdate,
};
pub use error::{AuthError, ImpersonationError};
pub use impersonation::{HttpImpersonationApi, ImpersonationApi, ImpersonationOverlay};
pub use memory::{InMemoryAuthBackend, InMemoryIdentityProvider, StaticProfileSource};
pub use provider::{AuthStateChange, IdentityProvider, ProfileSource};
pub use reconcile::{SessionHint, Signal, TabState};
pub use redirect::{Decision, Navigator, RateLimiter, RecordingNavigator, RedirectDriver, RedirectGuard};
pub use store::{FileStore, KeyValueStore, MemoryStore, SessionStore};
pub use validity::{SESSION_EXPIRY_MARGIN_SECS, is_session_valid, is_session_valid_at};

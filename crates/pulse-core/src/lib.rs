//! # pulse-core
//!
//! Core types shared across all Pulse crates.
//!
//! - Identity-provider records (`Session`, `User`, `SessionTokens`)
//! - Application profile and derived permissions (`Profile`, `Permissions`, `ProfileView`)
//! - Impersonation overlay state
//! - Status enums (auth phase with transitions, auth events, broadcast kinds, roles)
//! - Cross-cutting error types

pub mod enums;
pub mod errors;
pub mod identity;
pub mod impersonation;
pub mod session;

pub use enums::{AuthEvent, AuthPhase, MessageKind, Role};
pub use errors::CoreError;
pub use identity::{Permissions, Profile, ProfileView, User};
pub use impersonation::ImpersonationState;
pub use session::{Session, SessionTokens};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("not authenticated: sign in first")]
    NotAuthenticated,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("identity provider error: {0}")]
    Provider(String),

    #[error("identity provider unreachable: {0}")]
    Unavailable(String),

    #[error("profile fetch failed: {0}")]
    ProfileFetch(String),

    #[error("session store error: {0}")]
    Store(String),

    #[error("invalid password: {0}")]
    InvalidPassword(String),

    #[error("identity engine has stopped")]
    EngineStopped,
}

/// Failure of an impersonation start or stop.
///
/// Every variant leaves the caller in a well-defined identity: after a failed
/// start the original session is still active, after a failed stop the
/// impersonated session is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImpersonationError {
    #[error("no active session")]
    NoActiveSession,

    #[error("no original user id found")]
    NoOriginalUser,

    #[error("already impersonating on behalf of {original_user_id}; stop first")]
    AlreadyImpersonating { original_user_id: String },

    #[error("invalid impersonation target: {0}")]
    InvalidTarget(String),

    #[error("impersonation endpoints are not configured")]
    NotConfigured,

    #[error("impersonation rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("impersonation request failed: {0}")]
    Network(String),

    #[error("impersonation request timed out")]
    Timeout,

    #[error("invalid impersonation response: {0}")]
    InvalidResponse(String),

    #[error("identity provider error: {0}")]
    Provider(String),

    #[error("failed to activate exchanged session: {0}")]
    SessionSwap(String),

    #[error("impersonation state could not be persisted: {0}")]
    Store(String),
}

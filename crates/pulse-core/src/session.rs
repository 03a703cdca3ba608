use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use crate::identity::User;

/// Credential bundle issued by the identity provider.
///
/// The application stores and forwards sessions; it never mints or refreshes
/// them. `expires_at` is serialized as unix seconds, matching provider payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    #[schemars(with = "i64")]
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

impl Session {
    /// Subject user id.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    #[must_use]
    pub fn tokens(&self) -> SessionTokens {
        SessionTokens {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }

    /// Seconds until expiry, negative once expired.
    #[must_use]
    pub fn seconds_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds()
    }
}

/// Access/refresh token pair, as passed to `set_session` and returned by the
/// impersonation endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
}

impl SessionTokens {
    /// Build a token pair, rejecting empty tokens.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` if either token is blank.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let access_token = access_token.into();
        let refresh_token = refresh_token.into();
        if access_token.trim().is_empty() {
            return Err(CoreError::Validation("access_token is empty".into()));
        }
        if refresh_token.trim().is_empty() {
            return Err(CoreError::Validation("refresh_token is empty".into()));
        }
        Ok(Self {
            access_token,
            refresh_token,
        })
    }
}

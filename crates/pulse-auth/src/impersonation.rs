//! Impersonation overlay: swap the active session for another user's while
//! remembering who to switch back to.
//!
//! At most one level deep. The original user id is persisted so a reload
//! can still stop impersonating.

use std::sync::Arc;

use async_trait::async_trait;
use pulse_config::ImpersonationConfig;
use pulse_core::{ImpersonationState, SessionTokens};
use serde::Deserialize;

use crate::error::ImpersonationError;
use crate::provider::IdentityProvider;
use crate::store::SessionStore;
use crate::validity::is_session_valid;

/// Token-exchange endpoints.
#[async_trait]
pub trait ImpersonationApi: Send + Sync {
    /// Exchange the caller's access token for a session of `target_user_id`.
    async fn impersonate(
        &self,
        access_token: &str,
        target_user_id: &str,
    ) -> Result<SessionTokens, ImpersonationError>;

    /// Obtain a session for the original user again.
    async fn stop_impersonate(&self, original_user_id: &str)
    -> Result<SessionTokens, ImpersonationError>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// `POST /api/impersonate` and `POST /api/stop-impersonate` over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpImpersonationApi {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeBody {
    #[serde(default)]
    session: Option<TokenPair>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenPair {
    access_token: String,
    refresh_token: String,
}

impl HttpImpersonationApi {
    /// # Errors
    ///
    /// Returns `ImpersonationError::NotConfigured` without a base URL, or
    /// `ImpersonationError::Network` if the HTTP client cannot be built.
    pub fn new(config: &ImpersonationConfig) -> Result<Self, ImpersonationError> {
        if !config.is_configured() {
            return Err(ImpersonationError::NotConfigured);
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ImpersonationError::Network(format!("build client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn exchange(
        &self,
        path: &str,
        bearer: Option<&str>,
        body: serde_json::Value,
    ) -> Result<SessionTokens, ImpersonationError> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = bearer {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ImpersonationError::Timeout
            } else {
                ImpersonationError::Network(format!("{path}: {e}"))
            }
        })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| {
            if e.is_timeout() {
                ImpersonationError::Timeout
            } else {
                ImpersonationError::Network(format!("{path}: read body: {e}"))
            }
        })?;
        parse_exchange(status.as_u16(), &text)
    }
}

/// Interpret an exchange response.
fn parse_exchange(status: u16, text: &str) -> Result<SessionTokens, ImpersonationError> {
    let body = serde_json::from_str::<ExchangeBody>(text);

    if !(200..300).contains(&status) {
        let message = body
            .ok()
            .and_then(|b| b.error.or(b.message))
            .unwrap_or_else(|| {
                if text.trim().is_empty() {
                    "request failed".to_string()
                } else {
                    text.trim().to_string()
                }
            });
        return Err(ImpersonationError::Rejected { status, message });
    }

    let body = body.map_err(|e| ImpersonationError::InvalidResponse(e.to_string()))?;
    if let Some(error) = body.error {
        return Err(ImpersonationError::Rejected {
            status,
            message: error,
        });
    }
    let pair = body
        .session
        .ok_or_else(|| ImpersonationError::InvalidResponse("missing session".into()))?;
    SessionTokens::new(pair.access_token, pair.refresh_token)
        .map_err(|e| ImpersonationError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl ImpersonationApi for HttpImpersonationApi {
    async fn impersonate(
        &self,
        access_token: &str,
        target_user_id: &str,
    ) -> Result<SessionTokens, ImpersonationError> {
        self.exchange(
            "/api/impersonate",
            Some(access_token),
            serde_json::json!({ "target_user_id": target_user_id }),
        )
        .await
    }

    async fn stop_impersonate(
        &self,
        original_user_id: &str,
    ) -> Result<SessionTokens, ImpersonationError> {
        self.exchange(
            "/api/stop-impersonate",
            None,
            serde_json::json!({ "original_user_id": original_user_id }),
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// Overlay
// ---------------------------------------------------------------------------

/// Start/stop flows over a provider client, the exchange API and the store.
#[derive(Clone)]
pub struct ImpersonationOverlay {
    provider: Arc<dyn IdentityProvider>,
    api: Arc<dyn ImpersonationApi>,
    store: SessionStore,
}

impl ImpersonationOverlay {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        api: Arc<dyn ImpersonationApi>,
        store: SessionStore,
    ) -> Self {
        Self {
            provider,
            api,
            store,
        }
    }

    /// State as persisted right now.
    #[must_use]
    pub fn state(&self) -> ImpersonationState {
        ImpersonationState::from_original(self.store.load_original_user_id())
    }

    /// Switch to `target_user_id`.
    ///
    /// The original user id is persisted only once the exchange has returned
    /// tokens, and removed again if the swap fails or the future is dropped
    /// before it completes.
    ///
    /// # Errors
    ///
    /// See [`ImpersonationError`]; every variant means nothing was swapped.
    pub async fn start(&self, target_user_id: &str) -> Result<ImpersonationState, ImpersonationError> {
        if let Some(original_user_id) = self.store.load_original_user_id() {
            return Err(ImpersonationError::AlreadyImpersonating { original_user_id });
        }
        let target = target_user_id.trim();
        if target.is_empty() {
            return Err(ImpersonationError::InvalidTarget("empty user id".into()));
        }

        let session = self
            .provider
            .get_session()
            .await
            .map_err(|e| ImpersonationError::Provider(e.to_string()))?
            .filter(|session| is_session_valid(Some(session)))
            .ok_or(ImpersonationError::NoActiveSession)?;
        let original_user_id = session.user_id().to_string();
        if original_user_id == target {
            return Err(ImpersonationError::InvalidTarget(
                "cannot impersonate yourself".into(),
            ));
        }

        let tokens = self
            .api
            .impersonate(&session.access_token, target)
            .await
            .inspect_err(|error| {
                tracing::warn!(%error, target_user_id = %target, "impersonation exchange failed");
            })?;

        // Persisted before the swap so the SIGNED_IN it raises already sees it.
        self.store
            .save_original_user_id(&original_user_id)
            .map_err(|e| ImpersonationError::Store(e.to_string()))?;
        let rollback = KeyRollback::new(&self.store, None);

        let active = self
            .provider
            .set_session(tokens)
            .await
            .map_err(|e| ImpersonationError::SessionSwap(e.to_string()))?;
        rollback.disarm();

        tracing::info!(
            original_user_id = %original_user_id,
            target_user_id = %active.user_id(),
            "impersonation started"
        );
        Ok(ImpersonationState::Active { original_user_id })
    }

    /// Restore the original user's session.
    ///
    /// # Errors
    ///
    /// `ImpersonationError::NoOriginalUser` when not impersonating. Any other
    /// failure leaves the impersonated session and the persisted key intact.
    pub async fn stop(&self) -> Result<ImpersonationState, ImpersonationError> {
        let original_user_id = self
            .store
            .load_original_user_id()
            .ok_or(ImpersonationError::NoOriginalUser)?;

        let tokens = self.api.stop_impersonate(&original_user_id).await?;

        // Cleared before the swap so the SIGNED_IN it raises already sees it.
        self.store
            .clear_original_user_id()
            .map_err(|e| ImpersonationError::Store(e.to_string()))?;
        let rollback = KeyRollback::new(&self.store, Some(original_user_id));

        let restored = self
            .provider
            .set_session(tokens)
            .await
            .map_err(|e| ImpersonationError::SessionSwap(e.to_string()))?;
        rollback.disarm();

        tracing::info!(user_id = %restored.user_id(), "impersonation stopped");
        Ok(ImpersonationState::Inactive)
    }
}

/// Puts the impersonation key back to `previous` when dropped armed, which
/// covers both an error return and a cancelled swap.
struct KeyRollback<'a> {
    store: &'a SessionStore,
    previous: Option<String>,
    armed: bool,
}

impl<'a> KeyRollback<'a> {
    const fn new(store: &'a SessionStore, previous: Option<String>) -> Self {
        Self {
            store,
            previous,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for KeyRollback<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let restored = match &self.previous {
            Some(user_id) => self.store.save_original_user_id(user_id),
            None => self.store.clear_original_user_id(),
        };
        match restored {
            Ok(()) => tracing::warn!(previous = ?self.previous, "session swap did not complete; impersonation key rolled back"),
            Err(error) => tracing::error!(%error, "failed to roll back impersonation key"),
        }
    }
}

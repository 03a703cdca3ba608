//! Impersonation start/stop against a scripted token-exchange service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use pulse_auth::{
    EngineDeps, EngineHandle, EngineOptions, IdentityEngine, IdentityProvider, IdentitySnapshot,
    ImpersonationApi, ImpersonationError, ImpersonationOverlay, InMemoryAuthBackend,
    InMemoryIdentityProvider, MemoryStore, SessionStore, StaticProfileSource,
};
use pulse_channel::LocalBus;
use pulse_config::{ChannelConfig, SessionConfig};
use pulse_core::{ImpersonationState, Profile, Session, SessionTokens};
use tokio::sync::{Notify, watch};

const WAIT: Duration = Duration::from_secs(2);

/// Exchange service backed by the in-memory identity backend.
struct ScriptedExchange {
    backend: InMemoryAuthBackend,
    originals: Mutex<HashMap<String, SessionTokens>>,
    reject_status: Option<u16>,
    return_bogus_tokens: bool,
    return_bogus_restore: bool,
}

impl ScriptedExchange {
    fn new(backend: &InMemoryAuthBackend) -> Self {
        Self {
            backend: backend.clone(),
            originals: Mutex::new(HashMap::new()),
            reject_status: None,
            return_bogus_tokens: false,
            return_bogus_restore: false,
        }
    }

    fn rejecting(backend: &InMemoryAuthBackend, status: u16) -> Self {
        Self {
            reject_status: Some(status),
            ..Self::new(backend)
        }
    }
}

#[async_trait]
impl ImpersonationApi for ScriptedExchange {
    async fn impersonate(
        &self,
        access_token: &str,
        target_user_id: &str,
    ) -> Result<SessionTokens, ImpersonationError> {
        if let Some(status) = self.reject_status {
            return Err(ImpersonationError::Rejected {
                status,
                message: "not a platform admin".into(),
            });
        }
        let caller = self
            .backend
            .session_for_token(access_token)
            .ok_or_else(|| ImpersonationError::Rejected {
                status: 401,
                message: "invalid token".into(),
            })?;
        if self.return_bogus_tokens {
            return Ok(SessionTokens::new("at_bogus", "rt_bogus").unwrap());
        }
        let target = self
            .backend
            .mint_session(target_user_id)
            .map_err(|e| ImpersonationError::Rejected {
                status: 404,
                message: e.to_string(),
            })?;
        self.originals
            .lock()
            .unwrap()
            .insert(caller.user_id().to_string(), caller.tokens());
        Ok(target.tokens())
    }

    async fn stop_impersonate(
        &self,
        original_user_id: &str,
    ) -> Result<SessionTokens, ImpersonationError> {
        if self.return_bogus_restore {
            return Ok(SessionTokens::new("at_stale", "rt_stale").unwrap());
        }
        self.originals
            .lock()
            .unwrap()
            .remove(original_user_id)
            .ok_or_else(|| ImpersonationError::Rejected {
                status: 400,
                message: "no impersonation in progress".into(),
            })
    }
}

/// Holds every exchange until released, reporting when one is in flight.
struct GatedExchange {
    inner: ScriptedExchange,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl GatedExchange {
    fn new(inner: ScriptedExchange) -> Self {
        Self {
            inner,
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl ImpersonationApi for GatedExchange {
    async fn impersonate(
        &self,
        access_token: &str,
        target_user_id: &str,
    ) -> Result<SessionTokens, ImpersonationError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.impersonate(access_token, target_user_id).await
    }

    async fn stop_impersonate(
        &self,
        original_user_id: &str,
    ) -> Result<SessionTokens, ImpersonationError> {
        self.inner.stop_impersonate(original_user_id).await
    }
}

struct World {
    backend: InMemoryAuthBackend,
    storage: MemoryStore,
}

impl World {
    fn new() -> Self {
        let backend = InMemoryAuthBackend::new();
        backend.add_account("admin_1", "admin@example.com", "admin-pass");
        backend.add_account("user_2", "bob@example.com", "bob-pass");
        Self {
            backend,
            storage: MemoryStore::new(),
        }
    }

    fn store(&self) -> SessionStore {
        SessionStore::new(Arc::new(self.storage.clone()), &SessionConfig::default())
    }

    fn admin_client(&self) -> (Arc<InMemoryIdentityProvider>, Session) {
        let client = Arc::new(self.backend.client());
        let session = client
            .sign_in_with_password("admin@example.com", "admin-pass")
            .unwrap();
        (client, session)
    }

    fn overlay(
        &self,
        client: Arc<InMemoryIdentityProvider>,
        api: impl ImpersonationApi + 'static,
    ) -> ImpersonationOverlay {
        ImpersonationOverlay::new(client, Arc::new(api), self.store())
    }
}

#[tokio::test]
async fn start_then_stop_restores_exact_original_session() {
    let world = World::new();
    let (client, original) = world.admin_client();
    let overlay = world.overlay(client, ScriptedExchange::new(&world.backend));

    let state = overlay.start("user_2").await.unwrap();
    assert_eq!(
        state,
        ImpersonationState::Active {
            original_user_id: "admin_1".into()
        }
    );
    assert_eq!(world.backend.current_session().unwrap().user.id, "user_2");
    assert_eq!(world.store().load_original_user_id().as_deref(), Some("admin_1"));

    let state = overlay.stop().await.unwrap();
    assert_eq!(state, ImpersonationState::Inactive);
    let restored = world.backend.current_session().unwrap();
    assert_eq!(restored.access_token, original.access_token);
    assert_eq!(restored.refresh_token, original.refresh_token);
    assert_eq!(world.store().load_original_user_id(), None);
    assert!(!overlay.state().is_impersonating());
}

#[tokio::test]
async fn stop_without_start_is_a_defined_failure() {
    let world = World::new();
    let (client, original) = world.admin_client();
    let overlay = world.overlay(client, ScriptedExchange::new(&world.backend));

    let err = overlay.stop().await.unwrap_err();
    assert_eq!(err, ImpersonationError::NoOriginalUser);
    assert_eq!(err.to_string(), "no original user id found");
    assert_eq!(world.backend.current_session(), Some(original));
    assert_eq!(overlay.state(), ImpersonationState::Inactive);
}

#[tokio::test]
async fn rejected_start_rolls_back_original_user_id() {
    let world = World::new();
    let (client, original) = world.admin_client();
    let overlay = world.overlay(client, ScriptedExchange::rejecting(&world.backend, 403));

    let err = overlay.start("user_2").await.unwrap_err();
    assert!(matches!(err, ImpersonationError::Rejected { status: 403, .. }));
    assert_eq!(world.store().load_original_user_id(), None);
    assert!(!overlay.state().is_impersonating());
    assert_eq!(world.backend.current_session(), Some(original));
}

#[tokio::test]
async fn failed_session_swap_rolls_back() {
    let world = World::new();
    let (client, original) = world.admin_client();
    let api = ScriptedExchange {
        return_bogus_tokens: true,
        ..ScriptedExchange::new(&world.backend)
    };
    let overlay = world.overlay(client, api);

    let err = overlay.start("user_2").await.unwrap_err();
    assert!(matches!(err, ImpersonationError::SessionSwap(_)));
    assert_eq!(world.store().load_original_user_id(), None);
    assert_eq!(world.backend.current_session(), Some(original));
}

#[tokio::test]
async fn cancelled_start_leaves_no_key_behind() {
    let world = World::new();
    let (client, original) = world.admin_client();
    let overlay = world.overlay(client, GatedExchange::new(ScriptedExchange::new(&world.backend)));

    let outcome = tokio::time::timeout(Duration::from_millis(50), overlay.start("user_2")).await;
    assert!(outcome.is_err(), "exchange is held open");

    assert_eq!(world.store().load_original_user_id(), None);
    assert_eq!(overlay.state(), ImpersonationState::Inactive);
    assert_eq!(world.backend.current_session(), Some(original));
}

#[tokio::test]
async fn failed_restore_keeps_overlay_and_impersonated_session() {
    let world = World::new();
    let (client, _original) = world.admin_client();
    let api = ScriptedExchange {
        return_bogus_restore: true,
        ..ScriptedExchange::new(&world.backend)
    };
    let overlay = world.overlay(client, api);
    overlay.start("user_2").await.unwrap();

    let err = overlay.stop().await.unwrap_err();
    assert!(matches!(err, ImpersonationError::SessionSwap(_)));
    assert_eq!(world.store().load_original_user_id().as_deref(), Some("admin_1"));
    assert_eq!(
        overlay.state(),
        ImpersonationState::Active {
            original_user_id: "admin_1".into()
        }
    );
    assert_eq!(world.backend.current_session().unwrap().user.id, "user_2");
}

#[tokio::test]
async fn start_requires_a_session() {
    let world = World::new();
    let client = Arc::new(world.backend.client());
    let overlay = world.overlay(client, ScriptedExchange::new(&world.backend));

    assert_eq!(
        overlay.start("user_2").await.unwrap_err(),
        ImpersonationError::NoActiveSession
    );
    assert_eq!(world.store().load_original_user_id(), None);
}

#[tokio::test]
async fn overlay_is_one_level_deep() {
    let world = World::new();
    let (client, _original) = world.admin_client();
    let overlay = world.overlay(client, ScriptedExchange::new(&world.backend));
    overlay.start("user_2").await.unwrap();

    let err = overlay.start("admin_1").await.unwrap_err();
    assert_eq!(
        err,
        ImpersonationError::AlreadyImpersonating {
            original_user_id: "admin_1".into()
        }
    );
    assert_eq!(world.store().load_original_user_id().as_deref(), Some("admin_1"));
}

#[tokio::test]
async fn invalid_targets_are_rejected_before_any_write() {
    let world = World::new();
    let (client, _original) = world.admin_client();
    let overlay = world.overlay(client, ScriptedExchange::new(&world.backend));

    assert!(matches!(
        overlay.start("  ").await.unwrap_err(),
        ImpersonationError::InvalidTarget(_)
    ));
    assert!(matches!(
        overlay.start("admin_1").await.unwrap_err(),
        ImpersonationError::InvalidTarget(_)
    ));
    assert_eq!(world.store().load_original_user_id(), None);
}

// ---------------------------------------------------------------------------
// Through the engine, across two tabs
// ---------------------------------------------------------------------------

fn mount(
    world: &World,
    bus: &LocalBus,
    client: Arc<InMemoryIdentityProvider>,
    api: Option<Arc<dyn ImpersonationApi>>,
) -> EngineHandle {
    let provider: Arc<dyn IdentityProvider> = client;
    IdentityEngine::mount(
        EngineDeps {
            provider,
            profiles: Arc::new(
                StaticProfileSource::new()
                    .with_profile(Profile::placeholder("admin_1"))
                    .with_profile(Profile::placeholder("user_2")),
            ),
            broadcaster: Arc::new(bus.open_tab()),
            store: world.store(),
            impersonation: api,
        },
        EngineOptions::default(),
    )
}

async fn wait_until(
    rx: &mut watch::Receiver<IdentitySnapshot>,
    condition: impl FnMut(&IdentitySnapshot) -> bool,
) -> IdentitySnapshot {
    tokio::time::timeout(WAIT, rx.wait_for(condition))
        .await
        .expect("condition reached in time")
        .expect("engine alive")
        .clone()
}

fn user_id(snapshot: &IdentitySnapshot) -> Option<&str> {
    snapshot.user.as_ref().map(|user| user.id.as_str())
}

#[tokio::test]
async fn impersonation_is_visible_in_every_tab() {
    let world = World::new();
    let bus = LocalBus::new(&ChannelConfig::default());
    let (client_a, _original) = world.admin_client();
    let api: Arc<dyn ImpersonationApi> = Arc::new(ScriptedExchange::new(&world.backend));
    let tab_a = mount(&world, &bus, client_a, Some(api));
    let tab_b = mount(&world, &bus, Arc::new(world.backend.client()), None);
    tab_a.settled().await.unwrap();
    tab_b.settled().await.unwrap();

    tab_a.start_impersonation("user_2").await.unwrap();

    let mut rx_a = tab_a.subscribe();
    let a = wait_until(&mut rx_a, |s| user_id(s) == Some("user_2") && s.is_impersonating()).await;
    assert_eq!(a.original_user_id(), Some("admin_1"));
    let mut rx_b = tab_b.subscribe();
    let b = wait_until(&mut rx_b, |s| user_id(s) == Some("user_2") && s.is_impersonating()).await;
    assert_eq!(b.original_user_id(), Some("admin_1"));

    tab_a.stop_impersonation().await.unwrap();
    wait_until(&mut rx_a, |s| user_id(s) == Some("admin_1") && !s.is_impersonating()).await;
    wait_until(&mut rx_b, |s| user_id(s) == Some("admin_1") && !s.is_impersonating()).await;
}

#[tokio::test]
async fn tab_without_exchange_reports_not_configured() {
    let world = World::new();
    let bus = LocalBus::new(&ChannelConfig::default());
    let (client, _original) = world.admin_client();
    let tab = mount(&world, &bus, client, None);
    tab.settled().await.unwrap();

    assert_eq!(
        tab.start_impersonation("user_2").await.unwrap_err(),
        ImpersonationError::NotConfigured
    );
    assert_eq!(
        tab.stop_impersonation().await.unwrap_err(),
        ImpersonationError::NotConfigured
    );
}

#[tokio::test]
async fn tab_mounted_during_rejected_start_never_shows_impersonation() {
    let world = World::new();
    let bus = LocalBus::new(&ChannelConfig::default());
    let (client, _original) = world.admin_client();
    let gated = GatedExchange::new(ScriptedExchange::rejecting(&world.backend, 403));
    let entered = Arc::clone(&gated.entered);
    let release = Arc::clone(&gated.release);
    let overlay = world.overlay(client, gated);

    let start = tokio::spawn({
        let overlay = overlay.clone();
        async move { overlay.start("user_2").await }
    });
    entered.notified().await;

    // A new tab boots while the exchange is still in flight.
    let late = mount(&world, &bus, Arc::new(world.backend.client()), None);
    let booted = late.settled().await.unwrap();
    assert_eq!(user_id(&booted), Some("admin_1"));
    assert!(!booted.is_impersonating());

    release.notify_one();
    let err = start.await.unwrap().unwrap_err();
    assert!(matches!(err, ImpersonationError::Rejected { status: 403, .. }));
    assert_eq!(world.store().load_original_user_id(), None);
    assert!(!late.snapshot().is_impersonating());
}

#[tokio::test]
async fn overlay_view_follows_store_without_user_change() {
    let world = World::new();
    let bus = LocalBus::new(&ChannelConfig::default());
    let (client_a, _original) = world.admin_client();
    let tab_a = mount(&world, &bus, Arc::clone(&client_a), None);
    tab_a.settled().await.unwrap();

    // A key left behind by a flow that never swapped the session.
    world.store().save_original_user_id("admin_1").unwrap();
    let tab_b = mount(&world, &bus, Arc::new(world.backend.client()), None);
    assert!(tab_b.settled().await.unwrap().is_impersonating());

    world.store().clear_original_user_id().unwrap();
    client_a.refresh_session().unwrap();

    let mut rx_b = tab_b.subscribe();
    let snapshot = wait_until(&mut rx_b, |s| !s.is_impersonating()).await;
    assert_eq!(user_id(&snapshot), Some("admin_1"));
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use pulse_auth::{
    EngineDeps, EngineHandle, EngineOptions, IdentityEngine, IdentityProvider, IdentitySnapshot,
    InMemoryAuthBackend, InMemoryIdentityProvider, MemoryStore, RecordingNavigator,
    RedirectDriver, RedirectGuard, SessionStore, StaticProfileSource,
};
use pulse_channel::LocalBus;
use pulse_config::PulseConfig;
use pulse_core::{AuthPhase, Permissions, Profile, Role};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::cli::{GlobalFlags, SimulateArgs};
use crate::output::output;

const DEMO_USER_ID: &str = "demo_user";
const DEMO_EMAIL: &str = "demo@example.com";
const DEMO_PASSWORD: &str = "demo-password";
const CONVERGE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct SimulationReport {
    tabs: usize,
    converged: bool,
    results: Vec<TabReport>,
}

#[derive(Debug, Serialize)]
struct TabReport {
    tab: usize,
    phase: AuthPhase,
    user_id: Option<String>,
    role: Option<Role>,
    permissions: Permissions,
    impersonating: bool,
    navigations: Vec<String>,
}

struct Tab {
    client: Arc<InMemoryIdentityProvider>,
    engine: EngineHandle,
    navigator: RecordingNavigator,
    driver: JoinHandle<()>,
}

/// Handle `pulse simulate`.
pub async fn handle(
    args: &SimulateArgs,
    config: &PulseConfig,
    flags: &GlobalFlags,
) -> anyhow::Result<()> {
    let backend = InMemoryAuthBackend::new();
    backend.add_account(DEMO_USER_ID, DEMO_EMAIL, DEMO_PASSWORD);
    let profiles = StaticProfileSource::new().with_profile(Profile {
        first_name: "Demo".into(),
        last_name: "User".into(),
        email: DEMO_EMAIL.into(),
        role: Role::TeamAdmin,
        team_id: Some("team_demo".into()),
        ..Profile::placeholder(DEMO_USER_ID)
    });
    profiles.set_unavailable(args.fail_profile);

    let bus = LocalBus::new(&config.channel);
    let storage = MemoryStore::new();
    let tabs = (0..usize::from(args.tabs))
        .map(|_| open_tab(&backend, &bus, &storage, &profiles, config))
        .collect::<Vec<_>>();

    for tab in &tabs {
        tab.engine.settled().await?;
    }
    let first = tabs.first().context("at least one tab is required")?;
    first.client.sign_in_with_password(DEMO_EMAIL, DEMO_PASSWORD)?;
    tracing::info!(tabs = tabs.len(), "signed in from tab 0");
    if !config.channel.enabled {
        refresh_siblings(&tabs)?;
    }

    let converged = wait_for_convergence(&tabs).await;
    if !converged {
        tracing::warn!("not every tab converged within {CONVERGE_TIMEOUT:?}");
    }

    let results = tabs
        .iter()
        .enumerate()
        .map(|(index, tab)| report(index, &tab.engine.snapshot(), &tab.navigator))
        .collect();
    for tab in &tabs {
        tab.engine.shutdown();
        tab.driver.abort();
    }

    output(
        &SimulationReport {
            tabs: tabs.len(),
            converged,
            results,
        },
        flags.format,
    )
}

fn open_tab(
    backend: &InMemoryAuthBackend,
    bus: &LocalBus,
    storage: &MemoryStore,
    profiles: &StaticProfileSource,
    config: &PulseConfig,
) -> Tab {
    let client = Arc::new(backend.client());
    let provider: Arc<dyn IdentityProvider> = client.clone();
    let engine = IdentityEngine::mount(
        EngineDeps {
            provider,
            profiles: Arc::new(profiles.clone()),
            broadcaster: bus.tab_broadcaster(),
            store: SessionStore::new(Arc::new(storage.clone()), &config.session),
            impersonation: None,
        },
        EngineOptions::from(config),
    );
    let navigator = RecordingNavigator::at("/login");
    let driver = RedirectDriver::spawn(
        engine.subscribe(),
        RedirectGuard::new(&config.redirect),
        Arc::new(navigator.clone()),
    );
    Tab {
        client,
        engine,
        navigator,
        driver,
    }
}

/// Without a channel, siblings only learn of the sign-in by re-verifying,
/// as a real tab would on focus.
fn refresh_siblings(tabs: &[Tab]) -> anyhow::Result<()> {
    tracing::info!("channel disabled; re-verifying sibling tabs");
    for tab in tabs.iter().skip(1) {
        tab.engine.force_refresh_user_data()?;
    }
    Ok(())
}

/// Every tab signed in, settled, and moved off the entry page.
async fn wait_for_convergence(tabs: &[Tab]) -> bool {
    tokio::time::timeout(CONVERGE_TIMEOUT, async {
        for tab in tabs {
            let mut rx = tab.engine.subscribe();
            if rx
                .wait_for(|s| s.has_session() && !s.loading)
                .await
                .is_err()
            {
                return false;
            }
            while tab.navigator.navigations().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
        true
    })
    .await
    .unwrap_or(false)
}

fn report(index: usize, snapshot: &IdentitySnapshot, navigator: &RecordingNavigator) -> TabReport {
    TabReport {
        tab: index,
        phase: snapshot.phase,
        user_id: snapshot.user.as_ref().map(|user| user.id.clone()),
        role: snapshot.profile.as_ref().map(|view| view.profile().role),
        permissions: snapshot.permissions(),
        impersonating: snapshot.is_impersonating(),
        navigations: navigator.navigations(),
    }
}

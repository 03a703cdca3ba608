//! Redirect guard: moves a signed-in tab off entry pages, at most once per
//! debounce window.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use pulse_config::RedirectConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::engine::IdentitySnapshot;

/// Admits at most one acquisition per `min_interval`.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    #[must_use]
    pub const fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    /// Take the slot if `min_interval` has passed since the last success.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if self.remaining(now).is_zero() {
            self.last = Some(now);
            true
        } else {
            false
        }
    }

    /// Time until the next acquisition can succeed.
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Duration {
        self.last.map_or(Duration::ZERO, |last| {
            self.min_interval
                .saturating_sub(now.saturating_duration_since(last))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Stay,
    Navigate(String),
    /// A navigation is due but the window is closed; re-evaluate after this long.
    Deferred(Duration),
}

#[derive(Debug, Clone)]
pub struct RedirectGuard {
    limiter: RateLimiter,
    landing_path: String,
    entry_paths: Vec<String>,
    reset_password_path: String,
}

impl RedirectGuard {
    #[must_use]
    pub fn new(config: &RedirectConfig) -> Self {
        Self {
            limiter: RateLimiter::new(config.debounce()),
            landing_path: config.landing_path.clone(),
            entry_paths: config.entry_paths.iter().map(|p| normalize_path(p)).collect(),
            reset_password_path: normalize_path(&config.reset_password_path),
        }
    }

    /// Where a tab with this identity and location belongs, ignoring timing.
    #[must_use]
    pub fn target(&self, has_session: bool, current_path: &str) -> Option<&str> {
        if !has_session {
            return None;
        }
        let path = normalize_path(current_path);
        let on_reset = path == self.reset_password_path
            || path.starts_with(&format!("{}/", self.reset_password_path));
        if on_reset {
            return None;
        }
        self.entry_paths
            .iter()
            .any(|entry| *entry == path)
            .then_some(self.landing_path.as_str())
    }

    /// Decide and, when navigating, consume the debounce slot.
    pub fn evaluate(&mut self, has_session: bool, current_path: &str, now: Instant) -> Decision {
        let Some(target) = self.target(has_session, current_path).map(str::to_string) else {
            return Decision::Stay;
        };
        if self.limiter.try_acquire(now) {
            Decision::Navigate(target)
        } else {
            Decision::Deferred(self.limiter.remaining(now))
        }
    }
}

/// Strip query and fragment and any trailing slash; the empty path is `/`.
fn normalize_path(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

// ---------------------------------------------------------------------------
// Navigation
// ---------------------------------------------------------------------------

pub trait Navigator: Send + Sync {
    fn current_path(&self) -> String;
    fn navigate(&self, path: &str);
}

#[derive(Debug, Default)]
struct History {
    current: String,
    visited: Vec<String>,
}

/// In-memory navigator. Clones share location and history.
#[derive(Debug, Clone, Default)]
pub struct RecordingNavigator {
    history: Arc<Mutex<History>>,
}

impl RecordingNavigator {
    pub fn at(path: impl Into<String>) -> Self {
        Self {
            history: Arc::new(Mutex::new(History {
                current: path.into(),
                visited: Vec::new(),
            })),
        }
    }

    /// Move without recording, like the user following a link.
    pub fn visit(&self, path: impl Into<String>) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current = path.into();
    }

    /// Navigations issued through [`Navigator::navigate`], oldest first.
    #[must_use]
    pub fn navigations(&self) -> Vec<String> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .visited
            .clone()
    }
}

impl Navigator for RecordingNavigator {
    fn current_path(&self) -> String {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .clone()
    }

    fn navigate(&self, path: &str) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.current = path.to_string();
        history.visited.push(path.to_string());
    }
}

/// Applies a [`RedirectGuard`] to every reconciled snapshot of one tab.
pub struct RedirectDriver;

impl RedirectDriver {
    /// Run until the snapshot channel closes. Must be called inside a runtime.
    pub fn spawn(
        mut snapshots: watch::Receiver<IdentitySnapshot>,
        mut guard: RedirectGuard,
        navigator: Arc<dyn Navigator>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut retry: Option<tokio::time::Instant> = None;
            loop {
                let has_session = snapshots.borrow_and_update().has_session();
                let path = navigator.current_path();
                match guard.evaluate(has_session, &path, tokio::time::Instant::now().into_std()) {
                    Decision::Navigate(target) => {
                        tracing::debug!(from = %path, to = %target, "redirecting signed-in tab");
                        navigator.navigate(&target);
                        retry = None;
                    }
                    Decision::Deferred(wait) => {
                        tracing::trace!(?wait, "redirect debounced");
                        retry = Some(tokio::time::Instant::now() + wait);
                    }
                    Decision::Stay => retry = None,
                }

                tokio::select! {
                    changed = snapshots.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    () = sleep_until(retry) => {}
                }
            }
        })
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

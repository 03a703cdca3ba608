use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use pulse_auth::{FileStore, SessionStore, is_session_valid_at};
use pulse_config::PulseConfig;
use serde::Serialize;

use crate::cli::{GlobalFlags, SessionCommands};
use crate::output::output;

#[derive(Debug, Serialize)]
struct SessionShowResponse {
    storage_dir: String,
    present: bool,
    user_id: Option<String>,
    email: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    seconds_until_expiry: Option<i64>,
    valid: bool,
    impersonating: bool,
    original_user_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct SessionClearResponse {
    storage_dir: String,
    cleared: bool,
}

/// Handle `pulse session <subcommand>`.
pub fn handle(
    action: &SessionCommands,
    config: &PulseConfig,
    flags: &GlobalFlags,
) -> anyhow::Result<()> {
    let files = FileStore::from_config(&config.session)?;
    let storage_dir = files.dir().display().to_string();
    let store = SessionStore::new(Arc::new(files), &config.session);

    match action {
        SessionCommands::Show => {
            let now = Utc::now();
            let session = store.load_session();
            let original_user_id = store.load_original_user_id();
            let response = SessionShowResponse {
                storage_dir,
                present: session.is_some(),
                user_id: session.as_ref().map(|s| s.user.id.clone()),
                email: session.as_ref().and_then(|s| s.user.email.clone()),
                expires_at: session.as_ref().map(|s| s.expires_at),
                seconds_until_expiry: session.as_ref().map(|s| s.seconds_until_expiry(now)),
                valid: is_session_valid_at(
                    session.as_ref(),
                    now,
                    config.session.expiry_margin_secs,
                ),
                impersonating: original_user_id.is_some(),
                original_user_id,
            };
            output(&response, flags.format)
        }
        SessionCommands::Clear => {
            store
                .clear_session()
                .context("failed to remove persisted session")?;
            store
                .clear_original_user_id()
                .context("failed to remove impersonation key")?;
            tracing::info!(dir = %storage_dir, "cleared persisted session");
            output(
                &SessionClearResponse {
                    storage_dir,
                    cleared: true,
                },
                flags.format,
            )
        }
    }
}

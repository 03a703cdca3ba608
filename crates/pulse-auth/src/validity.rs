use chrono::{DateTime, TimeDelta, Utc};
use pulse_core::Session;

/// Sessions expiring within this window are treated as already expired.
pub const SESSION_EXPIRY_MARGIN_SECS: i64 = 300;

/// Whether `session` is usable right now with the default margin.
///
/// Only for the optimistic bootstrap path; never a substitute for asking the
/// identity provider.
#[must_use]
pub fn is_session_valid(session: Option<&Session>) -> bool {
    is_session_valid_at(session, Utc::now(), SESSION_EXPIRY_MARGIN_SECS)
}

/// `session` is valid iff `expires_at - now > margin_secs`.
///
/// A margin too large to represent as a duration makes every session invalid.
#[must_use]
pub fn is_session_valid_at(session: Option<&Session>, now: DateTime<Utc>, margin_secs: i64) -> bool {
    let Some(margin) = TimeDelta::try_seconds(margin_secs) else {
        return false;
    };
    session.is_some_and(|session| session.expires_at - now > margin)
}

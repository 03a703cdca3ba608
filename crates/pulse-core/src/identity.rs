use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::Role;

/// Identity-provider user record.
///
/// Produced by the provider, never mutated by the application. Changes only
/// when a tab signs in or out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Whether the provider has confirmed the email address.
    #[serde(default)]
    pub email_confirmed: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            email_confirmed: false,
            created_at: None,
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub const fn with_email_confirmed(mut self, confirmed: bool) -> Self {
        self.email_confirmed = confirmed;
        self
    }
}

/// Application profile row, keyed by the provider user id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl Profile {
    /// Minimal profile used when the backend lookup fails, so the UI stays usable.
    #[must_use]
    pub fn placeholder(user_id: impl Into<String>) -> Self {
        Self {
            id: user_id.into(),
            first_name: "User".into(),
            last_name: String::new(),
            email: String::new(),
            role: Role::User,
            team_id: None,
            title: None,
        }
    }

    /// Team id, treating an empty string as "no team".
    #[must_use]
    pub fn team(&self) -> Option<&str> {
        self.team_id.as_deref().filter(|team| !team.is_empty())
    }
}

/// Capabilities derived from a profile's role and team membership.
///
/// Never persisted. Always computed from the profile it is paired with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Permissions {
    pub is_team_admin: bool,
    pub is_platform_admin: bool,
    pub has_team: bool,
    pub can_access_platform: bool,
    pub can_access_users: bool,
}

impl Permissions {
    /// Permissions of a signed-out tab.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn derive(profile: &Profile) -> Self {
        let is_team_admin = profile.role == Role::TeamAdmin;
        let is_platform_admin = profile.role == Role::PlatformAdmin;
        let has_team = profile.team().is_some();
        Self {
            is_team_admin,
            is_platform_admin,
            has_team,
            can_access_platform: is_platform_admin || has_team,
            can_access_users: is_platform_admin || (is_team_admin && has_team),
        }
    }
}

/// A profile together with the permissions computed from it.
///
/// The only way to build one is from a profile, so the pair can never disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct ProfileView {
    profile: Profile,
    permissions: Permissions,
}

impl ProfileView {
    #[must_use]
    pub fn new(profile: Profile) -> Self {
        let permissions = Permissions::derive(&profile);
        Self {
            profile,
            permissions,
        }
    }

    #[must_use]
    pub const fn profile(&self) -> &Profile {
        &self.profile
    }

    #[must_use]
    pub const fn permissions(&self) -> Permissions {
        self.permissions
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.profile.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn profile(role: Role, team_id: Option<&str>) -> Profile {
        Profile {
            id: "user_1".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            role,
            team_id: team_id.map(str::to_string),
            title: None,
        }
    }

    #[rstest]
    #[case(Role::User, None, false, false, false, false, false)]
    #[case(Role::User, Some("team_1"), false, false, true, true, false)]
    #[case(Role::TeamAdmin, None, true, false, false, false, false)]
    #[case(Role::TeamAdmin, Some("team_1"), true, false, true, true, true)]
    #[case(Role::PlatformAdmin, None, false, true, false, true, true)]
    #[case(Role::User, Some(""), false, false, false, false, false)]
    fn permissions_follow_role_and_team(
        #[case] role: Role,
        #[case] team: Option<&str>,
        #[case] is_team_admin: bool,
        #[case] is_platform_admin: bool,
        #[case] has_team: bool,
        #[case] can_access_platform: bool,
        #[case] can_access_users: bool,
    ) {
        let permissions = Permissions::derive(&profile(role, team));
        assert_eq!(
            permissions,
            Permissions {
                is_team_admin,
                is_platform_admin,
                has_team,
                can_access_platform,
                can_access_users,
            }
        );
    }

    #[test]
    fn placeholder_is_a_plain_user() {
        let placeholder = Profile::placeholder("user_9");
        assert_eq!(placeholder.id, "user_9");
        assert_eq!(placeholder.first_name, "User");
        assert!(placeholder.last_name.is_empty());
        assert!(placeholder.email.is_empty());
        assert_eq!(placeholder.role, Role::User);
        assert_eq!(Permissions::derive(&placeholder), Permissions::none());
    }

    #[test]
    fn profile_view_pairs_permissions_with_its_profile() {
        let view = ProfileView::new(profile(Role::PlatformAdmin, Some("team_1")));
        assert_eq!(view.user_id(), "user_1");
        assert!(view.permissions().is_platform_admin);
        assert_eq!(view.permissions(), Permissions::derive(view.profile()));
    }

    #[test]
    fn profile_row_tolerates_missing_columns() {
        let parsed: Profile = serde_json::from_str(r#"{"id":"user_2","role":"team_admin"}"#).unwrap();
        assert_eq!(parsed.role, Role::TeamAdmin);
        assert!(parsed.first_name.is_empty());
        assert!(parsed.team_id.is_none());
    }
}

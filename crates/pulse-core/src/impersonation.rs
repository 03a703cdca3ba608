use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Impersonation overlay of one tab.
///
/// Modelled as an enum so "impersonating without an original user" cannot be
/// represented.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImpersonationState {
    #[default]
    Inactive,
    Active {
        original_user_id: String,
    },
}

impl ImpersonationState {
    /// Rebuild the overlay from the persisted original-user key.
    #[must_use]
    pub fn from_original(original_user_id: Option<String>) -> Self {
        match original_user_id {
            Some(id) if !id.trim().is_empty() => Self::Active {
                original_user_id: id,
            },
            _ => Self::Inactive,
        }
    }

    #[must_use]
    pub const fn is_impersonating(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    #[must_use]
    pub fn original_user_id(&self) -> Option<&str> {
        match self {
            Self::Active { original_user_id } => Some(original_user_id),
            Self::Inactive => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_always_carries_original_user() {
        let state = ImpersonationState::from_original(Some("admin_1".into()));
        assert!(state.is_impersonating());
        assert_eq!(state.original_user_id(), Some("admin_1"));
    }

    #[test]
    fn missing_or_blank_key_is_inactive() {
        assert_eq!(
            ImpersonationState::from_original(None),
            ImpersonationState::Inactive
        );
        let blank = ImpersonationState::from_original(Some("  ".into()));
        assert!(!blank.is_impersonating());
        assert!(blank.original_user_id().is_none());
    }

    #[test]
    fn serializes_with_status_tag() {
        let json = serde_json::to_value(ImpersonationState::Active {
            original_user_id: "admin_1".into(),
        })
        .unwrap();
        assert_eq!(json["status"], "active");
        assert_eq!(json["original_user_id"], "admin_1");
    }
}

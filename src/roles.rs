//! Role identifiers, role types and permission records.
//!
//! Roles are referenced by a numeric [RoleId]. Each role carries a [RoleType] used to
//! keep dangerous roles (moderators, administrators) out of promotion targets, and a
//! [RolePermissions] record whose `requires_approval` flag marks roles whose posts
//! land in the moderation queue.
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Numeric role identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(pub u32);

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u32);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The set of roles a user holds. Ordered so persisted files stay stable.
pub type RoleSet = BTreeSet<RoleId>;

/// Broad category of a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleType {
    Guest,
    Unconfirmed,
    Applicant,
    Member,
    Moderator,
    Administrator,
}

impl RoleType {
    /// Roles of this type are never offered as promotion sources or targets.
    pub fn is_privileged(self) -> bool {
        matches!(self, RoleType::Moderator | RoleType::Administrator)
    }
}

/// Permission flags relevant to moderation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermissions {
    /// Posts by holders of this role must be approved before they are visible.
    #[serde(default)]
    pub requires_approval: bool,
    /// Holders may manage site settings (including the promotion rule).
    #[serde(default)]
    pub manage_settings: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub role_type: RoleType,
    #[serde(default)]
    pub permissions: RolePermissions,
}

/// Roles an administrator may pick in the promotion settings.
///
/// Moderator and administrator roles are filtered out; handing those out automatically
/// is never what the rule is for.
pub fn selectable_roles(roles: &[Role]) -> Vec<Role> {
    roles
        .iter()
        .filter(|r| !r.role_type.is_privileged())
        .cloned()
        .collect()
}

/// First role of type [RoleType::Member], used as the default promotion target.
pub fn default_member_role(roles: &[Role]) -> Option<RoleId> {
    roles
        .iter()
        .find(|r| r.role_type == RoleType::Member)
        .map(|r| r.id)
}

/// The stock role table seeded into a fresh data directory.
pub fn default_roles() -> Vec<Role> {
    let plain = RolePermissions::default();
    vec![
        Role {
            id: RoleId(2),
            name: "Guest".into(),
            role_type: RoleType::Guest,
            permissions: plain.clone(),
        },
        Role {
            id: RoleId(3),
            name: "Unconfirmed".into(),
            role_type: RoleType::Unconfirmed,
            permissions: RolePermissions {
                requires_approval: true,
                manage_settings: false,
            },
        },
        Role {
            id: RoleId(4),
            name: "Applicant".into(),
            role_type: RoleType::Applicant,
            permissions: RolePermissions {
                requires_approval: true,
                manage_settings: false,
            },
        },
        Role {
            id: RoleId(8),
            name: "Member".into(),
            role_type: RoleType::Member,
            permissions: plain,
        },
        Role {
            id: RoleId(32),
            name: "Moderator".into(),
            role_type: RoleType::Moderator,
            permissions: RolePermissions::default(),
        },
        Role {
            id: RoleId(16),
            name: "Administrator".into(),
            role_type: RoleType::Administrator,
            permissions: RolePermissions {
                requires_approval: false,
                manage_settings: true,
            },
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectable_roles_skip_moderators_and_admins() {
        let picked = selectable_roles(&default_roles());
        assert!(picked.iter().all(|r| !r.role_type.is_privileged()));
        assert!(picked.iter().any(|r| r.name == "Member"));
        assert!(!picked.iter().any(|r| r.name == "Administrator"));
    }

    #[test]
    fn default_member_role_is_found() {
        assert_eq!(default_member_role(&default_roles()), Some(RoleId(8)));
        assert_eq!(default_member_role(&[]), None);
    }

    #[test]
    fn role_ids_serialize_as_plain_numbers() {
        let json = serde_json::to_string(&vec![RoleId(3), RoleId(8)]).unwrap();
        assert_eq!(json, "[3,8]");
    }
}

//! Promotion rule validation, run when the settings form is submitted.

use crate::roles::{Role, RoleId};
use crate::rule::{PromotionRule, RuleCandidate, RuleField};
use crate::store::{RolePermissionLookup, StoreError};

/// Rule validation errors with messages suitable for the settings form.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("{} is required", .field.label())]
    MissingField { field: RuleField },

    #[error("{} must be a whole number of zero or more", .field.label())]
    NotAnInteger { field: RuleField },

    #[error("{} is too large", .field.label())]
    TooLarge { field: RuleField },

    #[error("Please set either min. comment/discussion count or post count, but not both")]
    ConflictingThresholds,

    #[error("This role needs its posts approved, so promoting users into it does not make sense")]
    TargetRoleRequiresModeration { role: RoleId },

    #[error("Role {role} does not exist")]
    UnknownRole { field: RuleField, role: RoleId },

    #[error("Moderator and administrator roles cannot be used for automatic promotion")]
    PrivilegedRole { field: RuleField, role: RoleId },

    #[error("Users cannot be promoted into the role they already hold")]
    SameRole { role: RoleId },

    #[error("Role permissions could not be checked: {0}")]
    Lookup(#[source] StoreError),
}

impl ValidationError {
    /// Form field the error should be shown next to.
    pub fn field(&self) -> Option<RuleField> {
        match self {
            ValidationError::MissingField { field }
            | ValidationError::NotAnInteger { field }
            | ValidationError::TooLarge { field }
            | ValidationError::UnknownRole { field, .. }
            | ValidationError::PrivilegedRole { field, .. } => Some(*field),
            ValidationError::ConflictingThresholds => Some(RuleField::MinPosts),
            ValidationError::TargetRoleRequiresModeration { .. }
            | ValidationError::SameRole { .. } => Some(RuleField::ToRoleId),
            ValidationError::Lookup(_) => None,
        }
    }
}

/// Parse one required non-negative integer field.
fn require_integer(candidate: &RuleCandidate, field: RuleField) -> Result<u32, ValidationError> {
    let raw = candidate
        .field(field)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ValidationError::MissingField { field })?;

    // Reject signs and decimals outright; u32 parsing would accept a leading '+'
    if !raw.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::NotAnInteger { field });
    }
    // Only overflow is left once every character is a digit
    raw.parse::<u32>()
        .map_err(|_| ValidationError::TooLarge { field })
}

/// Find a role the rule may refer to. Privileged roles are never offered on the form and
/// are refused here as well.
fn selectable_role<'a>(
    roles: &'a [Role],
    field: RuleField,
    role: RoleId,
) -> Result<&'a Role, ValidationError> {
    let found = roles
        .iter()
        .find(|r| r.id == role)
        .ok_or(ValidationError::UnknownRole { field, role })?;
    if found.role_type.is_privileged() {
        return Err(ValidationError::PrivilegedRole { field, role });
    }
    Ok(found)
}

/// Validate a submitted rule.
///
/// Exactly one problem is reported. Checks run in this order: presence and integer
/// format of each field, the threshold-family conflict, the target role, the source role,
/// then that the two roles differ.
pub fn validate(
    candidate: &RuleCandidate,
    permissions: &dyn RolePermissionLookup,
) -> Result<PromotionRule, ValidationError> {
    let mut values = [0u32; 5];
    for (slot, field) in values.iter_mut().zip(RuleField::VALIDATION_ORDER) {
        *slot = require_integer(candidate, field)?;
    }
    let [to_role, from_role, min_comments, min_discussions, min_posts] = values;

    if min_posts != 0 && min_comments.saturating_add(min_discussions) != 0 {
        return Err(ValidationError::ConflictingThresholds);
    }

    let roles = permissions.list_roles().map_err(ValidationError::Lookup)?;
    let to_role = RoleId(to_role);
    let target = selectable_role(&roles, RuleField::ToRoleId, to_role)?;
    if target.permissions.requires_approval {
        return Err(ValidationError::TargetRoleRequiresModeration { role: to_role });
    }
    let from_role = RoleId(from_role);
    selectable_role(&roles, RuleField::FromRoleId, from_role)?;
    if from_role == to_role {
        return Err(ValidationError::SameRole { role: to_role });
    }

    Ok(PromotionRule {
        min_comments,
        min_discussions,
        min_posts,
        from_role,
        to_role,
    })
}

//! Promotion decision logic.
//!
//! Everything here is pure: callers fetch counts and role membership, pass them in, and
//! act on the returned [PromotionOutcome]. Nothing is written from this module.
use crate::roles::{RoleId, RoleSet, UserId};
use crate::rule::{PromotionRule, ThresholdMode, UserActivityCounts};

/// Why an evaluation did not promote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoActionReason {
    /// Every minimum is zero, or the source and target role are the same.
    RuleInactive,
    BelowThreshold,
    /// The user does not hold the source role (already promoted, or never had it).
    MissingSourceRole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionOutcome {
    NoAction(NoActionReason),
    Promote {
        user_id: UserId,
        removed_role: RoleId,
        added_role: RoleId,
    },
}

impl PromotionOutcome {
    pub fn is_promote(&self) -> bool {
        matches!(self, PromotionOutcome::Promote { .. })
    }
}

/// Whether `counts` meet the rule's thresholds. Thresholds are inclusive.
pub fn passes_thresholds(rule: &PromotionRule, counts: &UserActivityCounts) -> bool {
    match rule.mode() {
        Some(ThresholdMode::Separate) => {
            counts.comments >= u64::from(rule.min_comments)
                && counts.discussions >= u64::from(rule.min_discussions)
        }
        Some(ThresholdMode::Combined) => counts.total() >= u64::from(rule.min_posts),
        None => false,
    }
}

/// Decide whether `user_id` should be moved from the rule's source role to its target.
pub fn evaluate(
    rule: &PromotionRule,
    user_id: UserId,
    counts: &UserActivityCounts,
    current_roles: &RoleSet,
) -> PromotionOutcome {
    if !rule.is_active() {
        return PromotionOutcome::NoAction(NoActionReason::RuleInactive);
    }
    if !passes_thresholds(rule, counts) {
        return PromotionOutcome::NoAction(NoActionReason::BelowThreshold);
    }
    if !current_roles.contains(&rule.from_role) {
        return PromotionOutcome::NoAction(NoActionReason::MissingSourceRole);
    }
    PromotionOutcome::Promote {
        user_id,
        removed_role: rule.from_role,
        added_role: rule.to_role,
    }
}

/// Role set after swapping `removed` for `added`.
pub fn promoted_roles(current: &RoleSet, removed: RoleId, added: RoleId) -> RoleSet {
    let mut roles = current.clone();
    roles.remove(&removed);
    roles.insert(added);
    roles
}

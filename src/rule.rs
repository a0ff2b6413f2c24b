//! The promotion rule and the raw form values it is built from.
//!
//! A [PromotionRule] is a flat record of five values persisted under the keys in
//! [RuleField::key]. Thresholds come in two mutually exclusive families: separate
//! comment/discussion minimums, or a single combined post minimum.
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::roles::RoleId;
use crate::store::{ConfigStore, StoreError};

/// One of the five persisted rule settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleField {
    MinComments,
    MinDiscussions,
    MinPosts,
    FromRoleId,
    ToRoleId,
}

impl RuleField {
    /// Order in which fields are checked when a form is submitted.
    pub const VALIDATION_ORDER: [RuleField; 5] = [
        RuleField::ToRoleId,
        RuleField::FromRoleId,
        RuleField::MinComments,
        RuleField::MinDiscussions,
        RuleField::MinPosts,
    ];

    pub fn key(self) -> &'static str {
        match self {
            RuleField::MinComments => "promotion.min_comments",
            RuleField::MinDiscussions => "promotion.min_discussions",
            RuleField::MinPosts => "promotion.min_posts",
            RuleField::FromRoleId => "promotion.from_role_id",
            RuleField::ToRoleId => "promotion.to_role_id",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RuleField::MinComments => "Min. comments",
            RuleField::MinDiscussions => "Min. discussions",
            RuleField::MinPosts => "Min. posts",
            RuleField::FromRoleId => "Current role",
            RuleField::ToRoleId => "New role",
        }
    }

    pub fn from_key(key: &str) -> Option<RuleField> {
        Self::VALIDATION_ORDER.into_iter().find(|f| f.key() == key)
    }
}

impl fmt::Display for RuleField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Which threshold family a rule uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdMode {
    /// Separate comment and discussion minimums, both must be met.
    Separate,
    /// Comments plus discussions against one minimum.
    Combined,
}

/// Validated promotion rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionRule {
    pub min_comments: u32,
    pub min_discussions: u32,
    pub min_posts: u32,
    pub from_role: RoleId,
    pub to_role: RoleId,
}

impl PromotionRule {
    /// A rule with every minimum at zero, or one whose source and target role are the
    /// same, never promotes anyone.
    pub fn is_active(&self) -> bool {
        self.mode().is_some() && self.from_role != self.to_role
    }

    /// Separate minimums take precedence if a stored rule somehow carries both families.
    pub fn mode(&self) -> Option<ThresholdMode> {
        if self.min_comments > 0 || self.min_discussions > 0 {
            Some(ThresholdMode::Separate)
        } else if self.min_posts > 0 {
            Some(ThresholdMode::Combined)
        } else {
            None
        }
    }

    pub fn to_entries(&self) -> Vec<(&'static str, String)> {
        vec![
            (RuleField::MinComments.key(), self.min_comments.to_string()),
            (RuleField::MinDiscussions.key(), self.min_discussions.to_string()),
            (RuleField::MinPosts.key(), self.min_posts.to_string()),
            (RuleField::FromRoleId.key(), self.from_role.to_string()),
            (RuleField::ToRoleId.key(), self.to_role.to_string()),
        ]
    }

    /// Read the stored rule without re-validating it.
    ///
    /// Returns `Ok(None)` when any setting is absent or unreadable, which is how an
    /// unconfigured installation looks.
    pub fn load(store: &dyn ConfigStore) -> Result<Option<PromotionRule>, StoreError> {
        let candidate = RuleCandidate::load(store)?;
        Ok(parse_rule(&candidate))
    }
}

fn parse_rule(candidate: &RuleCandidate) -> Option<PromotionRule> {
    Some(PromotionRule {
        min_comments: parse_stored(&candidate.min_comments, RuleField::MinComments)?,
        min_discussions: parse_stored(&candidate.min_discussions, RuleField::MinDiscussions)?,
        min_posts: parse_stored(&candidate.min_posts, RuleField::MinPosts)?,
        from_role: RoleId(parse_stored(&candidate.from_role, RuleField::FromRoleId)?),
        to_role: RoleId(parse_stored(&candidate.to_role, RuleField::ToRoleId)?),
    })
}

fn parse_stored(value: &Option<String>, field: RuleField) -> Option<u32> {
    let raw = value.as_deref()?;
    match raw.trim().parse::<u32>() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!("Ignoring promotion rule: stored {} is not a whole number ({:?})", field, raw);
            None
        }
    }
}

/// Post counts for one user, fetched fresh for every evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserActivityCounts {
    pub comments: u64,
    pub discussions: u64,
}

impl UserActivityCounts {
    pub fn total(&self) -> u64 {
        self.comments.saturating_add(self.discussions)
    }
}

/// Unvalidated settings as submitted through the form (or read back from storage).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCandidate {
    pub min_comments: Option<String>,
    pub min_discussions: Option<String>,
    pub min_posts: Option<String>,
    pub from_role: Option<String>,
    pub to_role: Option<String>,
}

impl RuleCandidate {
    pub fn field(&self, field: RuleField) -> Option<&str> {
        let value = match field {
            RuleField::MinComments => &self.min_comments,
            RuleField::MinDiscussions => &self.min_discussions,
            RuleField::MinPosts => &self.min_posts,
            RuleField::FromRoleId => &self.from_role,
            RuleField::ToRoleId => &self.to_role,
        };
        value.as_deref()
    }

    pub fn set_field(&mut self, field: RuleField, value: impl Into<String>) {
        let slot = match field {
            RuleField::MinComments => &mut self.min_comments,
            RuleField::MinDiscussions => &mut self.min_discussions,
            RuleField::MinPosts => &mut self.min_posts,
            RuleField::FromRoleId => &mut self.from_role,
            RuleField::ToRoleId => &mut self.to_role,
        };
        *slot = Some(value.into());
    }

    /// Build a candidate from posted `key=value` pairs. Unknown keys are ignored.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut candidate = RuleCandidate::default();
        for (key, value) in pairs {
            if let Some(field) = RuleField::from_key(key) {
                candidate.set_field(field, value);
            }
        }
        candidate
    }

    /// Current stored values, used to pre-fill the form.
    pub fn load(store: &dyn ConfigStore) -> Result<Self, StoreError> {
        let mut candidate = RuleCandidate::default();
        for field in RuleField::VALIDATION_ORDER {
            if let Some(value) = store.get(field.key())? {
                candidate.set_field(field, value);
            }
        }
        Ok(candidate)
    }
}

impl From<&PromotionRule> for RuleCandidate {
    fn from(rule: &PromotionRule) -> Self {
        let mut candidate = RuleCandidate::default();
        for (key, value) in rule.to_entries() {
            if let Some(field) = RuleField::from_key(key) {
                candidate.set_field(field, value);
            }
        }
        candidate
    }
}

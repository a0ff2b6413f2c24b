//! Restore-event handler that promotes users once enough of their posts are approved.
//!
//! For each approved pending comment or discussion the handler:
//!
//! 1. loads the promotion rule from the settings store (skipping if unconfigured),
//! 2. counts the author's comments and discussions,
//! 3. takes the author's per-user lock, re-reads their roles and evaluates the rule,
//! 4. on promotion writes the new role set in one call, queues a forced
//!    `RolePromotion` notification and returns a confirmation for the moderator.
//!
//! The per-user lock guarantees that two approvals racing for the same author produce at
//! most one role swap: the second one re-reads the roles after the first has written them
//! and finds the source role gone.
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use crate::evaluator::{evaluate, promoted_roles, NoActionReason, PromotionOutcome};
use crate::events::{LogOperation, RecordRestored, RecordType, RestoreListener};
use crate::notify::{EnqueueOptions, Notification, POPUP_PREFERENCE_KEY, ROLE_PROMOTION};
use crate::roles::{RoleId, UserId};
use crate::rule::{PromotionRule, UserActivityCounts};
use crate::store::{
    ConfigStore, NotificationQueue, RecordCounter, RolePermissionLookup, RoleStore, StoreError,
    UserDirectory,
};

/// The forum services the handler and settings form talk to.
#[derive(Clone)]
pub struct Collaborators {
    pub counter: Arc<dyn RecordCounter>,
    pub roles: Arc<dyn RoleStore>,
    pub permissions: Arc<dyn RolePermissionLookup>,
    pub notifications: Arc<dyn NotificationQueue>,
    pub settings: Arc<dyn ConfigStore>,
    pub users: Arc<dyn UserDirectory>,
}

impl Collaborators {
    /// Use one backend for every collaborator.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: RecordCounter
            + RoleStore
            + RolePermissionLookup
            + NotificationQueue
            + ConfigStore
            + UserDirectory
            + 'static,
    {
        Collaborators {
            counter: backend.clone(),
            roles: backend.clone(),
            permissions: backend.clone(),
            notifications: backend.clone(),
            settings: backend.clone(),
            users: backend,
        }
    }
}

/// Why an event led to no promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Not an approval of a pending comment or discussion.
    NotAPendingPost,
    /// One or more rule settings are missing.
    RuleNotConfigured,
    Evaluation(NoActionReason),
}

/// A committed promotion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    pub user_id: UserId,
    pub removed_role: RoleId,
    pub added_role: RoleId,
    /// Transient confirmation for whoever approved the post.
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Skipped(SkipReason),
    Promoted(Promotion),
}

#[derive(Debug, Error)]
pub enum PromotionError {
    #[error("failed to load promotion data for user {user_id}: {source}")]
    Fetch {
        user_id: UserId,
        #[source]
        source: StoreError,
    },

    #[error("failed to apply promotion for user {user_id}: {source}")]
    Persistence {
        user_id: UserId,
        #[source]
        source: StoreError,
    },

    /// The role change was saved; only the notification to the user failed.
    #[error("user {} was promoted but could not be notified: {source}", .promotion.user_id)]
    Notification {
        promotion: Box<Promotion>,
        #[source]
        source: StoreError,
    },
}

impl PromotionError {
    /// Message safe to show to the moderator who triggered the event.
    pub fn user_message(&self) -> &'static str {
        match self {
            PromotionError::Fetch { .. } => "The post was approved, but the author's promotion could not be checked.",
            PromotionError::Persistence { .. } => "The post was approved, but the author could not be promoted.",
            PromotionError::Notification { .. } => {
                "The post was approved and the author promoted, but they could not be notified."
            }
        }
    }

    /// The committed promotion, if the error happened after the roles were saved.
    pub fn promotion(&self) -> Option<&Promotion> {
        match self {
            PromotionError::Notification { promotion, .. } => Some(promotion.as_ref()),
            _ => None,
        }
    }
}

const MAX_ROLE_WRITE_ATTEMPTS: u32 = 3;

/// Per-user mutexes, created on demand and dropped once nobody waits on them.
#[derive(Default)]
struct UserLocks {
    slots: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl UserLocks {
    fn slot(&self, user_id: UserId) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(user_id).or_default().clone()
    }

    fn release(&self, user_id: UserId, slot: Arc<Mutex<()>>) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // one reference in the map, one held here
        if Arc::strong_count(&slot) == 2 {
            slots.remove(&user_id);
        }
    }
}

pub struct PromotionHandler {
    collab: Collaborators,
    locks: UserLocks,
}

impl PromotionHandler {
    pub fn new(collab: Collaborators) -> Self {
        PromotionHandler {
            collab,
            locks: UserLocks::default(),
        }
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collab
    }

    /// Handle one restore event.
    pub fn handle(&self, event: &RecordRestored) -> Result<RestoreOutcome, PromotionError> {
        if event.operation != LogOperation::Pending || !event.record_type.is_post() {
            return Ok(RestoreOutcome::Skipped(SkipReason::NotAPendingPost));
        }
        let user_id = event.user_id;
        let fetch = |source: StoreError| PromotionError::Fetch { user_id, source };

        let rule = match PromotionRule::load(self.collab.settings.as_ref()).map_err(fetch)? {
            Some(rule) => rule,
            None => {
                debug!("Promotion rule not configured; ignoring approval for user {}", user_id);
                return Ok(RestoreOutcome::Skipped(SkipReason::RuleNotConfigured));
            }
        };
        if !rule.is_active() {
            return Ok(RestoreOutcome::Skipped(SkipReason::Evaluation(
                NoActionReason::RuleInactive,
            )));
        }

        let counts = UserActivityCounts {
            comments: self.collab.counter.count(RecordType::Comment, user_id).map_err(fetch)?,
            discussions: self
                .collab
                .counter
                .count(RecordType::Discussion, user_id)
                .map_err(fetch)?,
        };
        debug!(
            "User {} has {} comments and {} discussions approved",
            user_id, counts.comments, counts.discussions
        );

        let slot = self.locks.slot(user_id);
        let result = {
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            self.evaluate_locked(&rule, user_id, &counts)
        };
        self.locks.release(user_id, slot);
        result
    }

    /// Must be called with the user's lock held.
    ///
    /// The lock only covers this handler. Other processes writing the same store are
    /// caught by the conditional role write: when it reports that the roles changed
    /// underneath us they are read again and the rule re-evaluated.
    fn evaluate_locked(
        &self,
        rule: &PromotionRule,
        user_id: UserId,
        counts: &UserActivityCounts,
    ) -> Result<RestoreOutcome, PromotionError> {
        let persist = |source: StoreError| PromotionError::Persistence { user_id, source };
        let mut attempts = 0;
        let (removed_role, added_role) = loop {
            let current = self
                .collab
                .roles
                .get_roles(user_id)
                .map_err(|source| PromotionError::Fetch { user_id, source })?;

            let (removed_role, added_role) = match evaluate(rule, user_id, counts, &current) {
                PromotionOutcome::NoAction(reason) => {
                    return Ok(RestoreOutcome::Skipped(SkipReason::Evaluation(reason)))
                }
                PromotionOutcome::Promote {
                    removed_role,
                    added_role,
                    ..
                } => (removed_role, added_role),
            };
            let new_roles = promoted_roles(&current, removed_role, added_role);
            if self
                .collab
                .roles
                .replace_roles(user_id, &current, &new_roles, true)
                .map_err(persist)?
            {
                break (removed_role, added_role);
            }
            attempts += 1;
            debug!("Roles of user {} changed during promotion (attempt {})", user_id, attempts);
            if attempts >= MAX_ROLE_WRITE_ATTEMPTS {
                return Err(persist(StoreError::Unavailable(format!(
                    "roles of user {} kept changing",
                    user_id
                ))));
            }
        };
        info!(
            target: "security",
            "Promoted user {} from role {} to role {}",
            user_id, removed_role, added_role
        );

        let promotion = Promotion {
            user_id,
            removed_role,
            added_role,
            message: self.confirmation(user_id),
        };
        // The roles are committed; a failed notice must not read as a failed promotion
        if let Err(source) = self.notify(user_id, added_role) {
            warn!("User {} was promoted but not notified: {}", user_id, source);
            return Err(PromotionError::Notification {
                promotion: Box::new(promotion),
                source,
            });
        }
        Ok(RestoreOutcome::Promoted(promotion))
    }

    fn notify(&self, user_id: UserId, added_role: RoleId) -> Result<(), StoreError> {
        let popup = self
            .collab
            .settings
            .get_or(POPUP_PREFERENCE_KEY, "1")
            .map(|v| v.trim() != "0")
            .unwrap_or(true);
        let notice = Notification::role_promotion(user_id, added_role, popup);
        self.collab
            .notifications
            .enqueue(notice, ROLE_PROMOTION, EnqueueOptions { force: true })?;
        self.collab.notifications.flush()?;
        Ok(())
    }

    fn confirmation(&self, user_id: UserId) -> String {
        let name = match self.collab.users.user_name(user_id) {
            Ok(Some(name)) => name,
            Ok(None) => format!("User {}", user_id),
            Err(e) => {
                warn!("Could not look up name of user {}: {}", user_id, e);
                format!("User {}", user_id)
            }
        };
        format!(
            "{} has been promoted and their posts will no longer need moderation",
            name
        )
    }
}

impl RestoreListener for PromotionHandler {
    fn name(&self) -> &str {
        "promote-on-post-count"
    }

    fn after_restore(&self, event: &RecordRestored) -> Result<RestoreOutcome, PromotionError> {
        self.handle(event)
    }
}

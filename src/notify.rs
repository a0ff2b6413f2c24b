//! Activity notifications sent to promoted users.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::roles::{RoleId, UserId};

/// Activity type used for promotion notices.
pub const ROLE_PROMOTION: &str = "RolePromotion";

/// Settings key of the user preference that turns promotion popups on.
pub const POPUP_PREFERENCE_KEY: &str = "preferences.popup.role_promotion";

/// How an activity type is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityTypeOptions {
    /// Notify the addressed user.
    pub notify: bool,
    /// Show on public activity feeds.
    pub public: bool,
}

/// Options for [crate::store::NotificationQueue::enqueue].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Deliver even if a similar notification is already queued or delivered.
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub activity_type: String,
    pub activity_user_id: UserId,
    pub regarding_user_id: UserId,
    pub notify_user_id: UserId,
    pub headline: String,
    pub story: String,
    /// Role the user was moved into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id: Option<RoleId>,
    #[serde(default)]
    pub popup: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Notice telling `user_id` their posts no longer wait for approval.
    pub fn role_promotion(user_id: UserId, role_id: RoleId, popup: bool) -> Self {
        Notification {
            id: Uuid::new_v4(),
            activity_type: ROLE_PROMOTION.to_string(),
            activity_user_id: user_id,
            regarding_user_id: user_id,
            notify_user_id: user_id,
            headline: "You have been promoted.".to_string(),
            story: "Your posts no longer require moderation.".to_string(),
            role_id: Some(role_id),
            popup,
            created_at: Utc::now(),
        }
    }

    /// Whether an unforced `other` would duplicate this notification.
    pub fn is_similar(&self, other: &Notification) -> bool {
        self.activity_type == other.activity_type && self.notify_user_id == other.notify_user_id
    }
}

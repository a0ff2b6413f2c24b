//! Typed moderation events and the listener registry.
//!
//! The forum raises a [RecordRestored] event whenever an entry leaves the moderation log,
//! e.g. a pending comment gets approved. Listeners register against the [EventBus] through
//! the [RestoreListener] trait and are invoked synchronously, in registration order.
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::handler::{PromotionError, RestoreOutcome};
use crate::roles::UserId;

/// Kind of record held in the moderation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Comment,
    Discussion,
    Activity,
    User,
}

impl RecordType {
    /// Comments and discussions are the posts that count towards promotion.
    pub fn is_post(self) -> bool {
        matches!(self, RecordType::Comment | RecordType::Discussion)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecordType::Comment => "comment",
            RecordType::Discussion => "discussion",
            RecordType::Activity => "activity",
            RecordType::User => "user",
        };
        f.write_str(s)
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "comment" => Ok(RecordType::Comment),
            "discussion" => Ok(RecordType::Discussion),
            "activity" => Ok(RecordType::Activity),
            "user" => Ok(RecordType::User),
            other => Err(format!("unknown record type '{}'", other)),
        }
    }
}

/// Why the record was in the moderation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOperation {
    /// Held for approval.
    Pending,
    Spam,
    Delete,
    Edit,
    Moderate,
}

/// A record was restored from the moderation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRestored {
    pub operation: LogOperation,
    pub record_type: RecordType,
    /// Author of the restored record.
    pub user_id: UserId,
}

impl RecordRestored {
    /// A pending comment or discussion that has just been approved.
    pub fn approved(record_type: RecordType, user_id: UserId) -> Self {
        Self {
            operation: LogOperation::Pending,
            record_type,
            user_id,
        }
    }
}

/// Receives restore events.
pub trait RestoreListener: Send + Sync {
    /// Name used in log lines.
    fn name(&self) -> &str;

    fn after_restore(&self, event: &RecordRestored) -> Result<RestoreOutcome, PromotionError>;
}

/// Static registry of restore listeners.
#[derive(Default, Clone)]
pub struct EventBus {
    restore_listeners: Vec<Arc<dyn RestoreListener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_restore(&mut self, listener: Arc<dyn RestoreListener>) {
        debug!("Registered restore listener '{}'", listener.name());
        self.restore_listeners.push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.restore_listeners.len()
    }

    /// Deliver `event` to every listener. A failing listener does not stop the others;
    /// each listener's result is returned in registration order.
    pub fn dispatch_restore(
        &self,
        event: &RecordRestored,
    ) -> Vec<Result<RestoreOutcome, PromotionError>> {
        self.restore_listeners
            .iter()
            .map(|listener| {
                let result = listener.after_restore(event);
                if let Err(e) = &result {
                    warn!("Restore listener '{}' failed: {}", listener.name(), e);
                }
                result
            })
            .collect()
    }
}

//! Collaborator interfaces the promotion logic depends on.
//!
//! The promotion core never touches files or queries directly. Everything it needs from
//! the surrounding forum (post counts, role membership, role permissions, the activity
//! queue, flat settings and user names) comes through the traits below. [crate::storage]
//! provides file-backed and in-memory implementations.
use thiserror::Error;

use crate::events::RecordType;
use crate::notify::{ActivityTypeOptions, EnqueueOptions, Notification};
use crate::roles::{Role, RoleId, RolePermissions, RoleSet, UserId};

/// Errors surfaced by collaborator implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Wrapper around IO errors (file reads, locks, renames).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapper around JSON serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Returned when fetching a record that is not present.
    #[error("record not found: {0}")]
    NotFound(String),

    /// A shared lock was poisoned or the backend is otherwise unusable.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Counts approved records authored by a user.
pub trait RecordCounter: Send + Sync {
    fn count(&self, record_type: RecordType, user_id: UserId) -> Result<u64, StoreError>;
}

/// Reads and replaces a user's role set.
pub trait RoleStore: Send + Sync {
    fn get_roles(&self, user_id: UserId) -> Result<RoleSet, StoreError>;

    /// Replace the user's roles wholesale in a single write. With `notify` set the change
    /// is recorded in the role-change audit trail.
    fn set_roles(&self, user_id: UserId, roles: &RoleSet, notify: bool) -> Result<(), StoreError>;

    /// Like [RoleStore::set_roles], but only if the user's roles still equal `expected`.
    /// Returns `false` without writing when another writer changed them first. The check
    /// and the write must be atomic with respect to every other writer of the same store.
    fn replace_roles(
        &self,
        user_id: UserId,
        expected: &RoleSet,
        roles: &RoleSet,
        notify: bool,
    ) -> Result<bool, StoreError>;
}

/// Role definitions and their permission records.
pub trait RolePermissionLookup: Send + Sync {
    /// Permissions of `role_id`; [StoreError::NotFound] if the role does not exist.
    fn get_permissions(&self, role_id: RoleId) -> Result<RolePermissions, StoreError>;

    fn list_roles(&self) -> Result<Vec<Role>, StoreError>;
}

/// Activity/notification queue.
pub trait NotificationQueue: Send + Sync {
    /// Register an activity type. Re-defining an existing type overwrites its options.
    fn define_type(&self, name: &str, options: ActivityTypeOptions) -> Result<(), StoreError>;

    /// Queue a notification. Returns `false` when an unforced notification was merged
    /// into an existing one for the same user and type.
    fn enqueue(
        &self,
        notification: Notification,
        activity_type: &str,
        options: EnqueueOptions,
    ) -> Result<bool, StoreError>;

    /// Deliver everything queued so far. Returns how many notifications were delivered.
    fn flush(&self) -> Result<usize, StoreError>;
}

/// Flat string key/value settings.
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn get_or(&self, key: &str, default: &str) -> Result<String, StoreError> {
        Ok(self.get(key)?.unwrap_or_else(|| default.to_string()))
    }

    /// Write several keys. Backends that can should make this a single write so a
    /// failure never leaves half of the entries saved.
    fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StoreError> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }
}

/// Display names for users, used in confirmation messages.
pub trait UserDirectory: Send + Sync {
    fn user_name(&self, user_id: UserId) -> Result<Option<String>, StoreError>;
}

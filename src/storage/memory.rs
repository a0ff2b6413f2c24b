//! In-memory implementation of every collaborator trait, for embedding and tests.
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::{should_queue, PostRecord, UserRecord};
use crate::events::RecordType;
use crate::notify::{ActivityTypeOptions, EnqueueOptions, Notification};
use crate::roles::{Role, RoleId, RolePermissions, RoleSet, UserId};
use crate::store::{
    ConfigStore, NotificationQueue, RecordCounter, RolePermissionLookup, RoleStore, StoreError,
    UserDirectory,
};

#[derive(Default)]
struct MemoryState {
    settings: BTreeMap<String, String>,
    roles: Vec<Role>,
    users: HashMap<UserId, UserRecord>,
    records: Vec<PostRecord>,
    activity_types: BTreeMap<String, ActivityTypeOptions>,
    pending: Vec<Notification>,
    delivered: Vec<Notification>,
    fail_role_writes: bool,
    fail_notifications: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_roles(roles: Vec<Role>) -> Self {
        let store = Self::default();
        store.state().roles = roles;
        store
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_user<I>(&self, user_id: UserId, name: &str, roles: I)
    where
        I: IntoIterator<Item = RoleId>,
    {
        let record = UserRecord {
            id: user_id,
            name: name.to_string(),
            roles: roles.into_iter().collect(),
            created_at: Utc::now(),
        };
        self.state().users.insert(user_id, record);
    }

    pub fn add_record(&self, record_type: RecordType, user_id: UserId) {
        self.state().records.push(PostRecord {
            id: Uuid::new_v4(),
            record_type,
            insert_user_id: user_id,
            approved_at: Utc::now(),
        });
    }

    /// Make subsequent `set_roles` calls fail, to exercise error paths.
    pub fn fail_role_writes(&self, fail: bool) {
        self.state().fail_role_writes = fail;
    }

    /// Make subsequent `enqueue` and `flush` calls fail.
    pub fn fail_notifications(&self, fail: bool) {
        self.state().fail_notifications = fail;
    }

    /// Notifications delivered by `flush`, oldest first.
    pub fn delivered(&self) -> Vec<Notification> {
        self.state().delivered.clone()
    }

    pub fn activity_type(&self, name: &str) -> Option<ActivityTypeOptions> {
        self.state().activity_types.get(name).copied()
    }
}

impl RecordCounter for MemoryStore {
    fn count(&self, record_type: RecordType, user_id: UserId) -> Result<u64, StoreError> {
        Ok(self
            .state()
            .records
            .iter()
            .filter(|r| r.record_type == record_type && r.insert_user_id == user_id)
            .count() as u64)
    }
}

impl RoleStore for MemoryStore {
    fn get_roles(&self, user_id: UserId) -> Result<RoleSet, StoreError> {
        self.state()
            .users
            .get(&user_id)
            .map(|u| u.roles.clone())
            .ok_or_else(|| StoreError::NotFound(format!("user {}", user_id)))
    }

    fn set_roles(&self, user_id: UserId, roles: &RoleSet, _notify: bool) -> Result<(), StoreError> {
        self.write_roles(user_id, None, roles).map(|_| ())
    }

    fn replace_roles(
        &self,
        user_id: UserId,
        expected: &RoleSet,
        roles: &RoleSet,
        _notify: bool,
    ) -> Result<bool, StoreError> {
        self.write_roles(user_id, Some(expected), roles)
    }
}

impl MemoryStore {
    fn write_roles(
        &self,
        user_id: UserId,
        expected: Option<&RoleSet>,
        roles: &RoleSet,
    ) -> Result<bool, StoreError> {
        let mut state = self.state();
        if state.fail_role_writes {
            return Err(StoreError::Unavailable("role writes disabled".into()));
        }
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", user_id)))?;
        if expected.is_some_and(|e| *e != user.roles) {
            return Ok(false);
        }
        user.roles = roles.clone();
        Ok(true)
    }
}

impl RolePermissionLookup for MemoryStore {
    fn get_permissions(&self, role_id: RoleId) -> Result<RolePermissions, StoreError> {
        self.state()
            .roles
            .iter()
            .find(|r| r.id == role_id)
            .map(|r| r.permissions.clone())
            .ok_or_else(|| StoreError::NotFound(format!("role {}", role_id)))
    }

    fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        Ok(self.state().roles.clone())
    }
}

impl NotificationQueue for MemoryStore {
    fn define_type(&self, name: &str, options: ActivityTypeOptions) -> Result<(), StoreError> {
        self.state().activity_types.insert(name.to_string(), options);
        Ok(())
    }

    fn enqueue(
        &self,
        mut notification: Notification,
        activity_type: &str,
        options: EnqueueOptions,
    ) -> Result<bool, StoreError> {
        notification.activity_type = activity_type.to_string();
        let mut state = self.state();
        if state.fail_notifications {
            return Err(StoreError::Unavailable("notification queue disabled".into()));
        }
        let queue = should_queue(
            &notification,
            options,
            state.pending.iter().chain(state.delivered.iter()),
        );
        if queue {
            state.pending.push(notification);
        }
        Ok(queue)
    }

    fn flush(&self) -> Result<usize, StoreError> {
        let mut state = self.state();
        if state.fail_notifications {
            return Err(StoreError::Unavailable("notification queue disabled".into()));
        }
        let pending = std::mem::take(&mut state.pending);
        let n = pending.len();
        state.delivered.extend(pending);
        Ok(n)
    }
}

impl ConfigStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.state().settings.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.state().settings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StoreError> {
        let mut state = self.state();
        for (key, value) in entries {
            state.settings.insert((*key).to_string(), value.clone());
        }
        Ok(())
    }
}

impl UserDirectory for MemoryStore {
    fn user_name(&self, user_id: UserId) -> Result<Option<String>, StoreError> {
        Ok(self.state().users.get(&user_id).map(|u| u.name.clone()))
    }
}

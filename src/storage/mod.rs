//! # Storage Module - File-Backed Forum Data
//!
//! Reference implementations of the collaborator traits in [crate::store]: a
//! [FileStore] over a data directory and an in-memory [MemoryStore].
//!
//! ## Layout
//!
//! ```text
//! data/
//! ├── settings.json        ← flat key/value settings (promotion rule, preferences)
//! ├── roles.json           ← role definitions with permissions
//! ├── activity_types.json  ← registered activity types
//! ├── users/<id>.json      ← user name and role ids
//! ├── records.jsonl        ← approved comments and discussions, one per line
//! ├── activity.jsonl       ← delivered notifications, one per line
//! └── audit.jsonl          ← role changes
//! ```
//!
//! ## Concurrency
//!
//! Every read-modify-write sequence runs under an exclusive `fs2` lock on a sidecar
//! `.<name>.lock` file, and replacements are written to a temp file that is renamed over
//! the destination. A crash mid-write leaves either the old or the new file, never a mix.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use modpromote::storage::FileStore;
//! use modpromote::events::RecordType;
//! use modpromote::roles::{RoleId, UserId};
//!
//! fn main() -> anyhow::Result<()> {
//!     let store = FileStore::open("./data")?;
//!     store.register_user(UserId(7), "alice", [RoleId(3)])?;
//!     store.record_post(RecordType::Comment, UserId(7))?;
//!     Ok(())
//! }
//! ```

mod memory;

pub use memory::MemoryStore;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

use crate::events::RecordType;
use crate::notify::{ActivityTypeOptions, EnqueueOptions, Notification};
use crate::roles::{default_roles, Role, RoleId, RolePermissions, RoleSet, UserId};
use crate::store::{
    ConfigStore, NotificationQueue, RecordCounter, RolePermissionLookup, RoleStore, StoreError,
    UserDirectory,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub roles: RoleSet,
    pub created_at: DateTime<Utc>,
}

/// An approved comment or discussion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: Uuid,
    pub record_type: RecordType,
    pub insert_user_id: UserId,
    pub approved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAuditEntry {
    pub timestamp: DateTime<Utc>,
    pub user_id: UserId,
    pub old_roles: RoleSet,
    pub new_roles: RoleSet,
}

/// Whether `candidate` should be queued given what is already pending or delivered.
pub(crate) fn should_queue<'a>(
    candidate: &Notification,
    options: EnqueueOptions,
    mut existing: impl Iterator<Item = &'a Notification>,
) -> bool {
    options.force || !existing.any(|n| n.is_similar(candidate))
}

/// File-backed forum data.
pub struct FileStore {
    data_dir: PathBuf,
    pending: Mutex<Vec<Notification>>,
}

impl FileStore {
    /// Open (creating if needed) a data directory. Seeds the stock role table when
    /// `roles.json` does not exist yet.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(data_dir.join("users"))?;
        let store = FileStore {
            data_dir,
            pending: Mutex::new(Vec::new()),
        };
        let roles_path = store.path("roles.json");
        if !roles_path.exists() {
            store.with_lock("roles", || {
                if !roles_path.exists() {
                    Self::write_json(&roles_path, &default_roles())?;
                }
                Ok(())
            })?;
        }
        Ok(store)
    }

    pub fn base_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    fn user_path(&self, user_id: UserId) -> PathBuf {
        self.data_dir.join("users").join(format!("{}.json", user_id))
    }

    /// Run `f` holding an exclusive lock on `.<name>.lock`.
    fn with_lock<T>(
        &self,
        name: &str,
        f: impl FnOnce() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(self.data_dir.join(format!(".{}.lock", name)))?;
        lock_file.lock_exclusive()?;
        let result = f();
        // Unlock happens when the handle drops as well; an explicit unlock failure is harmless
        let _ = lock_file.unlock();
        result
    }

    /// Write `content` to a temp file next to `path` and rename it into place.
    fn write_file_atomic(path: &Path, content: &str) -> Result<(), StoreError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let base = path.file_name().and_then(|s| s.to_str()).unwrap_or("data.json");
        let mut counter = 0u32;
        let tmp_path = loop {
            let candidate = dir.join(format!(".{}.tmp-{}-{}", base, std::process::id(), counter));
            match OpenOptions::new().write(true).create_new(true).open(&candidate) {
                Ok(mut tmp) => {
                    tmp.write_all(content.as_bytes())?;
                    tmp.flush()?;
                    let _ = tmp.sync_all();
                    break candidate;
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    counter = counter.saturating_add(1);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        };
        fs::rename(&tmp_path, path)?;
        if let Ok(dir_file) = File::open(dir) {
            let _ = dir_file.sync_all();
        }
        Ok(())
    }

    fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(value)?;
        Self::write_file_atomic(path, &content)
    }

    fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
        match fs::read_to_string(path) {
            Ok(content) => {
                // Interrupted writes on some filesystems leave leading NULs
                let normalized = content.trim_start_matches('\0');
                Ok(Some(serde_json::from_str(normalized)?))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Append one JSON line per item under the file's lock.
    fn append_lines<T: Serialize>(&self, name: &str, items: &[T]) -> Result<(), StoreError> {
        let mut buf = String::new();
        for item in items {
            buf.push_str(&serde_json::to_string(item)?);
            buf.push('\n');
        }
        let path = self.path(name);
        self.with_lock(name, || {
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            file.write_all(buf.as_bytes())?;
            file.flush()?;
            Ok(())
        })
    }

    /// Read a JSON-lines file, skipping (and logging) lines that do not parse.
    fn read_lines<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>, StoreError> {
        let file = match File::open(self.path(name)) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(item) => out.push(item),
                Err(e) => warn!("Skipping corrupt line {} of {}: {}", idx + 1, name, e),
            }
        }
        Ok(out)
    }

    fn settings_map(&self) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(Self::read_json(&self.path("settings.json"))?.unwrap_or_default())
    }

    /// Create or overwrite a user with the given roles.
    pub fn register_user<I>(&self, user_id: UserId, name: &str, roles: I) -> Result<UserRecord, StoreError>
    where
        I: IntoIterator<Item = RoleId>,
    {
        let record = UserRecord {
            id: user_id,
            name: name.to_string(),
            roles: roles.into_iter().collect(),
            created_at: Utc::now(),
        };
        let path = self.user_path(user_id);
        self.with_lock(&format!("user-{}", user_id), || Self::write_json(&path, &record))?;
        Ok(record)
    }

    pub fn get_user(&self, user_id: UserId) -> Result<Option<UserRecord>, StoreError> {
        Self::read_json(&self.user_path(user_id))
    }

    pub fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        let mut users = Vec::new();
        for entry in fs::read_dir(self.data_dir.join("users"))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_json::<UserRecord>(&path) {
                Ok(Some(user)) => users.push(user),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable user file {}: {}", path.display(), e),
            }
        }
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    /// Record an approved comment or discussion.
    pub fn record_post(&self, record_type: RecordType, user_id: UserId) -> Result<PostRecord, StoreError> {
        let record = PostRecord {
            id: Uuid::new_v4(),
            record_type,
            insert_user_id: user_id,
            approved_at: Utc::now(),
        };
        self.append_lines("records.jsonl", std::slice::from_ref(&record))?;
        Ok(record)
    }

    /// Delivered notifications, oldest first.
    pub fn activities(&self) -> Result<Vec<Notification>, StoreError> {
        self.read_lines("activity.jsonl")
    }

    pub fn role_audit(&self) -> Result<Vec<RoleAuditEntry>, StoreError> {
        self.read_lines("audit.jsonl")
    }

    pub fn activity_types(&self) -> Result<BTreeMap<String, ActivityTypeOptions>, StoreError> {
        Ok(Self::read_json(&self.path("activity_types.json"))?.unwrap_or_default())
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, Vec<Notification>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RecordCounter for FileStore {
    fn count(&self, record_type: RecordType, user_id: UserId) -> Result<u64, StoreError> {
        let records: Vec<PostRecord> = self.read_lines("records.jsonl")?;
        Ok(records
            .iter()
            .filter(|r| r.record_type == record_type && r.insert_user_id == user_id)
            .count() as u64)
    }
}

impl RoleStore for FileStore {
    fn get_roles(&self, user_id: UserId) -> Result<RoleSet, StoreError> {
        self.get_user(user_id)?
            .map(|u| u.roles)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", user_id)))
    }

    fn set_roles(&self, user_id: UserId, roles: &RoleSet, notify: bool) -> Result<(), StoreError> {
        self.write_roles(user_id, None, roles, notify).map(|_| ())
    }

    fn replace_roles(
        &self,
        user_id: UserId,
        expected: &RoleSet,
        roles: &RoleSet,
        notify: bool,
    ) -> Result<bool, StoreError> {
        self.write_roles(user_id, Some(expected), roles, notify)
    }
}

impl FileStore {
    /// Rewrite a user's roles under the `user-<id>` file lock, which every process sharing
    /// the data directory takes. With `expected` set, nothing is written unless the stored
    /// roles still match it.
    fn write_roles(
        &self,
        user_id: UserId,
        expected: Option<&RoleSet>,
        roles: &RoleSet,
        notify: bool,
    ) -> Result<bool, StoreError> {
        let path = self.user_path(user_id);
        let old_roles = self.with_lock(&format!("user-{}", user_id), || {
            let mut user: UserRecord = Self::read_json(&path)?
                .ok_or_else(|| StoreError::NotFound(format!("user {}", user_id)))?;
            if expected.is_some_and(|e| *e != user.roles) {
                return Ok(None);
            }
            let old = std::mem::replace(&mut user.roles, roles.clone());
            Self::write_json(&path, &user)?;
            Ok(Some(old))
        })?;
        let Some(old_roles) = old_roles else {
            debug!("Roles of user {} changed concurrently; not overwriting", user_id);
            return Ok(false);
        };
        if notify {
            let entry = RoleAuditEntry {
                timestamp: Utc::now(),
                user_id,
                old_roles,
                new_roles: roles.clone(),
            };
            if let Err(e) = self.append_lines("audit.jsonl", std::slice::from_ref(&entry)) {
                warn!("Role change for user {} saved but not audited: {}", user_id, e);
            }
        }
        Ok(true)
    }
}

impl RolePermissionLookup for FileStore {
    fn get_permissions(&self, role_id: RoleId) -> Result<RolePermissions, StoreError> {
        self.list_roles()?
            .into_iter()
            .find(|r| r.id == role_id)
            .map(|r| r.permissions)
            .ok_or_else(|| StoreError::NotFound(format!("role {}", role_id)))
    }

    fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        Ok(Self::read_json(&self.path("roles.json"))?.unwrap_or_default())
    }
}

impl NotificationQueue for FileStore {
    fn define_type(&self, name: &str, options: ActivityTypeOptions) -> Result<(), StoreError> {
        let path = self.path("activity_types.json");
        self.with_lock("activity_types", || {
            let mut types: BTreeMap<String, ActivityTypeOptions> =
                Self::read_json(&path)?.unwrap_or_default();
            types.insert(name.to_string(), options);
            Self::write_json(&path, &types)
        })
    }

    fn enqueue(
        &self,
        mut notification: Notification,
        activity_type: &str,
        options: EnqueueOptions,
    ) -> Result<bool, StoreError> {
        notification.activity_type = activity_type.to_string();
        let delivered = if options.force { Vec::new() } else { self.activities()? };
        let mut pending = self.pending();
        if !should_queue(&notification, options, pending.iter().chain(delivered.iter())) {
            return Ok(false);
        }
        pending.push(notification);
        Ok(true)
    }

    fn flush(&self) -> Result<usize, StoreError> {
        let mut pending = self.pending();
        if pending.is_empty() {
            return Ok(0);
        }
        // Keep the queue intact if the append fails
        self.append_lines("activity.jsonl", pending.as_slice())?;
        let n = pending.len();
        pending.clear();
        Ok(n)
    }
}

impl ConfigStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.settings_map()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.set_many(&[(key, value.to_string())])
    }

    fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StoreError> {
        let path = self.path("settings.json");
        self.with_lock("settings", || {
            let mut settings = self.settings_map()?;
            for (key, value) in entries {
                settings.insert((*key).to_string(), value.clone());
            }
            Self::write_json(&path, &settings)
        })
    }
}

impl UserDirectory for FileStore {
    fn user_name(&self, user_id: UserId) -> Result<Option<String>, StoreError> {
        Ok(self.get_user(user_id)?.map(|u| u.name))
    }
}

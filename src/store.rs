//! Persistence boundary for user and entity records.
//!
//! The identity core never performs I/O itself; authenticators and authorizers that
//! need stored data go through the `Store` trait. `MemoryStore` keeps everything in
//! memory and optionally mirrors it to a JSON snapshot file after every mutation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AuthError, AuthResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub name: String,
    pub password_hash: String,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub flags: i32,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn new(name: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self { name: name.into(), password_hash: password_hash.into(), admin: false, flags: 0, last_login: None }
    }
}

/// An entity granted to a user. `label` holds the full identifier path so a record
/// can be resolved into the entity forest without further lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub user: String,
    pub label: String,
    #[serde(default)]
    pub flags: i32,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
    /// Free-form per-entity stats, maintained by administrators or resource servers.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl EntityRecord {
    pub fn new(user: impl Into<String>, label: impl Into<String>, flags: i32) -> Self {
        Self { user: user.into(), label: label.into(), flags, last_login: None, attributes: BTreeMap::new() }
    }
}

/// Partial update for a user row; `None` leaves the column unchanged.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub password_hash: Option<String>,
    pub admin: Option<bool>,
    pub flags: Option<i32>,
}

/// Partial update for an entity row. `attributes` are merged into the existing map.
#[derive(Debug, Clone, Default)]
pub struct EntityUpdate {
    pub label: Option<String>,
    pub flags: Option<i32>,
    pub attributes: BTreeMap<String, String>,
}

pub trait Store: Send + Sync {
    fn get_user(&self, name: &str) -> AuthResult<Option<UserRecord>>;
    fn create_user(&self, record: UserRecord) -> AuthResult<()>;
    fn update_user(&self, name: &str, update: UserUpdate) -> AuthResult<()>;
    /// Removes the user and every entity granted to them.
    fn delete_user(&self, name: &str) -> AuthResult<()>;
    /// Names in sorted order, optionally restricted to those containing `filter`.
    fn list_users(&self, filter: Option<&str>) -> AuthResult<Vec<String>>;
    fn record_login(&self, name: &str, at: DateTime<Utc>) -> AuthResult<()>;

    fn list_entities(&self, user: &str) -> AuthResult<Vec<EntityRecord>>;
    fn get_entity(&self, user: &str, label: &str) -> AuthResult<Option<EntityRecord>>;
    fn create_entity(&self, record: EntityRecord) -> AuthResult<()>;
    fn delete_entity(&self, user: &str, label: &str) -> AuthResult<()>;
    /// Renaming onto a label the user already holds is a `Conflict`.
    fn update_entity(&self, user: &str, label: &str, update: EntityUpdate) -> AuthResult<()>;
    fn record_entity_login(&self, user: &str, label: &str, at: DateTime<Utc>) -> AuthResult<()>;
    fn get_attributes(&self, user: &str, label: &str) -> AuthResult<BTreeMap<String, String>>;

    fn is_empty(&self) -> AuthResult<bool>;
}

pub type SharedStore = Arc<dyn Store>;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreState {
    users: BTreeMap<String, UserRecord>,
    entities: BTreeMap<String, Vec<EntityRecord>>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    created_ms: i64,
    state: StoreState,
}

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
    snapshot: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    /// Open a store mirrored to `path`, loading the existing snapshot if there is one.
    pub fn open(path: impl AsRef<Path>) -> AuthResult<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let bytes = std::fs::read(&path).map_err(AuthError::storage)?;
            let snap: Snapshot = serde_json::from_slice(&bytes).map_err(AuthError::storage)?;
            if snap.version != SNAPSHOT_VERSION {
                return Err(AuthError::Storage(format!("unsupported snapshot version {}", snap.version)));
            }
            info!(target: "store", path = %path.display(), users = snap.state.users.len(), "loaded store snapshot");
            snap.state
        } else {
            StoreState::default()
        };
        Ok(Self { state: RwLock::new(state), snapshot: Some(path) })
    }

    fn save(&self, state: &StoreState) -> AuthResult<()> {
        let Some(path) = self.snapshot.as_ref() else { return Ok(()) };
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(AuthError::storage)?;
            }
        }
        let snap = Snapshot { version: SNAPSHOT_VERSION, created_ms: Utc::now().timestamp_millis(), state: state.clone() };
        let bytes = serde_json::to_vec_pretty(&snap).map_err(AuthError::storage)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes).map_err(AuthError::storage)?;
        std::fs::rename(&tmp, path).map_err(AuthError::storage)?;
        debug!(target: "store", path = %path.display(), "saved store snapshot");
        Ok(())
    }

    /// Apply `f` to a copy and publish it only once the snapshot is written, so a
    /// failed save leaves the store exactly as it was.
    fn mutate<T>(&self, f: impl FnOnce(&mut StoreState) -> AuthResult<T>) -> AuthResult<T> {
        let mut guard = self.state.write();
        if self.snapshot.is_none() {
            return f(&mut guard);
        }
        let mut next = guard.clone();
        let out = f(&mut next)?;
        self.save(&next)?;
        *guard = next;
        Ok(out)
    }
}

fn entity_mut<'a>(s: &'a mut StoreState, user: &str, label: &str) -> AuthResult<&'a mut EntityRecord> {
    s.entities
        .get_mut(user)
        .and_then(|list| list.iter_mut().find(|e| e.label == label))
        .ok_or_else(|| AuthError::NotFound(format!("entity '{label}'")))
}

impl Store for MemoryStore {
    fn get_user(&self, name: &str) -> AuthResult<Option<UserRecord>> {
        Ok(self.state.read().users.get(name).cloned())
    }

    fn create_user(&self, record: UserRecord) -> AuthResult<()> {
        self.mutate(|s| {
            if s.users.contains_key(&record.name) {
                return Err(AuthError::Conflict(format!("user '{}' already exists", record.name)));
            }
            s.users.insert(record.name.clone(), record);
            Ok(())
        })
    }

    fn update_user(&self, name: &str, update: UserUpdate) -> AuthResult<()> {
        self.mutate(|s| {
            let user = s.users.get_mut(name).ok_or_else(|| AuthError::NotFound(format!("user '{name}'")))?;
            if let Some(h) = update.password_hash { user.password_hash = h; }
            if let Some(a) = update.admin { user.admin = a; }
            if let Some(f) = update.flags { user.flags = f; }
            Ok(())
        })
    }

    fn delete_user(&self, name: &str) -> AuthResult<()> {
        self.mutate(|s| {
            if s.users.remove(name).is_none() {
                return Err(AuthError::NotFound(format!("user '{name}'")));
            }
            s.entities.remove(name);
            Ok(())
        })
    }

    fn list_users(&self, filter: Option<&str>) -> AuthResult<Vec<String>> {
        let guard = self.state.read();
        Ok(guard
            .users
            .keys()
            .filter(|n| filter.map(|f| n.contains(f)).unwrap_or(true))
            .cloned()
            .collect())
    }

    fn record_login(&self, name: &str, at: DateTime<Utc>) -> AuthResult<()> {
        self.mutate(|s| {
            let user = s.users.get_mut(name).ok_or_else(|| AuthError::NotFound(format!("user '{name}'")))?;
            user.last_login = Some(at);
            Ok(())
        })
    }

    fn list_entities(&self, user: &str) -> AuthResult<Vec<EntityRecord>> {
        let guard = self.state.read();
        if !guard.users.contains_key(user) {
            return Err(AuthError::NotFound(format!("user '{user}'")));
        }
        Ok(guard.entities.get(user).cloned().unwrap_or_default())
    }

    fn get_entity(&self, user: &str, label: &str) -> AuthResult<Option<EntityRecord>> {
        let guard = self.state.read();
        Ok(guard.entities.get(user).and_then(|list| list.iter().find(|e| e.label == label).cloned()))
    }

    fn create_entity(&self, record: EntityRecord) -> AuthResult<()> {
        self.mutate(|s| {
            if !s.users.contains_key(&record.user) {
                return Err(AuthError::NotFound(format!("user '{}'", record.user)));
            }
            let list = s.entities.entry(record.user.clone()).or_default();
            if list.iter().any(|e| e.label == record.label) {
                return Err(AuthError::Conflict(format!("entity '{}' already exists", record.label)));
            }
            list.push(record);
            Ok(())
        })
    }

    fn delete_entity(&self, user: &str, label: &str) -> AuthResult<()> {
        self.mutate(|s| {
            let list = s.entities.get_mut(user).ok_or_else(|| AuthError::NotFound(format!("entity '{label}'")))?;
            let before = list.len();
            list.retain(|e| e.label != label);
            if list.len() == before {
                return Err(AuthError::NotFound(format!("entity '{label}'")));
            }
            Ok(())
        })
    }

    fn update_entity(&self, user: &str, label: &str, update: EntityUpdate) -> AuthResult<()> {
        self.mutate(|s| {
            if let Some(new_label) = update.label.as_deref().filter(|l| *l != label) {
                let taken = s.entities.get(user).is_some_and(|list| list.iter().any(|e| e.label == new_label));
                if taken {
                    return Err(AuthError::Conflict(format!("entity '{new_label}' already exists")));
                }
            }
            let record = entity_mut(s, user, label)?;
            if let Some(l) = update.label { record.label = l; }
            if let Some(f) = update.flags { record.flags = f; }
            record.attributes.extend(update.attributes);
            Ok(())
        })
    }

    fn record_entity_login(&self, user: &str, label: &str, at: DateTime<Utc>) -> AuthResult<()> {
        self.mutate(|s| {
            entity_mut(s, user, label)?.last_login = Some(at);
            Ok(())
        })
    }

    fn get_attributes(&self, user: &str, label: &str) -> AuthResult<BTreeMap<String, String>> {
        self.get_entity(user, label)?
            .map(|e| e.attributes)
            .ok_or_else(|| AuthError::NotFound(format!("entity '{label}'")))
    }

    fn is_empty(&self) -> AuthResult<bool> { Ok(self.state.read().users.is_empty()) }
}

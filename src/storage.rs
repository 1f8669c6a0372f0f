//!
//! tripgate storage
//! ----------------
//! Transactional table store shared by every request handler.
//!
//! All tables live behind one `parking_lot::Mutex`. A transaction runs against a working copy
//! of the tables and only replaces the committed state when the closure returns `Ok`, so a
//! failed step never leaves a partial write behind. Holding the lock for the whole closure
//! serializes transactions: concurrent writers to the same row commit one after the other.
//!
//! When opened with a snapshot path the committed tables are written to disk as JSON
//! (temp file + rename) before the in-memory state is swapped, and loaded again on open.
//!
//! Unique constraints: identity external id, API key value, registration (owner, event),
//! achievement code, grant (achievement, target).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::achievements::{Achievement, AchievementGrant};
use crate::error::{AppError, AppResult};
use crate::identity::{ApiKey, ExternalProfile, Identity, IdentityId};
use crate::registration::{HistoryEntry, Registration};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tables {
    seq: u64,
    identities: BTreeMap<u64, Identity>,
    api_keys: BTreeMap<u64, ApiKey>,
    registrations: BTreeMap<u64, Registration>,
    history: Vec<HistoryEntry>,
    achievements: BTreeMap<u64, Achievement>,
    grants: Vec<AchievementGrant>,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    // --- identities ---

    pub fn identity(&self, id: IdentityId) -> Option<&Identity> { self.identities.get(&id) }

    pub fn identity_by_external(&self, external_id: &str) -> Option<&Identity> {
        self.identities.values().find(|i| i.external_id == external_id)
    }

    /// Insert or refresh the identity keyed by the provider id. Display fields are always
    /// overwritten with what the provider reported.
    pub fn upsert_identity(&mut self, profile: &ExternalProfile, now: DateTime<Utc>) -> Identity {
        let existing = self.identity_by_external(&profile.external_id).map(|i| i.id);
        let id = match existing {
            Some(id) => id,
            None => self.next_id(),
        };
        let created_at = self.identities.get(&id).map(|i| i.created_at).unwrap_or(now);
        let identity = Identity {
            id,
            external_id: profile.external_id.clone(),
            display_name: profile.display_name.clone(),
            email: profile.email.clone(),
            avatar: profile.avatar.clone(),
            created_at,
            updated_at: now,
        };
        self.identities.insert(id, identity.clone());
        identity
    }

    // --- api keys ---

    pub fn insert_api_key(&mut self, mut key: ApiKey) -> AppResult<ApiKey> {
        if self.api_key_by_value(&key.key).is_some() {
            return Err(AppError::conflict("api_key_exists", "API key value already exists"));
        }
        key.id = self.next_id();
        self.api_keys.insert(key.id, key.clone());
        Ok(key)
    }

    pub fn api_key_by_value(&self, value: &str) -> Option<&ApiKey> {
        self.api_keys.values().find(|k| k.key == value)
    }

    pub fn touch_api_key(&mut self, id: u64, now: DateTime<Utc>) -> bool {
        match self.api_keys.get_mut(&id) {
            Some(k) => { k.last_used_at = Some(now); true }
            None => false,
        }
    }

    pub fn api_keys_for(&self, owner: IdentityId) -> Vec<ApiKey> {
        self.api_keys.values().filter(|k| k.owner_id == owner).cloned().collect()
    }

    /// Owner-scoped hard delete. Returns false when no key with that id belongs to `owner`.
    pub fn delete_api_key(&mut self, owner: IdentityId, id: u64) -> bool {
        if self.api_keys.get(&id).map(|k| k.owner_id == owner).unwrap_or(false) {
            self.api_keys.remove(&id);
            true
        } else {
            false
        }
    }

    // --- registrations ---

    pub fn registration(&self, owner: IdentityId, event: &str) -> Option<&Registration> {
        self.registrations.values().find(|r| r.user_id == owner && r.event == event)
    }

    /// Insert (id 0) or overwrite a registration row.
    pub fn save_registration(&mut self, mut reg: Registration) -> AppResult<Registration> {
        if reg.id == 0 {
            if self.registration(reg.user_id, &reg.event).is_some() {
                return Err(AppError::conflict(
                    "registration_exists",
                    format!("registration for user {} and event {} already exists", reg.user_id, reg.event),
                ));
            }
            reg.id = self.next_id();
        } else if !self.registrations.contains_key(&reg.id) {
            return Err(AppError::not_found("registration_not_found", format!("registration {} not found", reg.id)));
        }
        self.registrations.insert(reg.id, reg.clone());
        Ok(reg)
    }

    pub fn registrations(&self, event: Option<&str>) -> Vec<Registration> {
        self.registrations
            .values()
            .filter(|r| event.map(|e| r.event == e).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub fn registrations_for(&self, owner: IdentityId) -> Vec<Registration> {
        self.registrations.values().filter(|r| r.user_id == owner).cloned().collect()
    }

    pub fn append_history(&mut self, mut entry: HistoryEntry) -> HistoryEntry {
        entry.id = self.next_id();
        self.history.push(entry.clone());
        entry
    }

    /// History of `owner`, newest first (creation time, then insertion order).
    pub fn history_for(&self, owner: IdentityId, event: Option<&str>) -> Vec<HistoryEntry> {
        let mut out: Vec<HistoryEntry> = self
            .history
            .iter()
            .filter(|h| h.user_id == owner && event.map(|e| h.event == e).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out
    }

    // --- achievements ---

    pub fn insert_achievement(&mut self, mut a: Achievement) -> AppResult<Achievement> {
        if self.achievement_by_code(&a.code).is_some() {
            return Err(AppError::conflict("achievement_code_taken", "an achievement with this code already exists"));
        }
        a.id = self.next_id();
        self.achievements.insert(a.id, a.clone());
        Ok(a)
    }

    pub fn achievement(&self, id: u64) -> Option<&Achievement> { self.achievements.get(&id) }

    pub fn achievement_by_code(&self, code: &str) -> Option<&Achievement> {
        self.achievements.values().find(|a| a.code == code)
    }

    pub fn grant(&self, achievement_id: u64, user_id: IdentityId) -> Option<&AchievementGrant> {
        self.grants.iter().find(|g| g.achievement_id == achievement_id && g.user_id == user_id)
    }

    pub fn insert_grant(&mut self, mut g: AchievementGrant) -> AppResult<AchievementGrant> {
        if self.grant(g.achievement_id, g.user_id).is_some() {
            return Err(AppError::conflict("already_granted", "Achievement already granted to this user"));
        }
        g.id = self.next_id();
        self.grants.push(g.clone());
        Ok(g)
    }

    pub fn grants_for(&self, user_id: IdentityId) -> Vec<AchievementGrant> {
        self.grants.iter().filter(|g| g.user_id == user_id).cloned().collect()
    }
}

struct Inner {
    tables: Mutex<Tables>,
    snapshot: Option<PathBuf>,
}

/// Cloneable handle to the shared tables.
#[derive(Clone)]
pub struct SharedStore(Arc<Inner>);

impl SharedStore {
    pub fn in_memory() -> Self {
        SharedStore(Arc::new(Inner { tables: Mutex::new(Tables::default()), snapshot: None }))
    }

    /// Open a store backed by a JSON snapshot file. A missing file starts empty.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let tables = if path.exists() {
            let raw = std::fs::read(&path).with_context(|| format!("reading store snapshot {}", path.display()))?;
            serde_json::from_slice::<Tables>(&raw).with_context(|| format!("decoding store snapshot {}", path.display()))?
        } else {
            if let Some(dir) = path.parent() {
                if !dir.as_os_str().is_empty() {
                    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
                }
            }
            Tables::default()
        };
        info!(path = %path.display(), identities = tables.identities.len(), registrations = tables.registrations.len(), "store opened");
        Ok(SharedStore(Arc::new(Inner { tables: Mutex::new(tables), snapshot: Some(path) })))
    }

    pub fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        let guard = self.0.tables.lock();
        f(&guard)
    }

    /// Run `f` atomically. Every write `f` makes is discarded unless it returns `Ok` and the
    /// snapshot (if any) was persisted.
    pub fn transaction<T>(&self, f: impl FnOnce(&mut Tables) -> AppResult<T>) -> AppResult<T> {
        let mut guard = self.0.tables.lock();
        let mut work = guard.clone();
        let out = f(&mut work)?;
        if let Some(path) = &self.0.snapshot {
            write_snapshot(path, &work)?;
        }
        *guard = work;
        Ok(out)
    }
}

fn write_snapshot(path: &Path, tables: &Tables) -> AppResult<()> {
    let bytes = serde_json::to_vec(tables)
        .map_err(|e| AppError::internal("store_snapshot_failed", format!("encoding snapshot: {}", e)))?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &bytes)
        .and_then(|_| std::fs::rename(&tmp, path))
        .map_err(|e| AppError::internal("store_snapshot_failed", format!("writing {}: {}", path.display(), e)))?;
    debug!(bytes = bytes.len(), "store snapshot written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::RegistrationFields;

    fn profile(ext: &str, name: &str) -> ExternalProfile {
        ExternalProfile { external_id: ext.into(), display_name: name.into(), ..Default::default() }
    }

    fn registration(owner: IdentityId, event: &str) -> Registration {
        let now = Utc::now();
        Registration { id: 0, user_id: owner, event: event.into(), fields: RegistrationFields::default(), created_at: now, updated_at: now }
    }

    #[test]
    fn upsert_identity_is_keyed_by_external_id() {
        let store = SharedStore::in_memory();
        let first = store.transaction(|t| Ok(t.upsert_identity(&profile("d-1", "alice"), Utc::now()))).unwrap();
        let again = store.transaction(|t| Ok(t.upsert_identity(&profile("d-1", "alice2"), Utc::now()))).unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(again.display_name, "alice2");
        assert_eq!(again.created_at, first.created_at);
        store.read(|t| assert_eq!(t.identities.len(), 1));
    }

    #[test]
    fn failed_transaction_leaves_no_trace() {
        let store = SharedStore::in_memory();
        let res: AppResult<()> = store.transaction(|t| {
            t.upsert_identity(&profile("d-1", "alice"), Utc::now());
            t.save_registration(registration(1, "ev"))?;
            Err(AppError::internal("boom", "injected failure"))
        });
        assert!(res.is_err());
        store.read(|t| {
            assert!(t.identity_by_external("d-1").is_none());
            assert!(t.registrations(None).is_empty());
        });
    }

    #[test]
    fn registration_pair_is_unique() {
        let store = SharedStore::in_memory();
        store.transaction(|t| t.save_registration(registration(1, "ev"))).unwrap();
        let dup = store.transaction(|t| t.save_registration(registration(1, "ev"))).unwrap_err();
        assert!(dup.is_conflict());
        store.transaction(|t| t.save_registration(registration(1, "other"))).unwrap();
        store.transaction(|t| t.save_registration(registration(2, "ev"))).unwrap();
        store.read(|t| assert_eq!(t.registrations(Some("ev")).len(), 2));
    }

    #[test]
    fn delete_api_key_is_owner_scoped() {
        let store = SharedStore::in_memory();
        let key = store
            .transaction(|t| t.insert_api_key(ApiKey {
                id: 0,
                owner_id: 1,
                key: "k".into(),
                name: "ci".into(),
                created_at: Utc::now(),
                expires_at: None,
                last_used_at: None,
            }))
            .unwrap();
        assert!(!store.transaction(|t| Ok(t.delete_api_key(2, key.id))).unwrap());
        assert!(store.transaction(|t| Ok(t.delete_api_key(1, key.id))).unwrap());
        store.read(|t| assert!(t.api_key_by_value("k").is_none()));
    }

    #[test]
    fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        {
            let store = SharedStore::open(&path).unwrap();
            store.transaction(|t| Ok(t.upsert_identity(&profile("d-9", "zed"), Utc::now()))).unwrap();
        }
        let reopened = SharedStore::open(&path).unwrap();
        reopened.read(|t| assert_eq!(t.identity_by_external("d-9").map(|i| i.display_name.clone()), Some("zed".to_string())));
    }
}

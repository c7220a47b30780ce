//! Collaborator interfaces the sync engine talks to, and the SQLite-backed
//! implementation used both on devices and behind the HTTP server.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::Database;
use crate::models::{
    ChangeRecord, ChangeStatus, Entity, EntityKind, Goal, ProgressEntry, Syncable,
};

/// The device-side record store.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn load_entity(&self, kind: EntityKind, id: &str) -> Result<Option<Entity>>;

    /// The local row a remote row should be reconciled with: goals match by
    /// id, progress entries by goal id and date.
    async fn find_counterpart(&self, remote: &Entity) -> Result<Option<Entity>>;

    async fn insert_entity(&self, entity: &Entity) -> Result<()>;

    /// Replace `local` with `remote` wholesale, including its id.
    async fn overwrite_entity(&self, local: &Entity, remote: &Entity) -> Result<()>;

    async fn list_pending_changes(&self) -> Result<Vec<ChangeRecord>>;

    async fn mark_change(&self, id: i64, status: ChangeStatus, at: DateTime<Utc>) -> Result<()>;

    async fn checkpoint(&self, owner_id: &str) -> Result<Option<DateTime<Utc>>>;

    async fn set_checkpoint(&self, owner_id: &str, at: DateTime<Utc>) -> Result<()>;
}

/// The shared backend every device pushes to and pulls from.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn upsert(&self, entity: &Entity) -> Result<()>;

    /// Mark a row deleted and move its `updated_at` forward to `at`, never
    /// backward. Unknown ids are an error.
    async fn soft_delete(&self, kind: EntityKind, id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Goals for the owner with `updated_at` strictly after `since`.
    async fn fetch_goals_since(&self, owner_id: &str, since: DateTime<Utc>) -> Result<Vec<Goal>>;

    /// Progress entries on the owner's goals with `updated_at` strictly after `since`.
    async fn fetch_progress_since(
        &self,
        owner_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ProgressEntry>>;
}

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteStore {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub fn lock(&self) -> MutexGuard<'_, Database> {
        self.db
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn load(db: &Database, kind: EntityKind, id: &str) -> Result<Option<Entity>> {
    Ok(match kind {
        EntityKind::Goal => db.get_goal(id)?.map(Entity::Goal),
        EntityKind::ProgressEntry => db.get_progress(id)?.map(Entity::ProgressEntry),
    })
}

fn upsert(db: &Database, entity: &Entity) -> Result<()> {
    match entity {
        Entity::Goal(goal) => db.upsert_goal(goal),
        Entity::ProgressEntry(entry) => db.upsert_progress(entry),
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn load_entity(&self, kind: EntityKind, id: &str) -> Result<Option<Entity>> {
        load(&self.lock(), kind, id)
    }

    async fn find_counterpart(&self, remote: &Entity) -> Result<Option<Entity>> {
        let db = self.lock();
        Ok(match remote {
            Entity::Goal(goal) => db.get_goal(&goal.id)?.map(Entity::Goal),
            Entity::ProgressEntry(entry) => db
                .get_progress_for_date(&entry.goal_id, entry.date)?
                .map(Entity::ProgressEntry),
        })
    }

    async fn insert_entity(&self, entity: &Entity) -> Result<()> {
        upsert(&self.lock(), entity)
    }

    async fn overwrite_entity(&self, local: &Entity, remote: &Entity) -> Result<()> {
        let db = self.lock();
        match (local, remote) {
            (Entity::Goal(_), Entity::Goal(goal)) => db.upsert_goal(goal),
            (Entity::ProgressEntry(old), Entity::ProgressEntry(entry)) => {
                if !db.overwrite_progress(&old.id, entry)? {
                    db.upsert_progress(entry)?;
                }
                Ok(())
            }
            _ => bail!(
                "Cannot overwrite {} {} with {} {}",
                local.kind(),
                local.id(),
                remote.kind(),
                remote.id()
            ),
        }
    }

    async fn list_pending_changes(&self) -> Result<Vec<ChangeRecord>> {
        self.lock().list_pending_changes()
    }

    async fn mark_change(&self, id: i64, status: ChangeStatus, at: DateTime<Utc>) -> Result<()> {
        if !self.lock().set_change_status(id, status, &at)? {
            bail!("Change record {id} not found");
        }
        Ok(())
    }

    async fn checkpoint(&self, owner_id: &str) -> Result<Option<DateTime<Utc>>> {
        self.lock().get_checkpoint(owner_id)
    }

    async fn set_checkpoint(&self, owner_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.lock().set_checkpoint(owner_id, &at)
    }
}

#[async_trait]
impl RemoteStore for SqliteStore {
    async fn upsert(&self, entity: &Entity) -> Result<()> {
        upsert(&self.lock(), entity)
    }

    async fn soft_delete(&self, kind: EntityKind, id: &str, at: DateTime<Utc>) -> Result<()> {
        let db = self.lock();
        let found = match kind {
            EntityKind::Goal => db.soft_delete_goal(id, &at)?,
            EntityKind::ProgressEntry => db.soft_delete_progress(id, &at)?,
        };
        if !found {
            bail!("{kind} {id} not found");
        }
        Ok(())
    }

    async fn fetch_goals_since(&self, owner_id: &str, since: DateTime<Utc>) -> Result<Vec<Goal>> {
        self.lock().goals_updated_since(owner_id, &since)
    }

    async fn fetch_progress_since(
        &self,
        owner_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ProgressEntry>> {
        self.lock().progress_updated_since(owner_id, &since)
    }
}

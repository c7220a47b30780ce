use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::models::{
    ChangeRecord, ChangeStatus, DashboardStats, EntityKind, Goal, GoalWithProgress, NewGoal,
    Operation, ProgressEntry, UpdateGoal, validate_goal_dates, validate_new_goal,
    validate_progress_value, validate_target,
};
use crate::progress;
use crate::store::{RemoteStore, SqliteStore};
use crate::sync::{Clock, SyncEngine, SyncFlag};

/// User-facing operations over the local store.
///
/// Every mutation writes the entity and appends one change record in the
/// same call, so the next sync pushes it.
pub struct TrackerService {
    store: SqliteStore,
    clock: Clock,
    sync_flag: SyncFlag,
}

impl TrackerService {
    pub fn new(db_path: &Path) -> Result<Self> {
        Ok(Self::from_store(SqliteStore::open(db_path)?))
    }

    pub fn new_in_memory() -> Result<Self> {
        Ok(Self::from_store(SqliteStore::open_in_memory()?))
    }

    #[must_use]
    pub fn from_store(store: SqliteStore) -> Self {
        Self {
            store,
            clock: Arc::new(Utc::now),
            sync_flag: SyncFlag::default(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// A sync engine over this service's local database. Every engine handed
    /// out shares one busy flag, so at most one of them syncs at a time.
    pub fn sync_engine<R: RemoteStore>(&self, remote: R) -> SyncEngine<SqliteStore, R> {
        SyncEngine::new(self.store.clone(), remote)
            .with_clock(Arc::clone(&self.clock))
            .with_sync_flag(self.sync_flag.clone())
    }

    pub fn is_syncing(&self) -> bool {
        self.sync_flag.is_set()
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn owner_id(&self) -> Result<String> {
        self.store.lock().get_or_create_owner_id()
    }

    // --- Goals ---

    pub fn create_goal(&self, new: &NewGoal) -> Result<Goal> {
        validate_new_goal(new)?;
        let now = self.now();
        let goal = Goal {
            id: Uuid::new_v4().to_string(),
            owner_id: new.owner_id.clone(),
            title: new.title.trim().to_string(),
            description: new.description.clone(),
            start_date: new.start_date,
            end_date: new.end_date,
            target: new.target,
            created_at: now,
            updated_at: now,
            deleted: false,
        };

        let db = self.store.lock();
        db.insert_goal(&goal)?;
        db.enqueue_change(EntityKind::Goal, &goal.id, Operation::Create)?;
        Ok(goal)
    }

    /// Returns `None` when the goal does not exist or is deleted.
    pub fn update_goal(&self, id: &str, update: &UpdateGoal) -> Result<Option<Goal>> {
        if update.is_empty() {
            bail!("Nothing to update");
        }

        let db = self.store.lock();
        let Some(mut goal) = db.get_goal(id)?.filter(|g| !g.deleted) else {
            return Ok(None);
        };

        if let Some(title) = &update.title {
            if title.trim().is_empty() {
                bail!("Goal title must not be empty");
            }
            goal.title = title.trim().to_string();
        }
        if let Some(description) = &update.description {
            goal.description.clone_from(description);
        }
        if let Some(start_date) = update.start_date {
            goal.start_date = start_date;
        }
        if let Some(end_date) = update.end_date {
            goal.end_date = end_date;
        }
        if let Some(target) = update.target {
            goal.target = target;
        }
        validate_goal_dates(goal.start_date, goal.end_date)?;
        validate_target(goal.target)?;
        goal.updated_at = self.now();

        db.update_goal(&goal)?;
        db.enqueue_change(EntityKind::Goal, &goal.id, Operation::Update)?;
        Ok(Some(goal))
    }

    /// Soft-deletes the goal. Returns false when there was nothing to delete.
    pub fn delete_goal(&self, id: &str) -> Result<bool> {
        let db = self.store.lock();
        if !db.get_goal(id)?.is_some_and(|g| !g.deleted) {
            return Ok(false);
        }
        db.soft_delete_goal(id, &self.now())?;
        db.enqueue_change(EntityKind::Goal, id, Operation::Delete)?;
        Ok(true)
    }

    // --- Progress ---

    /// Record the value for a goal on a date, replacing any earlier value
    /// logged for that same date.
    pub fn log_progress(
        &self,
        goal_id: &str,
        date: NaiveDate,
        value: f64,
        note: Option<&str>,
    ) -> Result<ProgressEntry> {
        validate_progress_value(value)?;
        let db = self.store.lock();
        if !db.get_goal(goal_id)?.is_some_and(|g| !g.deleted) {
            bail!("Goal {goal_id} not found");
        }
        let now = self.now();

        if let Some(mut entry) = db.get_progress_for_date(goal_id, date)? {
            entry.value = value;
            if let Some(note) = note {
                entry.note = note.to_string();
            } else if entry.deleted {
                entry.note.clear();
            }
            entry.deleted = false;
            entry.updated_at = now;
            db.update_progress(&entry)?;
            db.enqueue_change(EntityKind::ProgressEntry, &entry.id, Operation::Update)?;
            return Ok(entry);
        }

        let entry = ProgressEntry {
            id: Uuid::new_v4().to_string(),
            goal_id: goal_id.to_string(),
            date,
            value,
            note: note.unwrap_or_default().to_string(),
            created_at: now,
            updated_at: now,
            deleted: false,
        };
        db.insert_progress(&entry)?;
        db.enqueue_change(EntityKind::ProgressEntry, &entry.id, Operation::Create)?;
        Ok(entry)
    }

    pub fn delete_progress(&self, id: &str) -> Result<bool> {
        let db = self.store.lock();
        if !db.get_progress(id)?.is_some_and(|p| !p.deleted) {
            return Ok(false);
        }
        db.soft_delete_progress(id, &self.now())?;
        db.enqueue_change(EntityKind::ProgressEntry, id, Operation::Delete)?;
        Ok(true)
    }

    // --- Read paths ---

    pub fn list_goals(&self, owner_id: &str, today: NaiveDate) -> Result<Vec<GoalWithProgress>> {
        let db = self.store.lock();
        let mut views = Vec::new();
        for goal in db.list_goals(owner_id)? {
            let entries = db
                .list_progress_for_goal(&goal.id)
                .with_context(|| format!("Failed to load progress for goal {}", goal.id))?;
            views.push(progress::enrich(goal, &entries, today));
        }
        Ok(views)
    }

    pub fn goal_detail(
        &self,
        id: &str,
        today: NaiveDate,
    ) -> Result<Option<(GoalWithProgress, Vec<ProgressEntry>)>> {
        let db = self.store.lock();
        let Some(goal) = db.get_goal(id)?.filter(|g| !g.deleted) else {
            return Ok(None);
        };
        let entries = db.list_progress_for_goal(&goal.id)?;
        Ok(Some((progress::enrich(goal, &entries, today), entries)))
    }

    pub fn dashboard(&self, owner_id: &str, today: NaiveDate) -> Result<DashboardStats> {
        let goals = self.list_goals(owner_id, today)?;
        let today_count = self.store.lock().count_progress_on(owner_id, today)?;
        Ok(progress::dashboard_stats(&goals, today_count))
    }

    // --- Change queue ---

    pub fn list_changes(
        &self,
        status: Option<ChangeStatus>,
        limit: usize,
    ) -> Result<Vec<ChangeRecord>> {
        self.store.lock().list_changes(status, limit)
    }

    pub fn requeue_failed(&self) -> Result<usize> {
        self.store.lock().requeue_failed_changes()
    }

    pub fn last_synced_at(&self, owner_id: &str) -> Result<Option<DateTime<Utc>>> {
        self.store.lock().get_checkpoint(owner_id)
    }
}

//! The sync engine: push queued local changes, pull remote deltas through the
//! conflict resolver, then advance the owner's checkpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::models::{ChangeRecord, ChangeStatus, Entity, Operation, Syncable, validate_entity};
use crate::resolver::{Resolution, resolve};
use crate::store::{LocalStore, RemoteStore};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("a sync is already in progress")]
    AlreadyInProgress,
    #[error("pull failed: {0:#}")]
    Pull(anyhow::Error),
    #[error("local store error: {0:#}")]
    Local(anyhow::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub pushed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub inserted: usize,
    pub overwritten: usize,
    pub discarded: usize,
    pub checkpoint: Option<DateTime<Utc>>,
}

/// Serializable result of a sync call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Result<SyncReport, SyncError>> for SyncOutcome {
    fn from(result: &Result<SyncReport, SyncError>) -> Self {
        match result {
            Ok(_) => Self {
                success: true,
                error: None,
            },
            Err(e) => Self {
                success: false,
                error: Some(e.to_string()),
            },
        }
    }
}

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The "is syncing" flag. Clones share one flag, so every engine built from
/// the same flag excludes the others.
#[derive(Clone, Default)]
pub struct SyncFlag(Arc<AtomicBool>);

impl SyncFlag {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Clears the busy flag when a sync call finishes, however it finishes.
struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
    fn acquire(flag: &'a SyncFlag) -> Option<Self> {
        flag.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(&flag.0))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncEngine<L, R> {
    local: L,
    remote: R,
    syncing: SyncFlag,
    clock: Clock,
}

impl<L: LocalStore, R: RemoteStore> SyncEngine<L, R> {
    pub fn new(local: L, remote: R) -> Self {
        Self {
            local,
            remote,
            syncing: SyncFlag::default(),
            clock: Arc::new(Utc::now),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Share `flag` with other engines so only one of them syncs at a time.
    #[must_use]
    pub fn with_sync_flag(mut self, flag: SyncFlag) -> Self {
        self.syncing = flag;
        self
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.is_set()
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Run one push/pull cycle for `owner_id`.
    ///
    /// A second call while one is in flight fails with
    /// [`SyncError::AlreadyInProgress`] and touches nothing.
    pub async fn sync(&self, owner_id: &str) -> Result<SyncReport, SyncError> {
        let _guard = SyncGuard::acquire(&self.syncing).ok_or(SyncError::AlreadyInProgress)?;
        info!(owner = owner_id, "sync started");

        let mut report = SyncReport::default();
        self.push(&mut report).await?;
        let previous = self.pull(owner_id, &mut report).await?;

        let now = self.now();
        let checkpoint = previous.map_or(now, |prev| prev.max(now));
        self.local
            .set_checkpoint(owner_id, checkpoint)
            .await
            .map_err(SyncError::Local)?;
        report.checkpoint = Some(checkpoint);

        info!(
            owner = owner_id,
            pushed = report.pushed,
            failed = report.failed,
            skipped = report.skipped,
            inserted = report.inserted,
            overwritten = report.overwritten,
            discarded = report.discarded,
            "sync finished"
        );
        Ok(report)
    }

    // --- Push ---

    async fn push(&self, report: &mut SyncReport) -> Result<(), SyncError> {
        let pending = self
            .local
            .list_pending_changes()
            .await
            .map_err(SyncError::Local)?;

        for record in pending {
            let status = self.push_one(&record).await?;
            match status {
                ChangeStatus::Synced => report.pushed += 1,
                ChangeStatus::Failed => report.failed += 1,
                ChangeStatus::Skipped => report.skipped += 1,
                ChangeStatus::Pending => {}
            }
            self.local
                .mark_change(record.id, status, self.now())
                .await
                .map_err(SyncError::Local)?;
        }
        Ok(())
    }

    async fn push_one(&self, record: &ChangeRecord) -> Result<ChangeStatus, SyncError> {
        let entity = self
            .local
            .load_entity(record.entity_kind, &record.entity_id)
            .await
            .map_err(SyncError::Local)?;
        let Some(entity) = entity else {
            warn!(
                change = record.id,
                kind = %record.entity_kind,
                entity = %record.entity_id,
                "entity missing locally, skipping change"
            );
            return Ok(ChangeStatus::Skipped);
        };

        let result = match record.operation {
            Operation::Create | Operation::Update => self.remote.upsert(&entity).await,
            Operation::Delete => {
                self.remote
                    .soft_delete(entity.kind(), entity.id(), self.now())
                    .await
            }
        };

        match result {
            Ok(()) => Ok(ChangeStatus::Synced),
            Err(e) => {
                warn!(
                    change = record.id,
                    kind = %record.entity_kind,
                    entity = %record.entity_id,
                    operation = %record.operation,
                    "push failed: {e:#}"
                );
                Ok(ChangeStatus::Failed)
            }
        }
    }

    // --- Pull ---

    /// Returns the checkpoint the pull window started from.
    async fn pull(
        &self,
        owner_id: &str,
        report: &mut SyncReport,
    ) -> Result<Option<DateTime<Utc>>, SyncError> {
        let previous = self
            .local
            .checkpoint(owner_id)
            .await
            .map_err(SyncError::Local)?;
        let since = previous.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let goals = self
            .remote
            .fetch_goals_since(owner_id, since)
            .await
            .map_err(SyncError::Pull)?;
        let progress = self
            .remote
            .fetch_progress_since(owner_id, since)
            .await
            .map_err(SyncError::Pull)?;
        debug!(
            goals = goals.len(),
            progress = progress.len(),
            %since,
            "fetched remote changes"
        );

        // Goals first so progress rows land after the goals they belong to.
        let rows = goals
            .into_iter()
            .map(Entity::Goal)
            .chain(progress.into_iter().map(Entity::ProgressEntry));
        for remote in rows {
            self.apply_remote(remote, report).await?;
        }
        Ok(previous)
    }

    async fn apply_remote(&self, remote: Entity, report: &mut SyncReport) -> Result<(), SyncError> {
        if let Err(e) = validate_entity(&remote) {
            warn!(kind = %remote.kind(), entity = remote.id(), "ignoring invalid remote row: {e:#}");
            report.discarded += 1;
            return Ok(());
        }

        let local = self
            .local
            .find_counterpart(&remote)
            .await
            .map_err(SyncError::Local)?;

        match (resolve(local.as_ref(), &remote), local) {
            (Resolution::Insert, _) => {
                self.local
                    .insert_entity(&remote)
                    .await
                    .map_err(SyncError::Local)?;
                report.inserted += 1;
            }
            (Resolution::Overwrite, Some(local)) => {
                self.local
                    .overwrite_entity(&local, &remote)
                    .await
                    .map_err(SyncError::Local)?;
                report.overwritten += 1;
            }
            (Resolution::KeepLocal | Resolution::Overwrite, _) => {
                debug!(kind = %remote.kind(), entity = remote.id(), "local row is newer, discarding remote");
                report.discarded += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityKind, Goal, NewGoal, ProgressEntry};
    use crate::service::TrackerService;
    use crate::store::SqliteStore;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn fixed_clock(s: &str) -> Clock {
        let at = ts(s);
        Arc::new(move || at)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn goal(id: &str, updated_at: &str) -> Goal {
        Goal {
            id: id.to_string(),
            owner_id: "alice".to_string(),
            title: format!("Goal {id}"),
            description: String::new(),
            start_date: date(2024, 1, 1),
            end_date: date(2024, 1, 10),
            target: Some(10.0),
            created_at: ts("2024-01-01T00:00:00Z"),
            updated_at: ts(updated_at),
            deleted: false,
        }
    }

    fn entry(id: &str, goal_id: &str, day: NaiveDate, value: f64, updated_at: &str) -> ProgressEntry {
        ProgressEntry {
            id: id.to_string(),
            goal_id: goal_id.to_string(),
            date: day,
            value,
            note: String::new(),
            created_at: ts(updated_at),
            updated_at: ts(updated_at),
            deleted: false,
        }
    }

    /// Writes a goal locally and queues its creation.
    fn create_local_goal(store: &SqliteStore, goal: &Goal) {
        let db = store.lock();
        db.insert_goal(goal).unwrap();
        db.enqueue_change(EntityKind::Goal, &goal.id, Operation::Create)
            .unwrap();
    }

    fn create_local_entry(store: &SqliteStore, entry: &ProgressEntry) {
        let db = store.lock();
        db.insert_progress(entry).unwrap();
        db.enqueue_change(EntityKind::ProgressEntry, &entry.id, Operation::Create)
            .unwrap();
    }

    /// Remote that rejects upserts for a single entity id.
    struct RejectingRemote {
        inner: SqliteStore,
        reject_id: String,
    }

    #[async_trait]
    impl RemoteStore for RejectingRemote {
        async fn upsert(&self, entity: &Entity) -> Result<()> {
            if entity.id() == self.reject_id {
                bail!("remote rejected {}", entity.id());
            }
            self.inner.upsert(entity).await
        }

        async fn soft_delete(&self, kind: EntityKind, id: &str, at: DateTime<Utc>) -> Result<()> {
            self.inner.soft_delete(kind, id, at).await
        }

        async fn fetch_goals_since(&self, owner_id: &str, since: DateTime<Utc>) -> Result<Vec<Goal>> {
            self.inner.fetch_goals_since(owner_id, since).await
        }

        async fn fetch_progress_since(
            &self,
            owner_id: &str,
            since: DateTime<Utc>,
        ) -> Result<Vec<ProgressEntry>> {
            self.inner.fetch_progress_since(owner_id, since).await
        }
    }

    /// Remote whose reads always fail.
    struct UnreachableRemote {
        inner: SqliteStore,
    }

    #[async_trait]
    impl RemoteStore for UnreachableRemote {
        async fn upsert(&self, entity: &Entity) -> Result<()> {
            self.inner.upsert(entity).await
        }

        async fn soft_delete(&self, kind: EntityKind, id: &str, at: DateTime<Utc>) -> Result<()> {
            self.inner.soft_delete(kind, id, at).await
        }

        async fn fetch_goals_since(&self, _owner_id: &str, _since: DateTime<Utc>) -> Result<Vec<Goal>> {
            bail!("connection refused")
        }

        async fn fetch_progress_since(
            &self,
            _owner_id: &str,
            _since: DateTime<Utc>,
        ) -> Result<Vec<ProgressEntry>> {
            bail!("connection refused")
        }
    }

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum FailAt {
        MarkChange,
        Insert,
    }

    /// Local store that fails one kind of write.
    struct FailingLocal {
        inner: SqliteStore,
        fail: FailAt,
    }

    #[async_trait]
    impl LocalStore for FailingLocal {
        async fn load_entity(&self, kind: EntityKind, id: &str) -> Result<Option<Entity>> {
            self.inner.load_entity(kind, id).await
        }

        async fn find_counterpart(&self, remote: &Entity) -> Result<Option<Entity>> {
            self.inner.find_counterpart(remote).await
        }

        async fn insert_entity(&self, entity: &Entity) -> Result<()> {
            if self.fail == FailAt::Insert {
                bail!("disk I/O error");
            }
            self.inner.insert_entity(entity).await
        }

        async fn overwrite_entity(&self, local: &Entity, remote: &Entity) -> Result<()> {
            self.inner.overwrite_entity(local, remote).await
        }

        async fn list_pending_changes(&self) -> Result<Vec<ChangeRecord>> {
            LocalStore::list_pending_changes(&self.inner).await
        }

        async fn mark_change(&self, id: i64, status: ChangeStatus, at: DateTime<Utc>) -> Result<()> {
            if self.fail == FailAt::MarkChange {
                bail!("disk I/O error");
            }
            self.inner.mark_change(id, status, at).await
        }

        async fn checkpoint(&self, owner_id: &str) -> Result<Option<DateTime<Utc>>> {
            self.inner.checkpoint(owner_id).await
        }

        async fn set_checkpoint(&self, owner_id: &str, at: DateTime<Utc>) -> Result<()> {
            LocalStore::set_checkpoint(&self.inner, owner_id, at).await
        }
    }

    /// Remote whose first upsert blocks until released.
    struct GatedRemote {
        inner: SqliteStore,
        gate: Arc<Notify>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RemoteStore for GatedRemote {
        async fn upsert(&self, entity: &Entity) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.gate.notified().await;
            }
            self.inner.upsert(entity).await
        }

        async fn soft_delete(&self, kind: EntityKind, id: &str, at: DateTime<Utc>) -> Result<()> {
            self.inner.soft_delete(kind, id, at).await
        }

        async fn fetch_goals_since(&self, owner_id: &str, since: DateTime<Utc>) -> Result<Vec<Goal>> {
            self.inner.fetch_goals_since(owner_id, since).await
        }

        async fn fetch_progress_since(
            &self,
            owner_id: &str,
            since: DateTime<Utc>,
        ) -> Result<Vec<ProgressEntry>> {
            self.inner.fetch_progress_since(owner_id, since).await
        }
    }

    #[tokio::test]
    async fn test_end_to_end_push_to_empty_remote() {
        let local = SqliteStore::open_in_memory().unwrap();
        let remote = SqliteStore::open_in_memory().unwrap();
        let g = goal("G", "2024-01-01T08:00:00Z");
        let p = entry("P", "G", date(2024, 1, 2), 4.0, "2024-01-02T08:00:00Z");
        create_local_goal(&local, &g);
        create_local_entry(&local, &p);

        let engine = SyncEngine::new(local.clone(), remote.clone())
            .with_clock(fixed_clock("2024-01-03T00:00:00Z"));
        let report = engine.sync("alice").await.unwrap();

        assert_eq!(report.pushed, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(remote.lock().get_goal("G").unwrap(), Some(g));
        assert_eq!(remote.lock().get_progress("P").unwrap(), Some(p));

        let db = local.lock();
        assert!(db.list_pending_changes().unwrap().is_empty());
        let records = db.list_changes(Some(ChangeStatus::Synced), 10).unwrap();
        assert_eq!(records.len(), 2);
        assert!(
            records
                .iter()
                .all(|r| r.last_attempt_at == Some(ts("2024-01-03T00:00:00Z")))
        );
        assert_eq!(
            db.get_checkpoint("alice").unwrap(),
            Some(ts("2024-01-03T00:00:00Z"))
        );
        assert_eq!(report.checkpoint, Some(ts("2024-01-03T00:00:00Z")));
    }

    #[tokio::test]
    async fn test_second_sync_is_a_no_op() {
        let local = SqliteStore::open_in_memory().unwrap();
        let remote = SqliteStore::open_in_memory().unwrap();
        create_local_goal(&local, &goal("G", "2024-01-01T08:00:00Z"));
        remote
            .lock()
            .insert_goal(&goal("R", "2024-01-02T08:00:00Z"))
            .unwrap();

        let engine = SyncEngine::new(local.clone(), remote.clone())
            .with_clock(fixed_clock("2024-01-03T00:00:00Z"));
        let first = engine.sync("alice").await.unwrap();
        assert_eq!(first.pushed, 1);
        assert_eq!(first.inserted, 1);

        let goals_before = local.lock().list_goals("alice").unwrap();
        let remote_before = remote.lock().list_goals("alice").unwrap();

        let second = engine.sync("alice").await.unwrap();
        assert_eq!(
            second,
            SyncReport {
                checkpoint: Some(ts("2024-01-03T00:00:00Z")),
                ..SyncReport::default()
            }
        );
        assert_eq!(local.lock().list_goals("alice").unwrap(), goals_before);
        assert_eq!(remote.lock().list_goals("alice").unwrap(), remote_before);
    }

    #[tokio::test]
    async fn test_checkpoint_never_moves_backward() {
        let local = SqliteStore::open_in_memory().unwrap();
        let remote = SqliteStore::open_in_memory().unwrap();
        local
            .lock()
            .set_checkpoint("alice", &ts("2024-06-01T00:00:00Z"))
            .unwrap();

        let engine = SyncEngine::new(local.clone(), remote)
            .with_clock(fixed_clock("2024-05-01T00:00:00Z"));
        let report = engine.sync("alice").await.unwrap();

        assert_eq!(report.checkpoint, Some(ts("2024-06-01T00:00:00Z")));
        assert_eq!(
            local.lock().get_checkpoint("alice").unwrap(),
            Some(ts("2024-06-01T00:00:00Z"))
        );
    }

    #[tokio::test]
    async fn test_newer_remote_wins_and_older_is_discarded() {
        let local = SqliteStore::open_in_memory().unwrap();
        let remote = SqliteStore::open_in_memory().unwrap();

        let mut stale_local = goal("A", "2024-01-01T00:00:00Z");
        stale_local.title = "local A".to_string();
        let mut fresh_local = goal("B", "2024-01-05T00:00:00Z");
        fresh_local.title = "local B".to_string();
        local.lock().insert_goal(&stale_local).unwrap();
        local.lock().insert_goal(&fresh_local).unwrap();

        let mut newer_remote = goal("A", "2024-01-02T00:00:00Z");
        newer_remote.title = "remote A".to_string();
        let mut older_remote = goal("B", "2024-01-04T00:00:00Z");
        older_remote.title = "remote B".to_string();
        remote.lock().insert_goal(&newer_remote).unwrap();
        remote.lock().insert_goal(&older_remote).unwrap();

        let engine = SyncEngine::new(local.clone(), remote)
            .with_clock(fixed_clock("2024-01-06T00:00:00Z"));
        let report = engine.sync("alice").await.unwrap();

        assert_eq!(report.overwritten, 1);
        assert_eq!(report.discarded, 1);
        assert_eq!(local.lock().get_goal("A").unwrap(), Some(newer_remote));
        assert_eq!(local.lock().get_goal("B").unwrap(), Some(fresh_local));
    }

    #[tokio::test]
    async fn test_equal_timestamps_keep_local() {
        let local = SqliteStore::open_in_memory().unwrap();
        let remote = SqliteStore::open_in_memory().unwrap();
        let mut mine = goal("A", "2024-01-02T00:00:00Z");
        mine.title = "mine".to_string();
        let mut theirs = goal("A", "2024-01-02T00:00:00Z");
        theirs.title = "theirs".to_string();
        local.lock().insert_goal(&mine).unwrap();
        remote.lock().insert_goal(&theirs).unwrap();

        let engine = SyncEngine::new(local.clone(), remote)
            .with_clock(fixed_clock("2024-01-06T00:00:00Z"));
        engine.sync("alice").await.unwrap();

        assert_eq!(local.lock().get_goal("A").unwrap().unwrap().title, "mine");
    }

    #[tokio::test]
    async fn test_remote_progress_adopted_by_goal_and_date() {
        let local = SqliteStore::open_in_memory().unwrap();
        let remote = SqliteStore::open_in_memory().unwrap();
        let g = goal("G", "2024-01-01T00:00:00Z");
        local.lock().insert_goal(&g).unwrap();
        remote.lock().insert_goal(&g).unwrap();
        local
            .lock()
            .insert_progress(&entry("mine", "G", date(2024, 1, 2), 1.0, "2024-01-02T00:00:00Z"))
            .unwrap();
        let theirs = entry("theirs", "G", date(2024, 1, 2), 5.0, "2024-01-03T00:00:00Z");
        remote.lock().insert_progress(&theirs).unwrap();

        let engine = SyncEngine::new(local.clone(), remote)
            .with_clock(fixed_clock("2024-01-06T00:00:00Z"));
        let report = engine.sync("alice").await.unwrap();

        assert_eq!(report.overwritten, 1);
        let db = local.lock();
        assert!(db.get_progress("mine").unwrap().is_none());
        assert_eq!(db.get_progress("theirs").unwrap(), Some(theirs));
        assert_eq!(db.list_progress_for_goal("G").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_push_failure_is_isolated() {
        let local = SqliteStore::open_in_memory().unwrap();
        let inner = SqliteStore::open_in_memory().unwrap();
        for id in ["g-1", "g-2", "g-3"] {
            create_local_goal(&local, &goal(id, "2024-01-01T00:00:00Z"));
        }
        let remote = RejectingRemote {
            inner: inner.clone(),
            reject_id: "g-2".to_string(),
        };

        let engine = SyncEngine::new(local.clone(), remote)
            .with_clock(fixed_clock("2024-01-03T00:00:00Z"));
        let report = engine.sync("alice").await.unwrap();

        assert_eq!(report.pushed, 2);
        assert_eq!(report.failed, 1);
        let statuses: Vec<ChangeStatus> = (1..=3)
            .map(|id| local.lock().get_change(id).unwrap().unwrap().status)
            .collect();
        assert_eq!(
            statuses,
            vec![ChangeStatus::Synced, ChangeStatus::Failed, ChangeStatus::Synced]
        );
        assert!(inner.lock().get_goal("g-1").unwrap().is_some());
        assert!(inner.lock().get_goal("g-2").unwrap().is_none());
        assert!(inner.lock().get_goal("g-3").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pull_failure_keeps_checkpoint() {
        let local = SqliteStore::open_in_memory().unwrap();
        create_local_goal(&local, &goal("G", "2024-01-01T00:00:00Z"));
        let remote = UnreachableRemote {
            inner: SqliteStore::open_in_memory().unwrap(),
        };

        let engine = SyncEngine::new(local.clone(), remote)
            .with_clock(fixed_clock("2024-01-03T00:00:00Z"));
        let result = engine.sync("alice").await;

        assert!(matches!(result, Err(SyncError::Pull(_))));
        let outcome = SyncOutcome::from(&result);
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("connection refused"));
        assert!(local.lock().get_checkpoint("alice").unwrap().is_none());
        // The push already happened and stays recorded.
        assert_eq!(
            local.lock().get_change(1).unwrap().unwrap().status,
            ChangeStatus::Synced
        );
        assert!(!engine.is_syncing());
    }

    #[tokio::test]
    async fn test_vanished_entity_is_marked_skipped() {
        let local = SqliteStore::open_in_memory().unwrap();
        local
            .lock()
            .enqueue_change(EntityKind::Goal, "ghost", Operation::Update)
            .unwrap();

        let engine = SyncEngine::new(local.clone(), SqliteStore::open_in_memory().unwrap())
            .with_clock(fixed_clock("2024-01-03T00:00:00Z"));
        let report = engine.sync("alice").await.unwrap();

        assert_eq!(report.skipped, 1);
        let record = local.lock().get_change(1).unwrap().unwrap();
        assert_eq!(record.status, ChangeStatus::Skipped);
        assert!(local.lock().list_pending_changes().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_pushes_soft_delete() {
        let local = SqliteStore::open_in_memory().unwrap();
        let remote = SqliteStore::open_in_memory().unwrap();
        let g = goal("G", "2024-01-01T00:00:00Z");
        remote.lock().insert_goal(&g).unwrap();
        local.lock().insert_goal(&g).unwrap();
        let deleted_at = ts("2024-01-02T00:00:00Z");
        local.lock().soft_delete_goal("G", &deleted_at).unwrap();
        local
            .lock()
            .enqueue_change(EntityKind::Goal, "G", Operation::Delete)
            .unwrap();

        let engine = SyncEngine::new(local, remote.clone())
            .with_clock(fixed_clock("2024-01-03T00:00:00Z"));
        let report = engine.sync("alice").await.unwrap();

        assert_eq!(report.pushed, 1);
        let stored = remote.lock().get_goal("G").unwrap().unwrap();
        assert!(stored.deleted);
        assert_eq!(stored.updated_at, ts("2024-01-03T00:00:00Z"));
    }

    #[tokio::test]
    async fn test_late_offline_delete_reaches_every_device() {
        let remote = SqliteStore::open_in_memory().unwrap();
        let device_a = SqliteStore::open_in_memory().unwrap();
        let device_b = SqliteStore::open_in_memory().unwrap();
        let g = goal("G", "2024-01-01T00:00:00Z");
        for store in [&remote, &device_a, &device_b] {
            store.lock().insert_goal(&g).unwrap();
        }

        // A deletes while offline.
        {
            let db = device_a.lock();
            db.soft_delete_goal("G", &ts("2024-01-02T00:00:00Z")).unwrap();
            db.enqueue_change(EntityKind::Goal, "G", Operation::Delete)
                .unwrap();
        }

        // B edits later and syncs first.
        let mut edited = g.clone();
        edited.title = "edited on B".to_string();
        edited.updated_at = ts("2024-01-03T00:00:00Z");
        {
            let db = device_b.lock();
            db.update_goal(&edited).unwrap();
            db.enqueue_change(EntityKind::Goal, "G", Operation::Update)
                .unwrap();
        }
        SyncEngine::new(device_b.clone(), remote.clone())
            .with_clock(fixed_clock("2024-01-03T12:00:00Z"))
            .sync("alice")
            .await
            .unwrap();

        SyncEngine::new(device_a.clone(), remote.clone())
            .with_clock(fixed_clock("2024-01-04T00:00:00Z"))
            .sync("alice")
            .await
            .unwrap();
        let on_remote = remote.lock().get_goal("G").unwrap().unwrap();
        assert!(on_remote.deleted);
        assert_eq!(on_remote.updated_at, ts("2024-01-04T00:00:00Z"));

        let report = SyncEngine::new(device_b.clone(), remote.clone())
            .with_clock(fixed_clock("2024-01-05T00:00:00Z"))
            .sync("alice")
            .await
            .unwrap();
        assert_eq!(report.overwritten, 1);

        let on_a = device_a.lock().get_goal("G").unwrap().unwrap();
        let on_b = device_b.lock().get_goal("G").unwrap().unwrap();
        assert_eq!(on_a, on_remote);
        assert_eq!(on_b, on_remote);
    }

    #[tokio::test]
    async fn test_pull_inserts_new_remote_progress() {
        let local = SqliteStore::open_in_memory().unwrap();
        let remote = SqliteStore::open_in_memory().unwrap();
        let g = goal("G", "2024-01-01T00:00:00Z");
        let p = entry("P", "G", date(2024, 1, 2), 3.0, "2024-01-02T00:00:00Z");
        remote.lock().insert_goal(&g).unwrap();
        remote.lock().insert_progress(&p).unwrap();

        let engine = SyncEngine::new(local.clone(), remote)
            .with_clock(fixed_clock("2024-01-03T00:00:00Z"));
        let report = engine.sync("alice").await.unwrap();

        assert_eq!(report.inserted, 2);
        assert_eq!(report.overwritten, 0);
        let db = local.lock();
        assert_eq!(db.get_goal("G").unwrap(), Some(g));
        assert_eq!(db.get_progress("P").unwrap(), Some(p));
        assert!(db.list_pending_changes().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_error_while_marking_aborts_sync() {
        let inner = SqliteStore::open_in_memory().unwrap();
        create_local_goal(&inner, &goal("G", "2024-01-01T00:00:00Z"));
        let remote = SqliteStore::open_in_memory().unwrap();
        let local = FailingLocal {
            inner: inner.clone(),
            fail: FailAt::MarkChange,
        };

        let engine = SyncEngine::new(local, remote.clone())
            .with_clock(fixed_clock("2024-01-03T00:00:00Z"));
        let result = engine.sync("alice").await;

        assert!(matches!(result, Err(SyncError::Local(_))));
        let outcome = SyncOutcome::from(&result);
        assert!(outcome.error.unwrap().contains("disk I/O error"));
        assert!(inner.lock().get_checkpoint("alice").unwrap().is_none());
        assert_eq!(inner.lock().list_pending_changes().unwrap().len(), 1);
        assert!(remote.lock().get_goal("G").unwrap().is_some());
        assert!(!engine.is_syncing());
    }

    #[tokio::test]
    async fn test_local_error_while_applying_pull_keeps_checkpoint() {
        let inner = SqliteStore::open_in_memory().unwrap();
        inner
            .lock()
            .set_checkpoint("alice", &ts("2024-01-01T00:00:00Z"))
            .unwrap();
        let remote = SqliteStore::open_in_memory().unwrap();
        remote
            .lock()
            .insert_goal(&goal("R", "2024-01-02T00:00:00Z"))
            .unwrap();
        let local = FailingLocal {
            inner: inner.clone(),
            fail: FailAt::Insert,
        };

        let engine = SyncEngine::new(local, remote)
            .with_clock(fixed_clock("2024-01-03T00:00:00Z"));
        let result = engine.sync("alice").await;

        assert!(matches!(result, Err(SyncError::Local(_))));
        assert_eq!(
            inner.lock().get_checkpoint("alice").unwrap(),
            Some(ts("2024-01-01T00:00:00Z"))
        );
        assert!(inner.lock().get_goal("R").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_engines_from_one_service_share_the_busy_flag() {
        let svc = TrackerService::new_in_memory()
            .unwrap()
            .with_clock(fixed_clock("2024-01-03T00:00:00Z"));
        svc.create_goal(&NewGoal {
            owner_id: "alice".to_string(),
            title: "Walk".to_string(),
            description: String::new(),
            start_date: date(2024, 1, 1),
            end_date: date(2024, 1, 10),
            target: None,
        })
        .unwrap();
        let gate = Arc::new(Notify::new());
        let gated = svc.sync_engine(GatedRemote {
            inner: SqliteStore::open_in_memory().unwrap(),
            gate: Arc::clone(&gate),
            calls: AtomicUsize::new(0),
        });
        let other = svc.sync_engine(SqliteStore::open_in_memory().unwrap());

        let (first, (second, busy)) = tokio::join!(gated.sync("alice"), async {
            let result = other.sync("alice").await;
            let busy = svc.is_syncing();
            gate.notify_one();
            (result, busy)
        });

        assert!(matches!(second, Err(SyncError::AlreadyInProgress)));
        assert!(busy);
        assert_eq!(first.unwrap().pushed, 1);
        assert!(!svc.is_syncing());
        assert!(other.sync("alice").await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_sync_is_rejected() {
        let local = SqliteStore::open_in_memory().unwrap();
        create_local_goal(&local, &goal("G", "2024-01-01T00:00:00Z"));
        let gate = Arc::new(Notify::new());
        let remote = GatedRemote {
            inner: SqliteStore::open_in_memory().unwrap(),
            gate: Arc::clone(&gate),
            calls: AtomicUsize::new(0),
        };
        let engine = SyncEngine::new(local.clone(), remote)
            .with_clock(fixed_clock("2024-01-03T00:00:00Z"));

        let (first, second) = tokio::join!(engine.sync("alice"), async {
            let result = engine.sync("alice").await;
            let checkpoint = local.lock().get_checkpoint("alice").unwrap();
            gate.notify_one();
            (result, checkpoint)
        });

        let (second, checkpoint_during) = second;
        assert!(matches!(second, Err(SyncError::AlreadyInProgress)));
        assert!(checkpoint_during.is_none());
        assert_eq!(
            SyncOutcome::from(&second).error.as_deref(),
            Some("a sync is already in progress")
        );

        assert_eq!(first.unwrap().pushed, 1);
        assert!(!engine.is_syncing());
        assert!(engine.sync("alice").await.is_ok());
    }

    #[test]
    fn test_outcome_from_success() {
        let outcome = SyncOutcome::from(&Ok(SyncReport::default()));
        assert_eq!(
            outcome,
            SyncOutcome {
                success: true,
                error: None
            }
        );
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            serde_json::json!({ "success": true })
        );
    }
}

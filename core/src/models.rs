use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// --- Entities ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub id: String,
    pub goal_id: String,
    pub date: NaiveDate,
    pub value: f64,
    #[serde(default)]
    pub note: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone)]
pub struct NewGoal {
    pub owner_id: String,
    pub title: String,
    pub description: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub target: Option<f64>,
}

#[derive(Debug, Clone, Default)]
#[allow(clippy::option_option)]
pub struct UpdateGoal {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// `Some(None)` clears the target.
    pub target: Option<Option<f64>>,
}

impl UpdateGoal {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.start_date.is_none()
            && self.end_date.is_none()
            && self.target.is_none()
    }
}

// --- Entity kinds and the shared sync surface ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Goal,
    ProgressEntry,
}

impl EntityKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Goal => "goal",
            Self::ProgressEntry => "progress_entry",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "goal" => Ok(Self::Goal),
            "progress_entry" => Ok(Self::ProgressEntry),
            _ => bail!("Unknown entity kind '{s}'"),
        }
    }
}

/// Fields every replicated record carries, regardless of its kind.
pub trait Syncable {
    fn kind(&self) -> EntityKind;
    fn id(&self) -> &str;
    fn updated_at(&self) -> DateTime<Utc>;
    fn is_deleted(&self) -> bool;
}

impl Syncable for Goal {
    fn kind(&self) -> EntityKind {
        EntityKind::Goal
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

impl Syncable for ProgressEntry {
    fn kind(&self) -> EntityKind {
        EntityKind::ProgressEntry
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// A goal or a progress entry crossing a store boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Entity {
    Goal(Goal),
    ProgressEntry(ProgressEntry),
}

impl Syncable for Entity {
    fn kind(&self) -> EntityKind {
        match self {
            Self::Goal(_) => EntityKind::Goal,
            Self::ProgressEntry(_) => EntityKind::ProgressEntry,
        }
    }

    fn id(&self) -> &str {
        match self {
            Self::Goal(g) => &g.id,
            Self::ProgressEntry(p) => &p.id,
        }
    }

    fn updated_at(&self) -> DateTime<Utc> {
        match self {
            Self::Goal(g) => g.updated_at,
            Self::ProgressEntry(p) => p.updated_at,
        }
    }

    fn is_deleted(&self) -> bool {
        match self {
            Self::Goal(g) => g.deleted,
            Self::ProgressEntry(p) => p.deleted,
        }
    }
}

impl From<Goal> for Entity {
    fn from(goal: Goal) -> Self {
        Self::Goal(goal)
    }
}

impl From<ProgressEntry> for Entity {
    fn from(entry: ProgressEntry) -> Self {
        Self::ProgressEntry(entry)
    }
}

// --- Change queue ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            _ => bail!("Unknown operation '{s}'"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Pending,
    Synced,
    Failed,
    /// The entity was gone from the local store when the push ran.
    Skipped,
}

impl ChangeStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => bail!("Unknown change status '{s}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: i64,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub operation: Operation,
    pub status: ChangeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

// --- Derived views (computed on read, never stored) ---

#[derive(Debug, Clone, Serialize)]
pub struct GoalWithProgress {
    #[serde(flatten)]
    pub goal: Goal,
    pub total_progress: f64,
    pub completion_percentage: f64,
    pub current_streak: i64,
    pub days_remaining: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_goals: usize,
    pub active_goals: usize,
    pub completed_goals: usize,
    pub today_progress_count: usize,
    pub longest_streak: i64,
    pub total_progress: f64,
}

// --- Validation ---

pub fn validate_goal_dates(start_date: NaiveDate, end_date: NaiveDate) -> anyhow::Result<()> {
    if end_date <= start_date {
        anyhow::bail!("End date ({end_date}) must be after start date ({start_date})");
    }
    Ok(())
}

pub fn validate_target(target: Option<f64>) -> anyhow::Result<()> {
    if let Some(t) = target {
        if !t.is_finite() {
            anyhow::bail!("Target must be a finite number");
        }
        if t < 0.0 {
            anyhow::bail!("Target must not be negative");
        }
    }
    Ok(())
}

pub fn validate_new_goal(goal: &NewGoal) -> anyhow::Result<()> {
    if goal.title.trim().is_empty() {
        anyhow::bail!("Goal title must not be empty");
    }
    validate_goal_dates(goal.start_date, goal.end_date)?;
    validate_target(goal.target)
}

pub fn validate_progress_value(value: f64) -> anyhow::Result<()> {
    if !value.is_finite() {
        anyhow::bail!("Progress value must be a finite number");
    }
    Ok(())
}

pub fn validate_goal(goal: &Goal) -> anyhow::Result<()> {
    if goal.id.trim().is_empty() {
        anyhow::bail!("Goal id must not be empty");
    }
    if goal.owner_id.trim().is_empty() {
        anyhow::bail!("Goal owner_id must not be empty");
    }
    validate_target(goal.target)
}

pub fn validate_progress_entry(entry: &ProgressEntry) -> anyhow::Result<()> {
    if entry.id.trim().is_empty() {
        anyhow::bail!("Progress entry id must not be empty");
    }
    if entry.goal_id.trim().is_empty() {
        anyhow::bail!("Progress entry goal_id must not be empty");
    }
    validate_progress_value(entry.value)
}

/// Checks the fields a remote peer is allowed to send for an entity.
pub fn validate_entity(entity: &Entity) -> anyhow::Result<()> {
    match entity {
        Entity::Goal(g) => validate_goal(g),
        Entity::ProgressEntry(p) => validate_progress_entry(p),
    }
}

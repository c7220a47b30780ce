//! Derived progress metrics for a goal and its logged entries.
//!
//! Everything here is pure: callers pass in "today" so results are stable
//! under test and across time zones.

use chrono::NaiveDate;

use crate::models::{DashboardStats, Goal, GoalWithProgress, ProgressEntry};

/// Sum of `value` over non-deleted entries. Negative values count as-is.
#[must_use]
pub fn total_progress(entries: &[ProgressEntry]) -> f64 {
    entries.iter().filter(|e| !e.deleted).map(|e| e.value).sum()
}

/// Percentage of the goal's target reached, capped at 100.
///
/// Goals without a target (or with a zero target) always report 0.
#[must_use]
pub fn completion_percentage(goal: &Goal, entries: &[ProgressEntry]) -> f64 {
    match goal.target {
        Some(target) if target != 0.0 => (total_progress(entries) / target * 100.0).min(100.0),
        _ => 0.0,
    }
}

/// Consecutive days with progress, counting back from `today`.
///
/// An entry `n` days before today extends the streak when `n` equals the
/// streak so far; smaller gaps are same-day duplicates and are skipped, a
/// larger gap ends the walk. No entry today means no streak.
#[must_use]
pub fn current_streak(entries: &[ProgressEntry], today: NaiveDate) -> i64 {
    let mut dates: Vec<NaiveDate> = entries
        .iter()
        .filter(|e| !e.deleted)
        .map(|e| e.date)
        .collect();
    dates.sort_unstable_by(|a, b| b.cmp(a));

    let mut streak: i64 = 0;
    for date in dates {
        let gap = (today - date).num_days();
        if gap == streak {
            streak += 1;
        } else if gap > streak {
            break;
        }
    }
    streak
}

/// Whole days left until the goal's end date, never negative.
#[must_use]
pub fn days_remaining(goal: &Goal, today: NaiveDate) -> i64 {
    (goal.end_date - today).num_days().max(0)
}

/// Not deleted, and `today` falls within `[start_date, end_date]`.
#[must_use]
pub fn is_active(goal: &Goal, today: NaiveDate) -> bool {
    !goal.deleted && goal.start_date <= today && today <= goal.end_date
}

#[must_use]
pub fn enrich(goal: Goal, entries: &[ProgressEntry], today: NaiveDate) -> GoalWithProgress {
    let total_progress = total_progress(entries);
    let completion_percentage = completion_percentage(&goal, entries);
    let current_streak = current_streak(entries, today);
    let days_remaining = days_remaining(&goal, today);
    let is_active = is_active(&goal, today);
    GoalWithProgress {
        goal,
        total_progress,
        completion_percentage,
        current_streak,
        days_remaining,
        is_active,
    }
}

/// Roll enriched goals up into dashboard numbers.
#[must_use]
pub fn dashboard_stats(goals: &[GoalWithProgress], today_progress_count: usize) -> DashboardStats {
    DashboardStats {
        total_goals: goals.len(),
        active_goals: goals.iter().filter(|g| g.is_active).count(),
        completed_goals: goals
            .iter()
            .filter(|g| g.completion_percentage >= 100.0)
            .count(),
        today_progress_count,
        longest_streak: goals.iter().map(|g| g.current_streak).max().unwrap_or(0),
        total_progress: goals.iter().map(|g| g.total_progress).sum(),
    }
}

mod goal;
mod helpers;
mod progress;
mod queue;
mod stats;
mod sync;

pub(crate) use goal::{
    GoalArgs, GoalEditArgs, cmd_goal_add, cmd_goal_delete, cmd_goal_edit, cmd_goal_list,
    cmd_goal_show,
};
pub(crate) use progress::{cmd_progress_delete, cmd_progress_log};
pub(crate) use queue::{cmd_queue_list, cmd_queue_retry};
pub(crate) use stats::cmd_stats;
pub(crate) use sync::{cmd_sync, cmd_whoami};

//! Last-write-wins conflict resolution.
//!
//! Timestamps are compared as plain wall-clock values. There is no causality
//! tracking, so a device with a fast clock wins ties it should lose.

use chrono::{DateTime, Utc};

use crate::models::Syncable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No local counterpart exists; store the remote row as new.
    Insert,
    /// The remote row is strictly newer; replace the local one.
    Overwrite,
    /// The local row is newer or equally new; drop the remote row.
    KeepLocal,
}

/// Ties favor the local version.
#[must_use]
pub fn should_apply_remote(
    local_updated_at: Option<DateTime<Utc>>,
    remote_updated_at: DateTime<Utc>,
) -> bool {
    match local_updated_at {
        None => true,
        Some(local) => remote_updated_at > local,
    }
}

#[must_use]
pub fn resolve<L: Syncable, R: Syncable>(local: Option<&L>, remote: &R) -> Resolution {
    match local {
        None => Resolution::Insert,
        Some(l) if should_apply_remote(Some(l.updated_at()), remote.updated_at()) => {
            Resolution::Overwrite
        }
        Some(_) => Resolution::KeepLocal,
    }
}

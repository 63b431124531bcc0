use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::str::FromStr;

use exn::ResultExt;
use time::UtcDateTime;

use super::{path, timestamp};
use crate::error::{Error, ErrorKind};

/// Identifier of a run. Assigned by the journal, strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(i64);
impl RunId {
    pub fn get(&self) -> i64 {
        self.0
    }
}
impl From<i64> for RunId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}
impl FromStr for RunId {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().trim_start_matches('#').parse::<i64>().or_raise(|| ErrorKind::InvalidData("run id"))?))
    }
}
impl Display for RunId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    /// Being applied right now, or the process died while applying it.
    InProgress,
    /// Every entry applied.
    Completed,
    /// At least one entry failed; the rest were applied.
    PartiallyFailed,
    /// Stopped between two entries; the remaining entries were never applied.
    Cancelled,
    /// Fully reverted.
    Undone,
    /// Undo ran but some entries could not be reverted. Undo may be retried.
    UndoIncomplete,
}
impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::PartiallyFailed => "partially_failed",
            Self::Cancelled => "cancelled",
            Self::Undone => "undone",
            Self::UndoIncomplete => "undo_incomplete",
        }
    }

    /// Whether a run may move from `self` to `next`.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;
        match (self, next) {
            (InProgress, Completed | PartiallyFailed | Cancelled) => true,
            // Undo of a run that crashed mid-way goes straight from InProgress.
            (InProgress | Completed | PartiallyFailed | Cancelled | UndoIncomplete, Undone | UndoIncomplete) => true,
            _ => false,
        }
    }
}
impl FromStr for RunStatus {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "partially_failed" => Self::PartiallyFailed,
            "cancelled" => Self::Cancelled,
            "undone" => Self::Undone,
            "undo_incomplete" => Self::UndoIncomplete,
            _ => exn::bail!(ErrorKind::InvalidData("run status")),
        })
    }
}
impl Display for RunStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.pad(self.as_str())
    }
}

/// Everything needed to open a new run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRun {
    pub source_root: PathBuf,
    pub destination_root: PathBuf,
    pub scheme: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub id: RunId,
    pub source_root: PathBuf,
    pub destination_root: PathBuf,
    pub scheme: String,
    pub started_at: UtcDateTime,
    pub completed_at: Option<UtcDateTime>,
    pub status: RunStatus,
}

/// Number of entries of a run in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryCounts {
    pub total: u64,
    pub planned: u64,
    pub applied: u64,
    pub failed: u64,
    pub undone: u64,
    pub undo_failed: u64,
}

/// A run plus a summary of its entries, as listed to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOverview {
    pub run: Run,
    pub counts: EntryCounts,
}

#[derive(sqlx::FromRow)]
pub(crate) struct RunRow {
    run_id: i64,
    source_root: Vec<u8>,
    destination_root: Vec<u8>,
    scheme: String,
    started_at: i64,
    completed_at: Option<i64>,
    status: String,
}
impl TryFrom<RunRow> for Run {
    type Error = Error;
    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: RunId(row.run_id),
            source_root: path::decode(row.source_root)?,
            destination_root: path::decode(row.destination_root)?,
            scheme: row.scheme,
            started_at: timestamp(row.started_at, "run start date")?,
            completed_at: row.completed_at.map(|t| timestamp(t, "run completion date")).transpose()?,
            status: row.status.parse()?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct RunOverviewRow {
    #[sqlx(flatten)]
    run: RunRow,
    total: i64,
    planned: i64,
    applied: i64,
    failed: i64,
    undone: i64,
    undo_failed: i64,
}
impl TryFrom<RunOverviewRow> for RunOverview {
    type Error = Error;
    fn try_from(row: RunOverviewRow) -> Result<Self, Self::Error> {
        let count = |n: i64| u64::try_from(n).or_raise(|| ErrorKind::InvalidData("entry count"));
        Ok(Self {
            run: row.run.try_into()?,
            counts: EntryCounts {
                total: count(row.total)?,
                planned: count(row.planned)?,
                applied: count(row.applied)?,
                failed: count(row.failed)?,
                undone: count(row.undone)?,
                undo_failed: count(row.undo_failed)?,
            },
        })
    }
}

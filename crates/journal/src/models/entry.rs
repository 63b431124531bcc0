use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::str::FromStr;

use darkroom_storage::Fingerprint;
use exn::ResultExt;
use time::UtcDateTime;

use super::{RunId, path, timestamp};
use crate::error::{Error, ErrorKind};

/// What an entry does to its file.
///
/// A closed set: the planner, executor and undo engine all match on it
/// exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Move,
    Copy,
    /// Identical content already lives at the destination.
    SkipDuplicate,
    /// The file couldn't be read, or no destination could be found for it.
    SkipUnreadable,
}
impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Move => "move",
            Self::Copy => "copy",
            Self::SkipDuplicate => "skip_duplicate",
            Self::SkipUnreadable => "skip_unreadable",
        }
    }

    /// Whether applying this operation touches the filesystem at all.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::SkipDuplicate | Self::SkipUnreadable)
    }
}
impl FromStr for OperationKind {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "move" => Self::Move,
            "copy" => Self::Copy,
            "skip_duplicate" => Self::SkipDuplicate,
            "skip_unreadable" => Self::SkipUnreadable,
            _ => exn::bail!(ErrorKind::InvalidData("operation kind")),
        })
    }
}
impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.pad(self.as_str())
    }
}

/// Lifecycle of a single journal entry.
///
/// ```text
/// Planned ──► Applied ──► Undone
///    │           │          ▲
///    │           └──► UndoFailed
///    ├──► Failed
///    └──► Undone   (reconciled after an interrupted run)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryStatus {
    Planned,
    Applied,
    Failed,
    Undone,
    UndoFailed,
}
impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Undone => "undone",
            Self::UndoFailed => "undo_failed",
        }
    }

    /// Whether an entry may move from `self` to `next`.
    pub fn can_transition_to(&self, next: EntryStatus) -> bool {
        use EntryStatus::*;
        matches!(
            (self, next),
            (Planned, Applied | Failed | Undone) | (Applied, Undone | UndoFailed) | (UndoFailed, Undone | UndoFailed)
        )
    }
}
impl FromStr for EntryStatus {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "planned" => Self::Planned,
            "applied" => Self::Applied,
            "failed" => Self::Failed,
            "undone" => Self::Undone,
            "undo_failed" => Self::UndoFailed,
            _ => exn::bail!(ErrorKind::InvalidData("entry status")),
        })
    }
}
impl Display for EntryStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.pad(self.as_str())
    }
}

/// An operation about to be journaled. Sequence numbers are assigned by
/// [`Repository::append_entries`](crate::Repository::append_entries).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
    pub kind: OperationKind,
    pub fingerprint: Option<Fingerprint>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub run_id: RunId,
    /// Position within the run, starting at 1.
    pub sequence: u32,
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
    pub kind: OperationKind,
    pub fingerprint: Option<Fingerprint>,
    pub status: EntryStatus,
    pub reason: Option<String>,
    /// Directories created while applying this entry, outermost first.
    pub created_dirs: Vec<PathBuf>,
    /// When the status last changed.
    pub timestamp: UtcDateTime,
}

#[derive(sqlx::FromRow)]
pub(crate) struct EntryRow {
    run_id: i64,
    sequence_number: i64,
    source_path: Vec<u8>,
    destination_path: Option<Vec<u8>>,
    kind: String,
    content_hash: Option<String>,
    content_size: Option<i64>,
    status: String,
    reason: Option<String>,
    created_dirs: String,
    timestamp: i64,
}
impl TryFrom<EntryRow> for JournalEntry {
    type Error = Error;
    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let fingerprint = match (row.content_hash, row.content_size) {
            (Some(hash), Some(size)) => Some(Fingerprint::new(
                hash,
                u64::try_from(size).or_raise(|| ErrorKind::InvalidData("content size"))?,
            )),
            (None, None) => None,
            _ => exn::bail!(ErrorKind::InvalidData("fingerprint")),
        };
        let created_dirs: Vec<String> =
            serde_json::from_str(&row.created_dirs).or_raise(|| ErrorKind::InvalidData("created directories"))?;
        Ok(Self {
            run_id: RunId::from(row.run_id),
            sequence: u32::try_from(row.sequence_number).or_raise(|| ErrorKind::InvalidData("sequence number"))?,
            source: path::decode(row.source_path)?,
            destination: row.destination_path.map(path::decode).transpose()?,
            kind: row.kind.parse()?,
            fingerprint,
            status: row.status.parse()?,
            reason: row.reason,
            created_dirs: created_dirs.into_iter().map(PathBuf::from).collect(),
            timestamp: timestamp(row.timestamp, "entry timestamp")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn row() -> EntryRow {
        EntryRow {
            run_id: 1,
            sequence_number: 3,
            source_path: b"/in/img1.jpg".to_vec(),
            destination_path: Some(b"/out/2024/03/img1.jpg".to_vec()),
            kind: "move".to_string(),
            content_hash: Some("af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262".to_string()),
            content_size: Some(2048),
            status: "applied".to_string(),
            reason: None,
            created_dirs: r#"["/out/2024","/out/2024/03"]"#.to_string(),
            timestamp: 1_709_251_200,
        }
    }

    #[rstest]
    #[case(EntryStatus::Planned, EntryStatus::Applied, true)]
    #[case(EntryStatus::Planned, EntryStatus::Failed, true)]
    #[case(EntryStatus::Planned, EntryStatus::Undone, true)]
    #[case(EntryStatus::Applied, EntryStatus::Undone, true)]
    #[case(EntryStatus::Applied, EntryStatus::UndoFailed, true)]
    #[case(EntryStatus::UndoFailed, EntryStatus::Undone, true)]
    #[case(EntryStatus::UndoFailed, EntryStatus::UndoFailed, true)]
    #[case(EntryStatus::Applied, EntryStatus::Applied, false)]
    #[case(EntryStatus::Applied, EntryStatus::Failed, false)]
    #[case(EntryStatus::Failed, EntryStatus::Undone, false)]
    #[case(EntryStatus::Undone, EntryStatus::Applied, false)]
    #[case(EntryStatus::Undone, EntryStatus::Undone, false)]
    fn test_entry_transitions(#[case] from: EntryStatus, #[case] to: EntryStatus, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn test_row_to_model() {
        let entry = JournalEntry::try_from(row()).unwrap();
        assert_eq!(entry.sequence, 3);
        assert_eq!(entry.kind, OperationKind::Move);
        assert_eq!(entry.status, EntryStatus::Applied);
        assert_eq!(entry.fingerprint.unwrap().size, 2048);
        assert_eq!(entry.created_dirs, vec![PathBuf::from("/out/2024"), PathBuf::from("/out/2024/03")]);
    }

    #[test]
    fn test_half_a_fingerprint_is_invalid() {
        let mut row = row();
        row.content_size = None;
        let err = JournalEntry::try_from(row).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData("fingerprint")));
    }
}

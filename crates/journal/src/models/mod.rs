mod entry;
pub(crate) mod path;
mod run;

pub(crate) use self::entry::EntryRow;
pub use self::entry::{EntryStatus, JournalEntry, NewEntry, OperationKind};
pub(crate) use self::run::{RunOverviewRow, RunRow};
pub use self::run::{EntryCounts, NewRun, Run, RunId, RunOverview, RunStatus};

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use time::UtcDateTime;

fn timestamp(seconds: i64, field: &'static str) -> Result<UtcDateTime> {
    UtcDateTime::from_unix_timestamp(seconds).or_raise(|| ErrorKind::InvalidData(field))
}

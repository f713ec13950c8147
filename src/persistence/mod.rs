//! Local persistence: the recent-operation journal

pub mod journal;

pub use journal::{JournalEntry, OperationJournal};

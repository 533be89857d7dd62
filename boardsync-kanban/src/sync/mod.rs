//! Persistence boundary and the dispatcher that drives it

mod adapter;
mod dispatcher;
mod memory;

pub use adapter::{SyncAdapter, SyncFailure};
pub use dispatcher::{
    Delivery, DrainReport, NoticeKind, SyncDispatcher, SyncNotice, SyncStats, SyncStatsSnapshot,
    DEFAULT_TIMEOUT,
};
pub use memory::{InMemorySyncAdapter, RecordedCall, ScriptedFailure};

//! Connects local file-watcher events and remote deltas into one
//! eventually-consistent view (spec §4.7, §4.8).

pub mod manager;
pub mod recovery;

pub use self::manager::{ConflictHandler, FileConflict, LoggingConflictHandler, SyncManager};
pub use self::recovery::{ContextRecovery, ContextRecoveryReport};

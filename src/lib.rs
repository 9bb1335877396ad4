//! A local-first JSON document database layered on a git repository.
//!
//! Documents are stored as one blob per document in a git tree; mutations
//! are git commits; synchronizing with a remote is git fetch/merge/push
//! plus a three-way merge classifier tuned for JSON documents rather than
//! line-oriented text. [`Database`] is the entry point.

pub mod combine;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod merge;
pub mod model;
pub mod scheduler;
pub mod sync_engine;
pub mod task_queue;

pub use config::{OpenOptions, SyncOptions};
pub use database::Database;
pub use error::DbError;
pub use events::Event;
pub use model::{
    ChangedFile, CommitDescriptor, Conflict, ConflictOperation, DeleteResult, DuplicatedFile,
    FatDoc, MergeCase, PutResult, SyncResult,
};

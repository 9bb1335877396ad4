//! Document-level data model (spec §3) and the pure transforms built on top
//! of it: canonical serialization (§4.1), structural diff (§4.2), and the OT
//! patch layer (§4.5).

pub mod diff;
pub mod document;
pub mod patch;
pub mod serialize;

pub use document::{
    ChangedFile, CommitDescriptor, Conflict, ConflictOperation, DeleteResult, DuplicatedFile,
    FatDoc, MergeCase, PutResult, SyncResult,
};

//! Git abstraction layer for gitdocdb.
//!
//! This crate defines the [`GitRepo`] trait — the single interface through
//! which the `gitdocdb` core interacts with git. The core crate never
//! imports `gix` directly; it depends on `gitdocdb-git` and programs against
//! the trait.
//!
//! # Crate layout
//!
//! - [`repo`] — the [`GitRepo`] trait definition.
//! - [`types`] — value types used in trait signatures ([`GitOid`], [`RefName`],
//!   [`TreeEntry`], [`CommitInfo`], etc.).
//! - [`error`] — the [`GitError`] enum returned by all trait methods.
//! - [`gix_repo`] — the `gix`-backed implementation, [`GixRepo`].
//! - [`testing`] (feature `testing`) — an in-memory [`GitRepo`] double for
//!   `gitdocdb`'s own test suite.

mod gix_repo;
mod objects_impl;
mod push_impl;
mod refs_impl;

pub mod error;
pub mod repo;
#[cfg(feature = "testing")]
pub mod testing;
pub mod types;

pub use error::GitError;
pub use gix_repo::GixRepo;
pub use repo::GitRepo;
pub use types::{
    CommitInfo, EntryMode, GitOid, OidParseError, RefEdit, RefName, RefNameError, TreeEdit,
    TreeEntry,
};

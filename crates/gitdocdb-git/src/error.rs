//! Error types for git operations.
//!
//! [`GitError`] is the single error type returned by all [`GitRepo`](crate::GitRepo) trait
//! methods. It uses rich enum variants so callers can match on specific failure
//! modes (e.g., missing ref, CAS mismatch, stale push) without parsing error
//! messages — the sync engine's retry loop (spec §4.7) matches on
//! [`GitError::PushRejected`] to decide whether to re-fetch and retry versus
//! surfacing a non-retriable failure.

use thiserror::Error;

/// Errors returned by [`GitRepo`](crate::GitRepo) operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// A requested object, ref, or path was not found.
    #[error("not found: {message}")]
    NotFound {
        /// Human-readable description of what was missing.
        message: String,
    },

    /// A ref update failed because the ref's current value did not match the
    /// expected old value (compare-and-swap / optimistic concurrency failure).
    #[error("ref conflict on `{ref_name}`: {message}")]
    RefConflict {
        /// The ref that could not be updated.
        ref_name: String,
        /// Details about the mismatch.
        message: String,
    },

    /// An OID string could not be parsed or was otherwise invalid.
    #[error("invalid OID `{value}`: {reason}")]
    InvalidOid {
        /// The raw value that failed validation.
        value: String,
        /// Why validation failed.
        reason: String,
    },

    /// An I/O error occurred (file system, process spawn, etc.).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Fetching from a remote failed (network error, auth failure, unknown
    /// remote). Retriable per spec §4.7 step 1.
    #[error("fetch from `{remote}` failed: {message}")]
    FetchFailed {
        /// The remote name (e.g., `"origin"`).
        remote: String,
        /// Details about the failure.
        message: String,
    },

    /// A push to a remote was rejected because the remote ref moved
    /// (non-fast-forward). Retriable: the sync engine re-fetches and retries
    /// per spec §4.7 step 6.
    #[error("push to `{remote}` rejected, remote ref moved: {message}")]
    PushRejected {
        /// The remote name (e.g., `"origin"`).
        remote: String,
        /// Details about the rejection.
        message: String,
    },

    /// A push to a remote failed for a reason other than a stale ref
    /// (auth failure, network error, ...). Not retriable.
    #[error("push to `{remote}` failed: {message}")]
    PushFailed {
        /// The remote name (e.g., `"origin"`).
        remote: String,
        /// Details about the failure.
        message: String,
    },

    /// The underlying git backend (gix) returned an unclassified error.
    ///
    /// This is the catch-all for errors that don't fit other variants. The
    /// `message` should include enough context to diagnose the failure.
    #[error("git backend error: {message}")]
    BackendError {
        /// Freeform error description from the backend.
        message: String,
    },
}

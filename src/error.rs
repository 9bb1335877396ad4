//! Core error types for gitdocdb.
//!
//! Defines [`DbError`], the unified error type for all database operations.
//! The taxonomy is closed (spec §7): lifecycle, input-validation, sync
//! configuration, and sync-execution errors each get their own variants so
//! callers can match on a specific failure instead of parsing messages.
//!
//! No legacy VCS-specific concepts leak into this module — errors are
//! expressed in terms of gitdocdb's own abstractions (documents, sync,
//! tasks), never raw `GitError` variants directly (those are wrapped).

use std::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// DbError
// ---------------------------------------------------------------------------

/// Unified error type for gitdocdb operations.
#[derive(Debug)]
pub enum DbError {
    // -- Lifecycle --
    /// The database is closing or has closed; no new operations are accepted.
    DatabaseClosing,
    /// An operation was attempted before the repository was opened.
    RepositoryNotOpen,

    // -- Input --
    /// A document was submitted with no identifier and none could be derived.
    UndefinedDocumentId,
    /// A document identifier contains a character outside the allowed set.
    InvalidIdCharacter {
        /// The offending identifier.
        id: String,
    },
    /// A document's content is not a valid JSON object.
    InvalidJsonObject {
        /// The identifier of the offending document, if known.
        id: Option<String>,
    },
    /// The requested serialization format is recognized but not implemented.
    UnsupportedSerializeFormat {
        /// The format that was requested.
        format: String,
    },

    // -- Sync configuration --
    /// A sync binding was configured without a remote URL.
    UndefinedRemoteURL,
    /// The remote URL does not use `http`/`https`.
    HttpProtocolRequired {
        /// The URL that was rejected.
        url: String,
    },
    /// A sync binding requires an access token and none was supplied.
    UndefinedAccessToken,
    /// The remote repository URL could not be parsed.
    InvalidRepositoryURL {
        /// The URL that failed to parse.
        url: String,
    },
    /// The configured live-sync interval is below the system minimum.
    IntervalTooSmall {
        /// The interval that was rejected, in milliseconds.
        interval_ms: u64,
        /// The system minimum, in milliseconds.
        minimum_ms: u64,
    },
    /// `interval` is not strictly greater than `retryInterval`.
    SyncIntervalLessThanOrEqualToRetryInterval {
        /// The configured sync interval, in milliseconds.
        interval_ms: u64,
        /// The configured retry interval, in milliseconds.
        retry_interval_ms: u64,
    },
    /// A push was attempted but the sync binding forbids pushing.
    PushNotAllowed,
    /// An operation that requires a sync binding was attempted without one.
    UndefinedSync,

    // -- Sync execution --
    /// Could not establish a connection to the remote repository.
    RemoteRepositoryConnect {
        /// Details from the underlying transport failure.
        detail: String,
    },
    /// A network-level connection failure occurred mid-protocol.
    CannotConnect {
        /// Details from the underlying transport failure.
        detail: String,
    },
    /// A required tree or blob entry could not be read during sync.
    CannotGetEntry {
        /// The path that could not be read.
        path: String,
    },
    /// The remote has commits that a prior fetch did not retrieve.
    UnfetchedCommitExists,
    /// No common ancestor exists and `combineDbStrategy = throw-error`.
    NoMergeBaseFound,
    /// The conflict-resolution state machine reached an inconsistent state.
    InvalidConflictState {
        /// Human-readable description of the inconsistency.
        detail: String,
    },
    /// The fetch step of a sync failed after exhausting retries.
    SyncWorkerFetch {
        /// Details from the underlying failure.
        detail: String,
    },
    /// The push step of a sync failed for a non-retriable reason.
    PushWorker {
        /// Details from the underlying failure.
        detail: String,
    },

    /// Wraps an error from the underlying git backend that doesn't map to a
    /// more specific variant above.
    Git(gitdocdb_git::GitError),
    /// An I/O error occurred (file system, etc.).
    Io(std::io::Error),
    /// A JSON (de)serialization error occurred.
    Json(serde_json::Error),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DatabaseClosing => write!(
                f,
                "the database is closing; no new operations are accepted.\n  To fix: await the in-flight close, then open a new handle."
            ),
            Self::RepositoryNotOpen => write!(
                f,
                "the repository is not open.\n  To fix: call Database::open before issuing operations."
            ),
            Self::UndefinedDocumentId => write!(
                f,
                "document has no identifier and none could be derived.\n  To fix: set a primary-key attribute or pass an explicit id."
            ),
            Self::InvalidIdCharacter { id } => write!(
                f,
                "document id {id:?} contains a disallowed character.\n  To fix: use identifiers composed of alphanumerics, '-', and '_'."
            ),
            Self::InvalidJsonObject { id } => write!(
                f,
                "document{} is not a valid JSON object.\n  To fix: ensure the value serializes to a JSON object, not an array or scalar.",
                id.as_ref().map(|i| format!(" '{i}'")).unwrap_or_default()
            ),
            Self::UnsupportedSerializeFormat { format } => write!(
                f,
                "serialize format '{format}' is not implemented.\n  To fix: open the database with serialize = \"json\"."
            ),
            Self::UndefinedRemoteURL => write!(
                f,
                "sync requires a remote URL.\n  To fix: set `remoteUrl` in the sync options."
            ),
            Self::HttpProtocolRequired { url } => write!(
                f,
                "remote URL '{url}' must use http or https.\n  To fix: use an http(s) URL for the remote."
            ),
            Self::UndefinedAccessToken => write!(
                f,
                "sync requires an access token and none was provided.\n  To fix: set `accessToken` or its environment variable."
            ),
            Self::InvalidRepositoryURL { url } => write!(
                f,
                "'{url}' could not be parsed as a repository URL.\n  To fix: check the URL for typos or missing scheme."
            ),
            Self::IntervalTooSmall {
                interval_ms,
                minimum_ms,
            } => write!(
                f,
                "live sync interval {interval_ms}ms is below the minimum of {minimum_ms}ms.\n  To fix: increase `interval`."
            ),
            Self::SyncIntervalLessThanOrEqualToRetryInterval {
                interval_ms,
                retry_interval_ms,
            } => write!(
                f,
                "sync interval {interval_ms}ms must exceed retry interval {retry_interval_ms}ms.\n  To fix: increase `interval` or decrease `retryInterval`."
            ),
            Self::PushNotAllowed => write!(
                f,
                "this sync binding does not allow pushing.\n  To fix: set `syncDirection` to \"push\" or \"both\"."
            ),
            Self::UndefinedSync => write!(
                f,
                "no sync binding is configured for this database.\n  To fix: call Database::sync_with before requesting a sync."
            ),
            Self::RemoteRepositoryConnect { detail } => {
                write!(f, "could not connect to the remote repository: {detail}")
            }
            Self::CannotConnect { detail } => write!(f, "network connection failed: {detail}"),
            Self::CannotGetEntry { path } => write!(
                f,
                "could not read tree entry at '{path}' during sync; the repository tree may be corrupted."
            ),
            Self::UnfetchedCommitExists => write!(
                f,
                "the remote advanced past the last fetch.\n  To fix: fetch again before retrying the sync."
            ),
            Self::NoMergeBaseFound => write!(
                f,
                "local and remote share no common ancestor.\n  To fix: set combineDbStrategy = \"combine-head-with-theirs\" to graft the histories."
            ),
            Self::InvalidConflictState { detail } => {
                write!(f, "conflict resolution reached an inconsistent state: {detail}")
            }
            Self::SyncWorkerFetch { detail } => {
                write!(f, "fetch failed after exhausting retries: {detail}")
            }
            Self::PushWorker { detail } => write!(f, "push failed: {detail}"),
            Self::Git(e) => write!(f, "git backend error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Git(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl From<gitdocdb_git::GitError> for DbError {
    fn from(err: gitdocdb_git::GitError) -> Self {
        Self::Git(err)
    }
}

/// Error loading a gitdocdb open/sync options struct from untyped JSON.
#[derive(Debug)]
pub struct OptionsError {
    /// Path to the source, if loaded from a file.
    pub path: Option<PathBuf>,
    /// Human-readable message.
    pub message: String,
}

impl fmt::Display for OptionsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "options error: {}", self.message)
        }
    }
}

impl std::error::Error for OptionsError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_database_closing() {
        let msg = format!("{}", DbError::DatabaseClosing);
        assert!(msg.contains("closing"));
    }

    #[test]
    fn display_invalid_id_character() {
        let err = DbError::InvalidIdCharacter {
            id: "bad id!".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("bad id!"));
        assert!(msg.contains("disallowed character"));
    }

    #[test]
    fn display_no_merge_base_found() {
        let msg = format!("{}", DbError::NoMergeBaseFound);
        assert!(msg.contains("no common ancestor"));
        assert!(msg.contains("combine-head-with-theirs"));
    }

    #[test]
    fn error_source_io() {
        let err = DbError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn error_source_non_wrapped_is_none() {
        assert!(std::error::Error::source(&DbError::DatabaseClosing).is_none());
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::other("disk full");
        let err: DbError = io_err.into();
        assert!(matches!(err, DbError::Io(_)));
    }
}

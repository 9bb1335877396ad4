//! Database and sync configuration.
//!
//! Defines [`OpenOptions`] (database-open options: `dbName`, `localDir`,
//! `serialize`, `schema` version) and [`SyncOptions`] (the closed set of
//! sync-binding options from spec §4.7/§6). Both are plain `serde`-derived
//! structs with `#[serde(deny_unknown_fields)]` so unknown keys are rejected
//! at open, and both validate synchronously in their constructors — matching
//! the teacher's `config.rs` validation-at-construction style.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::DbError;
use crate::model::document::FatDoc;

/// Minimum allowed live-sync interval, in milliseconds.
pub const MINIMUM_INTERVAL_MS: u64 = 1_000;

/// Default number of sync retries (spec §4.7: "default defined per deployment").
const DEFAULT_RETRY: u32 = 3;

/// Default delay between sync retries, in milliseconds.
const DEFAULT_RETRY_INTERVAL_MS: u64 = 2_500;

// ---------------------------------------------------------------------------
// OpenOptions
// ---------------------------------------------------------------------------

/// Options controlling how a database is opened (spec §6).
///
/// Unknown keys are rejected: `#[serde(deny_unknown_fields)]`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenOptions {
    /// Logical name of the database, used to derive default paths and as
    /// the database identity recorded under `.gitddb/`.
    pub db_name: String,

    /// Local directory backing the repository. Created if it does not
    /// exist.
    pub local_dir: PathBuf,

    /// Document serialization format.
    #[serde(default)]
    pub serialize: SerializeFormat,

    /// Schema version recorded in `.gitddb/` on first open.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

const fn default_schema_version() -> u32 {
    1
}

impl OpenOptions {
    /// Create new open options, validating `db_name` and `serialize`.
    ///
    /// # Errors
    /// Returns [`DbError::InvalidIdCharacter`] if `db_name` is empty, and
    /// [`DbError::UnsupportedSerializeFormat`] if `serialize` names a format
    /// other than [`SerializeFormat::Json`] (spec §9 Open Questions: only
    /// `.json` is implemented).
    pub fn new(db_name: impl Into<String>, local_dir: impl Into<PathBuf>) -> Result<Self, DbError> {
        let opts = Self {
            db_name: db_name.into(),
            local_dir: local_dir.into(),
            serialize: SerializeFormat::Json,
            schema_version: default_schema_version(),
        };
        opts.validate()?;
        Ok(opts)
    }

    /// Validate this set of options.
    ///
    /// # Errors
    /// See [`OpenOptions::new`].
    pub fn validate(&self) -> Result<(), DbError> {
        if self.db_name.is_empty() {
            return Err(DbError::InvalidIdCharacter {
                id: self.db_name.clone(),
            });
        }
        if self.serialize != SerializeFormat::Json {
            return Err(DbError::UnsupportedSerializeFormat {
                format: self.serialize.to_string(),
            });
        }
        Ok(())
    }
}

/// Document serialization format (spec §6 storage layout).
///
/// Only [`SerializeFormat::Json`] is implemented; the other variants exist
/// because the storage layout names them, but selecting one at
/// [`crate::Database::open`] returns [`DbError::UnsupportedSerializeFormat`]
/// (spec §9 Open Questions).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SerializeFormat {
    /// Plain JSON, one document per blob. The only implemented format.
    #[default]
    Json,
    /// Markdown with YAML front-matter.
    FrontMatter,
    /// Plain YAML.
    Yaml,
}

impl SerializeFormat {
    /// The file extension used for documents stored in this format.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => ".json",
            Self::FrontMatter => ".md",
            Self::Yaml => ".yml",
        }
    }
}

impl fmt::Display for SerializeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::FrontMatter => write!(f, "front-matter"),
            Self::Yaml => write!(f, "yaml"),
        }
    }
}

// ---------------------------------------------------------------------------
// SyncOptions
// ---------------------------------------------------------------------------

/// Sync-binding options (spec §4.7's closed configuration set).
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncOptions {
    /// URL of the remote repository.
    pub remote_url: String,

    /// Access token for the remote, if required by its transport.
    #[serde(default)]
    pub access_token: Option<String>,

    /// Direction to synchronize. Default `both`.
    #[serde(default)]
    pub sync_direction: SyncDirection,

    /// Whether to re-run sync on a timer. Default `false`.
    #[serde(default)]
    pub live: bool,

    /// Milliseconds between live syncs. Required if `live` is `true`; must
    /// exceed [`MINIMUM_INTERVAL_MS`] and `retry_interval_ms`.
    #[serde(default)]
    pub interval_ms: Option<u64>,

    /// Maximum retries per failed sync attempt.
    #[serde(default = "default_retry")]
    pub retry: u32,

    /// Delay between retries, in milliseconds. Must be strictly less than
    /// `interval_ms` when `live` is set.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Strategy tag for conflict resolution (spec §4.4). Default
    /// `ours-prop` (spec: "`ours-diff`, i.e. prefer ours with property-level
    /// diff").
    #[serde(default)]
    pub conflict_resolution_strategy: StrategyTag,

    /// Strategy for unrelated-history combination (spec §4.8).
    #[serde(default)]
    pub combine_db_strategy: CombineDbStrategy,

    /// Whether `SyncResult` should include full commit metadata.
    #[serde(default)]
    pub include_commits: bool,
}

const fn default_retry() -> u32 {
    DEFAULT_RETRY
}

const fn default_retry_interval_ms() -> u64 {
    DEFAULT_RETRY_INTERVAL_MS
}

impl SyncOptions {
    /// Validate this set of options (spec §4.7, §7 sync-configuration
    /// errors).
    ///
    /// # Errors
    /// Returns the specific `DbError` sync-configuration variant for the
    /// first violated constraint.
    pub fn validate(&self) -> Result<(), DbError> {
        if self.remote_url.is_empty() {
            return Err(DbError::UndefinedRemoteURL);
        }
        if !(self.remote_url.starts_with("http://") || self.remote_url.starts_with("https://")) {
            return Err(DbError::HttpProtocolRequired {
                url: self.remote_url.clone(),
            });
        }
        if self.live {
            let interval_ms = self.interval_ms.unwrap_or(0);
            if interval_ms < MINIMUM_INTERVAL_MS {
                return Err(DbError::IntervalTooSmall {
                    interval_ms,
                    minimum_ms: MINIMUM_INTERVAL_MS,
                });
            }
            if interval_ms <= self.retry_interval_ms {
                return Err(DbError::SyncIntervalLessThanOrEqualToRetryInterval {
                    interval_ms,
                    retry_interval_ms: self.retry_interval_ms,
                });
            }
        }
        Ok(())
    }

    /// Whether this binding permits pushing.
    #[must_use]
    pub const fn allows_push(&self) -> bool {
        matches!(self.sync_direction, SyncDirection::Push | SyncDirection::Both)
    }

    /// Whether this binding permits pulling.
    #[must_use]
    pub const fn allows_pull(&self) -> bool {
        matches!(self.sync_direction, SyncDirection::Pull | SyncDirection::Both)
    }
}

/// Direction to synchronize (spec §4.7).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncDirection {
    /// Only push local commits.
    Push,
    /// Only pull remote commits.
    Pull,
    /// Push and pull. Default.
    #[default]
    Both,
}

/// Strategy tag recognized in serialized configuration (spec §4.4).
///
/// The runtime [`Strategy`] enum additionally supports a `Custom` closure
/// variant that cannot be expressed in a deserializable config struct; a
/// `SyncOptions` value only ever selects one of these four.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyTag {
    /// Accept the local side's last value.
    Ours,
    /// Accept the remote side's last value.
    Theirs,
    /// Merge property-by-property via OT, left-biased (ours wins ties).
    #[default]
    OursProp,
    /// Merge property-by-property via OT, right-biased (theirs wins ties).
    TheirsProp,
}

impl fmt::Display for StrategyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ours => write!(f, "ours"),
            Self::Theirs => write!(f, "theirs"),
            Self::OursProp => write!(f, "ours-prop"),
            Self::TheirsProp => write!(f, "theirs-prop"),
        }
    }
}

/// Runtime conflict-resolution strategy (spec §4.4).
///
/// Unlike [`StrategyTag`], this can carry a user-supplied dynamic tie-break
/// function, so it is not `Deserialize` — construct it from a [`StrategyTag`]
/// via [`Strategy::from_tag`] or build a [`Strategy::Custom`] directly.
#[derive(Clone)]
pub enum Strategy {
    /// Accept the local side's last value.
    Ours,
    /// Accept the remote side's last value.
    Theirs,
    /// Merge property-by-property via OT, left-biased.
    OursProp,
    /// Merge property-by-property via OT, right-biased.
    TheirsProp,
    /// Dynamic tie-break: given the two sides (either may be absent),
    /// decides whether `ours` or `theirs` wins.
    Custom(Arc<dyn Fn(Option<&FatDoc>, Option<&FatDoc>) -> StrategyTag + Send + Sync>),
}

impl Strategy {
    /// Build a `Strategy` from a closed-set tag.
    #[must_use]
    pub const fn from_tag(tag: StrategyTag) -> Self {
        match tag {
            StrategyTag::Ours => Self::Ours,
            StrategyTag::Theirs => Self::Theirs,
            StrategyTag::OursProp => Self::OursProp,
            StrategyTag::TheirsProp => Self::TheirsProp,
        }
    }

    /// Resolve this strategy to a concrete tag for a specific path, invoking
    /// the custom function if this is [`Strategy::Custom`].
    #[must_use]
    pub fn resolve_tag(&self, ours: Option<&FatDoc>, theirs: Option<&FatDoc>) -> StrategyTag {
        match self {
            Self::Ours => StrategyTag::Ours,
            Self::Theirs => StrategyTag::Theirs,
            Self::OursProp => StrategyTag::OursProp,
            Self::TheirsProp => StrategyTag::TheirsProp,
            Self::Custom(f) => f(ours, theirs),
        }
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ours => write!(f, "Strategy::Ours"),
            Self::Theirs => write!(f, "Strategy::Theirs"),
            Self::OursProp => write!(f, "Strategy::OursProp"),
            Self::TheirsProp => write!(f, "Strategy::TheirsProp"),
            Self::Custom(_) => write!(f, "Strategy::Custom(..)"),
        }
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Self::from_tag(StrategyTag::default())
    }
}

/// Strategy for unrelated-history combination (spec §4.8).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CombineDbStrategy {
    /// Fail with [`DbError::NoMergeBaseFound`] instead of combining.
    ThrowError,
    /// Graft remote history as a prior parent, deduplicating colliding
    /// paths. Default.
    #[default]
    CombineHeadWithTheirs,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_options_defaults() {
        let opts = OpenOptions::new("mydb", "/tmp/mydb").unwrap();
        assert_eq!(opts.serialize, SerializeFormat::Json);
        assert_eq!(opts.schema_version, 1);
    }

    #[test]
    fn open_options_rejects_empty_name() {
        let err = OpenOptions::new("", "/tmp/mydb").unwrap_err();
        assert!(matches!(err, DbError::InvalidIdCharacter { .. }));
    }

    #[test]
    fn open_options_rejects_unknown_field() {
        let json = r#"{"db_name":"a","local_dir":"/tmp","bogus":true}"#;
        let err = serde_json::from_str::<OpenOptions>(json).unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn serialize_format_extension() {
        assert_eq!(SerializeFormat::Json.extension(), ".json");
        assert_eq!(SerializeFormat::FrontMatter.extension(), ".md");
        assert_eq!(SerializeFormat::Yaml.extension(), ".yml");
    }

    fn base_sync_json(remote_url: &str) -> String {
        format!(r#"{{"remote_url":"{remote_url}"}}"#)
    }

    #[test]
    fn sync_options_defaults() {
        let opts: SyncOptions = serde_json::from_str(&base_sync_json("https://example.com/db.git")).unwrap();
        assert_eq!(opts.sync_direction, SyncDirection::Both);
        assert!(!opts.live);
        assert_eq!(opts.retry, DEFAULT_RETRY);
        assert_eq!(opts.retry_interval_ms, DEFAULT_RETRY_INTERVAL_MS);
        assert_eq!(opts.conflict_resolution_strategy, StrategyTag::OursProp);
        assert_eq!(opts.combine_db_strategy, CombineDbStrategy::CombineHeadWithTheirs);
        opts.validate().unwrap();
    }

    #[test]
    fn sync_options_rejects_empty_remote_url() {
        let opts: SyncOptions = serde_json::from_str(&base_sync_json("")).unwrap();
        assert!(matches!(opts.validate(), Err(DbError::UndefinedRemoteURL)));
    }

    #[test]
    fn sync_options_rejects_non_http_url() {
        let opts: SyncOptions = serde_json::from_str(&base_sync_json("git@example.com:db.git")).unwrap();
        assert!(matches!(opts.validate(), Err(DbError::HttpProtocolRequired { .. })));
    }

    #[test]
    fn sync_options_rejects_interval_too_small() {
        let json = r#"{"remote_url":"https://example.com/db.git","live":true,"interval_ms":500}"#;
        let opts: SyncOptions = serde_json::from_str(json).unwrap();
        assert!(matches!(opts.validate(), Err(DbError::IntervalTooSmall { .. })));
    }

    #[test]
    fn sync_options_rejects_interval_not_exceeding_retry_interval() {
        let json = r#"{"remote_url":"https://example.com/db.git","live":true,"interval_ms":2000,"retry_interval_ms":2000}"#;
        let opts: SyncOptions = serde_json::from_str(json).unwrap();
        assert!(matches!(
            opts.validate(),
            Err(DbError::SyncIntervalLessThanOrEqualToRetryInterval { .. })
        ));
    }

    #[test]
    fn sync_options_allows_push_pull() {
        let mut opts: SyncOptions = serde_json::from_str(&base_sync_json("https://example.com/db.git")).unwrap();
        assert!(opts.allows_push());
        assert!(opts.allows_pull());
        opts.sync_direction = SyncDirection::Push;
        assert!(opts.allows_push());
        assert!(!opts.allows_pull());
    }

    #[test]
    fn strategy_from_tag_resolves_without_calling_custom() {
        let strategy = Strategy::from_tag(StrategyTag::Theirs);
        assert_eq!(strategy.resolve_tag(None, None), StrategyTag::Theirs);
    }

    #[test]
    fn strategy_custom_invokes_closure() {
        let strategy = Strategy::Custom(Arc::new(|_ours, _theirs| StrategyTag::Ours));
        assert_eq!(strategy.resolve_tag(None, None), StrategyTag::Ours);
    }
}

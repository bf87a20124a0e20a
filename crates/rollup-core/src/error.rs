use std::fmt;
use std::path::PathBuf;

use crate::model::WorkItemId;

/// Errors raised while computing or persisting rollups.
#[derive(Debug, thiserror::Error)]
pub enum RollupError {
    /// An item is referenced by the hierarchy but was not fetched.
    #[error("work item {item} has no field snapshot{}", fmt_parent(.parent))]
    MissingSnapshot {
        item: WorkItemId,
        parent: Option<WorkItemId>,
    },

    /// One write batch was rejected. Other batches may already have committed.
    #[error("write batch {batch} of {batches} ({items} items) failed: {source:#}")]
    BatchWrite {
        /// 1-based index of the first failed batch.
        batch: usize,
        batches: usize,
        items: usize,
        #[source]
        source: anyhow::Error,
    },

    /// A batch size of zero cannot partition anything.
    #[error("batch size must be at least 1")]
    InvalidBatchSize,

    /// A collaborator (query, fetch) failed before aggregation.
    #[error("{operation} failed: {source:#}")]
    Source {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

#[allow(clippy::ref_option)]
fn fmt_parent(parent: &Option<WorkItemId>) -> String {
    parent.map_or_else(String::new, |p| format!(" (child of {p})"))
}

impl RollupError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::MissingSnapshot { .. } => ErrorCode::MissingSnapshot,
            Self::BatchWrite { .. } => ErrorCode::PartialWriteFailure,
            Self::InvalidBatchSize => ErrorCode::InvalidBatchSize,
            Self::Source { .. } => ErrorCode::SourceUnavailable,
        }
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Read { .. } | Self::Parse { .. } => ErrorCode::ConfigParseError,
            Self::Invalid(_) => ErrorCode::ConfigInvalid,
        }
    }
}

/// Machine-readable error codes for scripted callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    ConfigInvalid,
    SourceUnavailable,
    MissingSnapshot,
    InvalidBatchSize,
    PartialWriteFailure,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::ConfigInvalid => "E1002",
            Self::SourceUnavailable => "E2001",
            Self::MissingSnapshot => "E3001",
            Self::InvalidBatchSize => "E4001",
            Self::PartialWriteFailure => "E4002",
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in rollup.toml and retry."),
            Self::ConfigInvalid => {
                Some("Set organization, project and a token via rollup.toml, env or flags.")
            }
            Self::SourceUnavailable => {
                Some("Check the organization, project, token scope and query text.")
            }
            Self::MissingSnapshot => {
                Some("The item may have been deleted or moved mid-run; rerun the rollup.")
            }
            Self::InvalidBatchSize => Some("Use a batch size between 1 and 200."),
            Self::PartialWriteFailure => Some(
                "Some batches may have committed. Rerun; a full recompute re-detects what still differs.",
            ),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

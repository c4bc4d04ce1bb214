//! Structured error taxonomy shared across every component.
//!
//! Every error raised out of this crate carries machine-readable `details`
//! and at least two actionable `suggestions`, so a calling agent (or a
//! human operator reading a log line) has enough context to recover
//! without re-running the operation blind.

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

/// Structured context attached to a [`CoreError`].
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ErrorDetails {
    pub file: Option<PathBuf>,
    pub extra: BTreeMap<String, String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.extra.insert(key.into(), value.to_string());
        self
    }
}

/// The four named governance failures §7 enumerates. Each is fatal for
/// the offending file only; the pipeline records it and moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum GovernanceKind {
    ChunkingTimeout,
    ChunkLimitExceeded,
    BinaryFile,
    AstDepthExceeded,
}

impl GovernanceKind {
    pub fn label(&self) -> &'static str {
        match self {
            GovernanceKind::ChunkingTimeout => "ChunkingTimeout",
            GovernanceKind::ChunkLimitExceeded => "ChunkLimitExceeded",
            GovernanceKind::BinaryFile => "BinaryFile",
            GovernanceKind::AstDepthExceeded => "ASTDepthExceeded",
        }
    }
}

/// The full error taxonomy. Each variant maps to one row of the error
/// design's raised-error table: Configuration, Parse, Oversized,
/// Governance, Provider (transient/permanent), VectorStore unreachable,
/// and query-time errors.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {message}")]
    Configuration {
        message: String,
        details: ErrorDetails,
        suggestions: Vec<String>,
    },

    #[error("failed to parse: {message}")]
    Parse {
        message: String,
        details: ErrorDetails,
        suggestions: Vec<String>,
    },

    #[error("chunk exceeded maximum size: {message}")]
    Oversized {
        message: String,
        details: ErrorDetails,
        suggestions: Vec<String>,
    },

    #[error("governance rule violated ({kind:?}): {message}")]
    Governance {
        kind: GovernanceKind,
        message: String,
        details: ErrorDetails,
        suggestions: Vec<String>,
    },

    #[error("embedding provider transient failure: {message}")]
    ProviderTransient {
        message: String,
        details: ErrorDetails,
        suggestions: Vec<String>,
    },

    #[error("embedding provider permanent failure: {message}")]
    ProviderPermanent {
        message: String,
        details: ErrorDetails,
        suggestions: Vec<String>,
    },

    #[error("vector store unreachable: {message}")]
    VectorStoreUnreachable {
        message: String,
        details: ErrorDetails,
        suggestions: Vec<String>,
    },

    #[error("query failed: {message}")]
    QueryError {
        message: String,
        details: ErrorDetails,
        suggestions: Vec<String>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl CoreError {
    pub fn suggestions(&self) -> &[String] {
        match self {
            CoreError::Configuration { suggestions, .. }
            | CoreError::Parse { suggestions, .. }
            | CoreError::Oversized { suggestions, .. }
            | CoreError::Governance { suggestions, .. }
            | CoreError::ProviderTransient { suggestions, .. }
            | CoreError::ProviderPermanent { suggestions, .. }
            | CoreError::VectorStoreUnreachable { suggestions, .. }
            | CoreError::QueryError { suggestions, .. } => suggestions,
            CoreError::Io(_) | CoreError::Serde(_) => &[],
        }
    }

    pub fn details(&self) -> Option<&ErrorDetails> {
        match self {
            CoreError::Configuration { details, .. }
            | CoreError::Parse { details, .. }
            | CoreError::Oversized { details, .. }
            | CoreError::Governance { details, .. }
            | CoreError::ProviderTransient { details, .. }
            | CoreError::ProviderPermanent { details, .. }
            | CoreError::VectorStoreUnreachable { details, .. }
            | CoreError::QueryError { details, .. } => Some(details),
            CoreError::Io(_) | CoreError::Serde(_) => None,
        }
    }

    /// Whether retrying the same operation immediately is expected to help.
    /// `Provider.Transient` and `VectorStore.Unreachable` are the only
    /// variants worth a retry loop; everything else needs a config or
    /// content change first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::ProviderTransient { .. } | CoreError::VectorStoreUnreachable { .. }
        )
    }
}

/// Builds a [`CoreError::Governance`] with the two-suggestion floor enforced.
pub fn governance_error(
    kind: GovernanceKind,
    file: impl Into<PathBuf>,
    message: impl Into<String>,
    suggestions: Vec<String>,
) -> CoreError {
    debug_assert!(suggestions.len() >= 2, "errors must carry >= 2 suggestions");
    CoreError::Governance {
        kind,
        message: message.into(),
        details: ErrorDetails::new().with_file(file),
        suggestions,
    }
}

/// Builds a [`CoreError::Parse`] with the two-suggestion floor enforced.
pub fn parse_error(
    file: impl Into<PathBuf>,
    message: impl Into<String>,
    suggestions: Vec<String>,
) -> CoreError {
    debug_assert!(suggestions.len() >= 2, "errors must carry >= 2 suggestions");
    CoreError::Parse {
        message: message.into(),
        details: ErrorDetails::new().with_file(file),
        suggestions,
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

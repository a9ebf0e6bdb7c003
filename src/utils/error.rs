use std::fmt;
use thiserror::Error;

/// Why the source reader stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    NotFound,
    MalformedHeader,
    IoFailure,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("source error ({kind:?}): {message}")]
pub struct SourceError {
    pub kind: SourceErrorKind,
    pub message: String,
}

impl SourceError {
    pub fn new(kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::NotFound, message)
    }

    pub fn malformed_header(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::MalformedHeader, message)
    }

    pub fn io_failure(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::IoFailure, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformErrorKind {
    MissingField,
    InvalidDate,
    InvalidAmount,
}

/// A single record could not be coerced into a `PaymentRow`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct TransformError {
    pub kind: TransformErrorKind,
    pub field: String,
    pub raw_value: Option<String>,
    /// Line of the offending record in the input, when known.
    pub line: Option<u64>,
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            TransformErrorKind::MissingField => "missing field",
            TransformErrorKind::InvalidDate => "invalid date",
            TransformErrorKind::InvalidAmount => "invalid amount",
        };
        write!(f, "{} '{}'", what, self.field)?;
        if let Some(raw) = &self.raw_value {
            write!(f, " (value: '{}')", raw)?;
        }
        if let Some(line) = self.line {
            write!(f, " at line {}", line)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("could not connect to {target}: {message}")]
pub struct ConnectionError {
    pub target: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitErrorKind {
    ConstraintViolation,
    ConnectionLost,
    Timeout,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("batch {batch_index} was rolled back ({kind:?}): {message}")]
pub struct CommitError {
    pub kind: CommitErrorKind,
    pub batch_index: usize,
    pub message: String,
}

/// Failures reported by a store handle. The committer decides what they mean for a batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("statement rejected: {0}")]
    Rejected(String),

    #[error("connection lost: {0}")]
    Connection(String),

    #[error("no transaction is open")]
    NoTransaction,
}

impl StoreError {
    pub fn commit_kind(&self) -> CommitErrorKind {
        match self {
            StoreError::Rejected(_) => CommitErrorKind::ConstraintViolation,
            StoreError::Connection(_) | StoreError::NoTransaction => {
                CommitErrorKind::ConnectionLost
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum EtlError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Commit(#[from] CommitError),

    #[error("run cancelled after {batches} batches")]
    Cancelled { batches: usize },

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration error in '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Input,
    Data,
    Database,
    Configuration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl EtlError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EtlError::Source(_) | EtlError::CsvError(_) => ErrorCategory::Input,
            EtlError::Transform(_) => ErrorCategory::Data,
            EtlError::Connection(_) | EtlError::Commit(_) => ErrorCategory::Database,
            EtlError::ConfigError { .. }
            | EtlError::ConfigValidationError { .. }
            | EtlError::MissingConfigError { .. }
            | EtlError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            EtlError::Cancelled { .. }
            | EtlError::IoError(_)
            | EtlError::SerializationError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            EtlError::Commit(e) if e.kind == CommitErrorKind::Timeout => ErrorSeverity::Medium,
            EtlError::Connection(_) | EtlError::Cancelled { .. } => ErrorSeverity::Medium,
            EtlError::Source(_)
            | EtlError::Transform(_)
            | EtlError::Commit(_)
            | EtlError::CsvError(_)
            | EtlError::ConfigError { .. }
            | EtlError::ConfigValidationError { .. }
            | EtlError::MissingConfigError { .. }
            | EtlError::InvalidConfigValueError { .. } => ErrorSeverity::High,
            EtlError::IoError(_) | EtlError::SerializationError(_) => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            EtlError::Source(e) => match e.kind {
                SourceErrorKind::NotFound => "Check that the input file path is correct and readable",
                SourceErrorKind::MalformedHeader => {
                    "Check the header row and the configured delimiter and column names"
                }
                SourceErrorKind::IoFailure => {
                    "The input ended early; verify the file is complete and UTF-8 encoded"
                }
            },
            EtlError::Transform(_) => {
                "Fix the offending row or rerun with --on-transform-error skip"
            }
            EtlError::Connection(_) => "Verify host, port, credentials and that the database exists",
            EtlError::Commit(e) => match e.kind {
                CommitErrorKind::ConstraintViolation => {
                    "Check the destination table definition against the input values"
                }
                CommitErrorKind::ConnectionLost => "Check database availability and rerun",
                CommitErrorKind::Timeout => "Lower the batch size or raise the commit timeout",
            },
            EtlError::Cancelled { .. } => "Rerun to load the remaining rows",
            EtlError::CsvError(_) => "Verify the input is valid delimited text",
            EtlError::ConfigError { .. }
            | EtlError::ConfigValidationError { .. }
            | EtlError::MissingConfigError { .. }
            | EtlError::InvalidConfigValueError { .. } => {
                "Review the command line flags or configuration file"
            }
            EtlError::IoError(_) => "Check file permissions and available disk space",
            EtlError::SerializationError(_) => "Report this as a bug",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            EtlError::Source(e) => format!("Could not read the input file: {}", e.message),
            EtlError::Transform(e) => format!("A row could not be converted: {}", e),
            EtlError::Connection(e) => format!("Database connection failed: {}", e.message),
            EtlError::Commit(e) => format!("Batch {} could not be saved: {}", e.batch_index, e.message),
            EtlError::Cancelled { batches } => {
                format!("The load was cancelled after {} batches", batches)
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;

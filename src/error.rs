use serde::{Deserialize, Serialize};

/// litequery errors. Validation and build errors are local to the caller and
/// recoverable by fixing the row or plan. Store errors carry the store's own
/// message text unmodified.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// The execution was cancelled by the caller.
    Cancelled,
    /// Invalid configuration.
    Config(String),
    /// A row violates a table constraint, either detected by the validator
    /// before submission or reported by the store at write time.
    Constraint(ConstraintViolation),
    /// A store-level failure. The message is the store's, verbatim.
    Execution(String),
    /// An IO error.
    IO(String),
    /// A malformed query plan, e.g. an alias referenced before definition.
    QueryBuild(String),
    /// Invalid schema registry input, e.g. duplicate column names.
    SchemaDefinition(String),
    /// The execution was aborted because it exceeded its deadline.
    Timeout,
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Cancelled => write!(f, "execution cancelled"),
            Error::Config(msg) => write!(f, "invalid config: {msg}"),
            Error::Constraint(violation) => violation.fmt(f),
            Error::Execution(msg) => write!(f, "{msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
            Error::QueryBuild(msg) => write!(f, "invalid query: {msg}"),
            Error::SchemaDefinition(msg) => write!(f, "invalid schema: {msg}"),
            Error::Timeout => write!(f, "execution timed out"),
        }
    }
}

impl Error {
    /// Returns whether the operation may be retried unchanged. Only timeouts
    /// qualify, since a timed out call never takes effect. Retrying a failed
    /// constrained write without fixing the row would fail the same way.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout)
    }

    /// Returns the constraint violation, if any.
    pub fn violation(&self) -> Option<&ConstraintViolation> {
        match self {
            Error::Constraint(violation) => Some(violation),
            _ => None,
        }
    }
}

/// The kind of constraint that a row violated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintKind {
    Check,
    NotNull,
    PrimaryKey,
    TypeMismatch,
    Unique,
}

impl std::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Check => "CHECK",
            Self::NotNull => "NOT NULL",
            Self::PrimaryKey => "PRIMARY KEY",
            Self::TypeMismatch => "TYPE",
            Self::Unique => "UNIQUE",
        })
    }
}

/// A constraint violation. The detail uses the store's wording, so callers
/// see the same text whether the validator or the store caught the row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstraintViolation {
    pub kind: ConstraintKind,
    /// The offending column, qualified by table name where known.
    pub column: String,
    pub detail: String,
}

impl std::fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.detail)
    }
}

/// Constructs an Error::SchemaDefinition for the given format string.
#[macro_export]
macro_rules! errschema {
    ($($args:tt)*) => { $crate::error::Error::SchemaDefinition(format!($($args)*)).into() };
}

/// Constructs an Error::QueryBuild for the given format string.
#[macro_export]
macro_rules! errbuild {
    ($($args:tt)*) => { $crate::error::Error::QueryBuild(format!($($args)*)).into() };
}

/// Constructs an Error::Execution for the given format string.
#[macro_export]
macro_rules! errexec {
    ($($args:tt)*) => { $crate::error::Error::Execution(format!($($args)*)).into() };
}

/// A litequery Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl From<ConstraintViolation> for Error {
    fn from(violation: ConstraintViolation) -> Self {
        Error::Constraint(violation)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<log::ParseLevelError> for Error {
    fn from(err: log::ParseLevelError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<log::SetLoggerError> for Error {
    fn from(err: log::SetLoggerError) -> Self {
        Error::IO(err.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::QueryBuild(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Execution(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(err: std::str::Utf8Error) -> Self {
        Error::Execution(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Execution(err.to_string())
    }
}

impl From<crossbeam::channel::RecvError> for Error {
    fn from(_: crossbeam::channel::RecvError) -> Self {
        Error::Cancelled
    }
}

impl<T> From<crossbeam::channel::SendError<T>> for Error {
    fn from(_: crossbeam::channel::SendError<T>) -> Self {
        Error::Cancelled
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ffi;
        match &err {
            rusqlite::Error::SqliteFailure(failure, message)
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                let detail = message.clone().unwrap_or_else(|| err.to_string());
                let kind = match failure.extended_code {
                    ffi::SQLITE_CONSTRAINT_NOTNULL => ConstraintKind::NotNull,
                    ffi::SQLITE_CONSTRAINT_UNIQUE => ConstraintKind::Unique,
                    ffi::SQLITE_CONSTRAINT_PRIMARYKEY => ConstraintKind::PrimaryKey,
                    ffi::SQLITE_CONSTRAINT_DATATYPE => ConstraintKind::TypeMismatch,
                    _ => ConstraintKind::Check,
                };
                // The store names the column (or check expression) after the
                // first colon, e.g. "UNIQUE constraint failed: movies.title".
                let column = match kind {
                    ConstraintKind::TypeMismatch => detail
                        .rsplit_once(" column ")
                        .map(|(_, column)| column.to_string())
                        .unwrap_or_default(),
                    _ => detail
                        .split_once(": ")
                        .map(|(_, column)| column.to_string())
                        .unwrap_or_default(),
                };
                Error::Constraint(ConstraintViolation { kind, column, detail })
            }
            rusqlite::Error::SqliteFailure(failure, _)
                if failure.code == rusqlite::ErrorCode::OperationInterrupted =>
            {
                Error::Cancelled
            }
            _ => Error::Execution(err.to_string()),
        }
    }
}

//! Error types for forkpool.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// Identifier of a runnable, scoped to the pool that created it.
pub type RunnableId = u64;

/// Main error type for forkpool.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Could not decode payload: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Runnable {0} is not owned by this pool")]
    UnknownRunnable(RunnableId),
}

impl PoolError {
    /// Build the output-too-large protocol error.
    pub fn output_too_large(max_bytes: usize) -> Self {
        Self::Protocol(format!(
            "The output returned by this child process is too large. \
             The encoded output may only be {} bytes long.",
            max_bytes
        ))
    }

    /// The error kind this failure is reported as when it crosses the process boundary.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::INVALID_INPUT,
            Self::Protocol(_) => ErrorKind::PROTOCOL,
            Self::Remote(err) => err.kind.clone(),
            Self::Decode(_) | Self::Json(_) => ErrorKind::DECODE,
            Self::Io(_) | Self::UnknownRunnable(_) => ErrorKind::REMOTE,
        }
    }
}

/// Result type alias for forkpool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Tagged category of a task failure.
///
/// Kinds are dotted names. A kind accepts itself and every kind nested below
/// it, so a callback declared for `io` also receives `io.not_found`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErrorKind(Cow<'static, str>);

impl ErrorKind {
    /// Bad argument to `add` or to the child entry.
    pub const INVALID_INPUT: ErrorKind = ErrorKind(Cow::Borrowed("invalid_input"));
    /// Encoded output exceeded the configured maximum size.
    pub const PROTOCOL: ErrorKind = ErrorKind(Cow::Borrowed("protocol"));
    /// A payload could not be interpreted as the expected encoding.
    pub const DECODE: ErrorKind = ErrorKind(Cow::Borrowed("decode"));
    /// The task panicked.
    pub const PANIC: ErrorKind = ErrorKind(Cow::Borrowed("panic"));
    /// Generic container for failures whose original kind is unknown.
    pub const REMOTE: ErrorKind = ErrorKind(Cow::Borrowed("remote"));

    /// Create a kind from a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// Parse a kind name received from the other side of the process boundary.
    ///
    /// Returns `None` unless the name is a non-empty dotted identifier.
    pub fn parse(name: &str) -> Option<Self> {
        let valid = !name.is_empty()
            && name.split('.').all(|segment| {
                !segment.is_empty()
                    && segment
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            });
        valid.then(|| Self::new(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a callback declared for `self` accepts an error of kind `other`.
    pub fn accepts(&self, other: &ErrorKind) -> bool {
        let (declared, actual) = (self.as_str(), other.as_str());
        actual == declared
            || (actual.len() > declared.len()
                && actual.starts_with(declared)
                && actual.as_bytes()[declared.len()] == b'.')
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ErrorKind {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Error raised by task code.
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
    pub trace: String,
}

impl TaskError {
    /// Create a task error, capturing a backtrace when `RUST_BACKTRACE` enables one.
    pub fn new(kind: impl Into<ErrorKind>, message: impl Into<String>) -> Self {
        let backtrace = Backtrace::capture();
        let trace = match backtrace.status() {
            BacktraceStatus::Captured => backtrace.to_string(),
            _ => String::new(),
        };
        Self {
            kind: kind.into(),
            message: message.into(),
            trace,
        }
    }

    /// Wrap any error, recording its source chain as the trace.
    pub fn from_error(kind: impl Into<ErrorKind>, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut task_error = Self::new(kind, err.to_string());
        let causes: Vec<String> = std::iter::successors(err.source(), |e| e.source())
            .map(|cause| format!("caused by: {}", cause))
            .collect();
        if !causes.is_empty() {
            task_error.trace = causes.join("\n");
        }
        task_error
    }
}

impl From<PoolError> for TaskError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Remote(remote) => Self {
                kind: remote.kind,
                message: remote.message,
                trace: remote.trace,
            },
            other => Self::new(other.kind(), other.to_string()),
        }
    }
}

/// A failure reconstructed on the parent side of the process boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{original_type}: {message}")]
pub struct RemoteError {
    /// Kind used for callback dispatch.
    pub kind: ErrorKind,
    /// Type name as reported by the child.
    pub original_type: String,
    pub message: String,
    pub trace: String,
}

impl RemoteError {
    /// Wrap an opaque payload (undecodable record or raw text) in the generic container.
    pub fn generic(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::REMOTE,
            original_type: ErrorKind::REMOTE.to_string(),
            message: message.into(),
            trace: String::new(),
        }
    }
}

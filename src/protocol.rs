//! Wire protocol between the parent and a child process.
//!
//! Every payload is JSON, base64-encoded (standard alphabet) so it can travel
//! as a single argv entry or stream write:
//!
//! - task: argv entry holding an encoded [`Job`]
//! - result: standard output of a child that exited 0
//! - failure: standard error of a child that exited nonzero, holding an
//!   encoded [`ExceptionRecord`]

use crate::error::{ErrorKind, PoolError, RemoteError, Result, TaskError};
use crate::task::Task;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

/// Default maximum length of an encoded result, in bytes.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024;

/// A unit of work ready to be shipped to a child process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    kind: String,
    payload: Value,
}

impl Job {
    /// Capture a task value.
    pub fn task<T: Task>(task: &T) -> Result<Self> {
        Ok(Self {
            kind: T::KIND.to_string(),
            payload: serde_json::to_value(task)?,
        })
    }

    /// Capture a call to a function registered under `name` with its bound arguments.
    pub fn call<A: Serialize>(name: impl Into<String>, args: &A) -> Result<Self> {
        Ok(Self {
            kind: name.into(),
            payload: serde_json::to_value(args)?,
        })
    }

    /// Registry key of the task or function.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub(crate) fn into_payload(self) -> Value {
        self.payload
    }
}

/// A failure as three plain strings. Carries no behavior of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    #[serde(rename = "type")]
    pub type_name: String,
    pub message: String,
    pub trace: String,
}

impl ExceptionRecord {
    /// Reconstruct the native error, falling back to the generic container
    /// when the type name is not a usable kind.
    pub fn into_remote_error(self) -> RemoteError {
        let kind = ErrorKind::parse(&self.type_name).unwrap_or(ErrorKind::REMOTE);
        RemoteError {
            kind,
            original_type: self.type_name,
            message: self.message,
            trace: self.trace,
        }
    }
}

impl From<&TaskError> for ExceptionRecord {
    fn from(err: &TaskError) -> Self {
        Self {
            type_name: err.kind.to_string(),
            message: err.message.clone(),
            trace: err.trace.clone(),
        }
    }
}

impl From<&PoolError> for ExceptionRecord {
    fn from(err: &PoolError) -> Self {
        match err {
            PoolError::Remote(remote) => Self {
                type_name: remote.original_type.clone(),
                message: remote.message.clone(),
                trace: remote.trace.clone(),
            },
            other => Self {
                type_name: other.kind().to_string(),
                message: other.to_string(),
                trace: String::new(),
            },
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String> {
    Ok(STANDARD.encode(serde_json::to_vec(value)?))
}

fn decode<T: DeserializeOwned>(encoded: &str) -> Result<T> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| PoolError::Decode(format!("invalid base64: {}", e)))?;
    serde_json::from_slice(&bytes).map_err(|e| PoolError::Decode(format!("invalid payload: {}", e)))
}

/// Encode a job for the child's argv.
pub fn encode_task(job: &Job) -> Result<String> {
    encode(job)
}

/// Decode a job received on argv.
pub fn decode_task(encoded: &str) -> Result<Job> {
    decode(encoded)
}

/// Encode a result, failing with a protocol error instead of producing
/// more than `max_bytes` of output.
pub fn encode_output(value: &Value, max_bytes: usize) -> Result<String> {
    let encoded = encode(value)?;
    if encoded.len() > max_bytes {
        return Err(PoolError::output_too_large(max_bytes));
    }
    Ok(encoded)
}

/// Decode a result read from a child's standard output.
pub fn decode_output(encoded: &str) -> Result<Value> {
    decode(encoded)
}

/// Encode a failure for a child's standard error.
pub fn encode_exception(record: &ExceptionRecord) -> Result<String> {
    encode(record)
}

/// Decode a failure read from a child's standard error.
pub fn decode_exception(encoded: &str) -> Result<ExceptionRecord> {
    decode(encoded)
}

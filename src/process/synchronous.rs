//! In-process fallback: the task runs inline when the runnable starts.

use crate::error::{PoolError, RemoteError};
use crate::protocol::{self, ExceptionRecord, Job};
use crate::task::TaskRegistry;
use serde_json::Value;
use std::sync::Arc;

/// A task executed in the calling process.
#[derive(Debug)]
pub struct SynchronousProcess {
    job: Option<Job>,
    registry: Arc<TaskRegistry>,
    max_output_bytes: usize,
}

impl SynchronousProcess {
    pub fn new(job: Job, registry: Arc<TaskRegistry>, max_output_bytes: usize) -> Self {
        Self {
            job: Some(job),
            registry,
            max_output_bytes,
        }
    }

    /// Run the task once.
    ///
    /// Failures take the same path through [`ExceptionRecord`] as a child's
    /// standard error, so callbacks observe the same error either way.
    pub fn run(&mut self) -> Result<Value, RemoteError> {
        let job = self
            .job
            .take()
            .ok_or_else(|| RemoteError::generic("synchronous task already ran"))?;

        let output = self
            .registry
            .execute(job)
            .map_err(|err| ExceptionRecord::from(&err).into_remote_error())?;

        protocol::encode_output(&output, self.max_output_bytes)
            .map_err(|err: PoolError| ExceptionRecord::from(&err).into_remote_error())?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, TaskError};
    use crate::protocol::DEFAULT_MAX_OUTPUT_BYTES;
    use serde_json::json;

    fn registry() -> Arc<TaskRegistry> {
        let mut registry = TaskRegistry::new();
        registry
            .register_fn("double", |n: i64| Ok(n * 2))
            .register_fn("fail", |msg: String| -> Result<(), TaskError> {
                Err(TaskError::new("db.timeout", msg))
            })
            .register_fn("big", |n: usize| Ok("x".repeat(n)));
        Arc::new(registry)
    }

    #[test]
    fn test_runs_inline() {
        let job = Job::call("double", &21).unwrap();
        let mut process = SynchronousProcess::new(job, registry(), DEFAULT_MAX_OUTPUT_BYTES);
        assert_eq!(process.run().unwrap(), json!(42));
    }

    #[test]
    fn test_runs_only_once() {
        let job = Job::call("double", &1).unwrap();
        let mut process = SynchronousProcess::new(job, registry(), DEFAULT_MAX_OUTPUT_BYTES);
        assert!(process.run().is_ok());
        assert!(process.run().is_err());
    }

    #[test]
    fn test_task_error_is_reconstructed() {
        let job = Job::call("fail", &"boom").unwrap();
        let mut process = SynchronousProcess::new(job, registry(), DEFAULT_MAX_OUTPUT_BYTES);
        let err = process.run().unwrap_err();
        assert_eq!(err.kind, ErrorKind::new("db.timeout"));
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn test_output_limit_applies_inline() {
        let job = Job::call("big", &1000).unwrap();
        let mut process = SynchronousProcess::new(job, registry(), 100);
        let err = process.run().unwrap_err();
        assert_eq!(err.kind, ErrorKind::PROTOCOL);
        assert!(err.message.contains("too large"));
    }
}

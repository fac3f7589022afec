//! Parent side of the runtime bridge: turns jobs into runnables.

use super::{CHILD_ENTRY, bootstrap};
use crate::config::PoolConfig;
use crate::error::{PoolError, Result, RunnableId};
use crate::process::{ParallelProcess, Runnable, SynchronousProcess};
use crate::protocol::{self, DEFAULT_MAX_OUTPUT_BYTES, Job};
use crate::task::TaskRegistry;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Builds runnables for one pool.
#[derive(Debug)]
pub struct ParentRuntime {
    registry: Arc<TaskRegistry>,
    binary: PathBuf,
    bootstrap: PathBuf,
    out_of_process: bool,
}

impl ParentRuntime {
    /// Resolve the child binary and bootstrap for `config`.
    pub fn new(config: &PoolConfig, registry: Arc<TaskRegistry>) -> Result<Self> {
        let binary = match &config.binary {
            Some(binary) => binary.clone(),
            None => std::env::current_exe()?,
        };
        let bootstrap = bootstrap::resolve(config.bootstrap.as_deref(), &binary);

        tracing::debug!(
            binary = %binary.display(),
            bootstrap = %bootstrap.display(),
            out_of_process = config.is_out_of_process(),
            "Runtime initialized"
        );

        Ok(Self {
            registry,
            binary,
            bootstrap,
            out_of_process: config.is_out_of_process(),
        })
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn bootstrap(&self) -> &Path {
        &self.bootstrap
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn is_out_of_process(&self) -> bool {
        self.out_of_process
    }

    /// Wrap a job into a not-yet-started runnable.
    ///
    /// Fails with `InvalidInput` when nothing is registered under the job's kind.
    pub fn create_process(
        &self,
        job: Job,
        id: RunnableId,
        max_output_bytes: Option<usize>,
    ) -> Result<Runnable> {
        if !self.registry.contains(job.kind()) {
            return Err(PoolError::InvalidInput(format!(
                "The task passed to Pool::add must be registered; nothing is registered under '{}'",
                job.kind()
            )));
        }
        let max_output_bytes = max_output_bytes.unwrap_or(DEFAULT_MAX_OUTPUT_BYTES);

        if !self.out_of_process {
            let process = SynchronousProcess::new(job, self.registry.clone(), max_output_bytes);
            return Ok(Runnable::synchronous(id, process));
        }

        let args = self.child_args(&job, max_output_bytes)?;
        Ok(Runnable::parallel(
            id,
            ParallelProcess::new(self.binary.clone(), args),
        ))
    }

    /// Child argv after the binary: entry marker, bootstrap, encoded task, output limit.
    fn child_args(&self, job: &Job, max_output_bytes: usize) -> Result<Vec<OsString>> {
        Ok(vec![
            OsString::from(CHILD_ENTRY),
            self.bootstrap.clone().into_os_string(),
            OsString::from(protocol::encode_task(job)?),
            OsString::from(max_output_bytes.to_string()),
        ])
    }
}

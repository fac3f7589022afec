//! Runnables: units of work owned by a pool.
//!
//! A [`Runnable`] wraps one of two interchangeable backends:
//!
//! - [`ParallelProcess`]: a child process speaking the wire protocol
//! - [`SynchronousProcess`]: the same task run inline, for platforms without
//!   process primitives or when synchronous mode is forced
//!
//! Outputs are decoded once, when the runnable is observed terminal, and kept
//! on the runnable for inspection.

mod callbacks;
mod parallel;
mod signals;
mod synchronous;

pub use callbacks::ProcessCallbacks;
pub use parallel::ParallelProcess;
pub use signals::{TerminationReason, analyze_exit_status};
pub use synchronous::SynchronousProcess;

use crate::error::{ErrorKind, PoolError, RemoteError, Result, RunnableId};
use crate::protocol;
use crossbeam_channel::Sender;
use serde_json::Value;
use std::fmt;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

/// Completion notice posted by a collector thread.
#[derive(Debug)]
pub enum ProcessEvent {
    /// The child was reaped.
    Exited {
        id: RunnableId,
        status: ExitStatus,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    /// The child could not be spawned or collected.
    Lost { id: RunnableId, message: String },
}

impl ProcessEvent {
    pub fn id(&self) -> RunnableId {
        match self {
            Self::Exited { id, .. } | Self::Lost { id, .. } => *id,
        }
    }
}

/// Decoded failure payload of a runnable.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorOutput {
    /// A decoded exception record.
    Exception(RemoteError),
    /// A payload that could not be decoded, kept verbatim.
    Raw(String),
}

impl ErrorOutput {
    /// The native error callbacks receive.
    pub fn to_remote_error(&self) -> RemoteError {
        match self {
            Self::Exception(err) => err.clone(),
            Self::Raw(text) => RemoteError::generic(text.clone()),
        }
    }
}

impl fmt::Display for ErrorOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exception(err) => write!(f, "{}", err),
            Self::Raw(text) => f.write_str(text),
        }
    }
}

#[derive(Debug)]
enum Backend {
    Parallel(ParallelProcess),
    Synchronous(SynchronousProcess),
}

/// A unit of work and its lifecycle state.
pub struct Runnable {
    id: RunnableId,
    backend: Backend,
    callbacks: ProcessCallbacks,
    started_at: Option<Instant>,
    execution_time: Option<Duration>,
    termination: Option<TerminationReason>,
    output: Option<Value>,
    error_output: Option<ErrorOutput>,
}

impl Runnable {
    pub fn parallel(id: RunnableId, process: ParallelProcess) -> Self {
        Self::with_backend(id, Backend::Parallel(process))
    }

    pub fn synchronous(id: RunnableId, process: SynchronousProcess) -> Self {
        Self::with_backend(id, Backend::Synchronous(process))
    }

    fn with_backend(id: RunnableId, backend: Backend) -> Self {
        Self {
            id,
            backend,
            callbacks: ProcessCallbacks::default(),
            started_at: None,
            execution_time: None,
            termination: None,
            output: None,
            error_output: None,
        }
    }

    pub fn id(&self) -> RunnableId {
        self.id
    }

    /// OS process id, once started. Inline runnables never have one.
    pub fn pid(&self) -> Option<u32> {
        match &self.backend {
            Backend::Parallel(process) => process.pid(),
            Backend::Synchronous(_) => None,
        }
    }

    pub fn is_synchronous(&self) -> bool {
        matches!(self.backend, Backend::Synchronous(_))
    }

    /// Child argv, for out-of-process runnables.
    pub fn argv(&self) -> Option<Vec<std::ffi::OsString>> {
        match &self.backend {
            Backend::Parallel(process) => Some(process.argv()),
            Backend::Synchronous(_) => None,
        }
    }

    /// Launch the work.
    ///
    /// Out-of-process runnables spawn their child and return immediately; a
    /// spawn failure is posted to `events` like any other completion. Inline
    /// runnables run to completion before returning.
    pub fn start(&mut self, events: &Sender<ProcessEvent>) {
        self.started_at = Some(Instant::now());
        let id = self.id;

        match &mut self.backend {
            Backend::Parallel(process) => {
                if let Err(e) = process.start(id, events.clone()) {
                    let _ = events.send(ProcessEvent::Lost {
                        id,
                        message: format!("Failed to spawn child process: {}", e),
                    });
                }
            }
            Backend::Synchronous(process) => {
                let result = process.run();
                self.execution_time = self.started_at.map(|t| t.elapsed());
                match result {
                    Ok(output) => {
                        self.termination = Some(TerminationReason::Exited(0));
                        self.output = Some(output);
                    }
                    Err(err) => {
                        self.termination = Some(TerminationReason::Exited(1));
                        self.error_output = Some(ErrorOutput::Exception(err));
                    }
                }
            }
        }
    }

    /// Record a completion and decode its streams.
    ///
    /// Success is decided by the exit status alone. Stream contents are only
    /// decoded; a payload that fails to decode is kept as raw text.
    pub fn complete(&mut self, event: ProcessEvent) {
        self.execution_time = Some(self.current_execution_time());

        match event {
            ProcessEvent::Exited {
                status,
                stdout,
                stderr,
                ..
            } => {
                let reason = analyze_exit_status(status);
                if reason.is_success() {
                    match protocol::decode_output(&String::from_utf8_lossy(&stdout)) {
                        Ok(value) => self.output = Some(value),
                        Err(_) => {
                            self.error_output = Some(raw_payload(&stdout, || {
                                format!("child process {} but produced no output", reason)
                            }));
                        }
                    }
                } else {
                    self.error_output = Some(
                        match protocol::decode_exception(&String::from_utf8_lossy(&stderr)) {
                            Ok(record) => ErrorOutput::Exception(record.into_remote_error()),
                            Err(_) => raw_payload(&stderr, || format!("child process {}", reason)),
                        },
                    );
                }
                self.termination = Some(reason);
            }
            ProcessEvent::Lost { message, .. } => {
                self.termination = Some(TerminationReason::Unknown);
                self.error_output = Some(ErrorOutput::Raw(message));
            }
        }
    }

    /// Force-stop the work: SIGKILL after `grace`. Always true for inline runnables.
    pub fn stop(&mut self, grace: Duration) -> bool {
        match &mut self.backend {
            Backend::Parallel(process) => process.stop(grace),
            Backend::Synchronous(_) => true,
        }
    }

    /// Kill the work after its timeout elapsed and freeze its state.
    ///
    /// A completion posted by the collector afterwards is never applied, so
    /// this is the runnable's terminal transition.
    pub fn time_out(&mut self) {
        if self.is_terminated() {
            return;
        }
        self.stop(Duration::ZERO);
        self.execution_time = Some(self.current_execution_time());
        self.termination = Some(TerminationReason::TimedOut);
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some() && self.termination.is_none()
    }

    pub fn is_successful(&self) -> bool {
        self.termination
            .as_ref()
            .is_some_and(TerminationReason::is_success)
            && self.error_output.is_none()
    }

    pub fn is_terminated(&self) -> bool {
        self.termination.is_some()
    }

    pub fn termination(&self) -> Option<&TerminationReason> {
        self.termination.as_ref()
    }

    /// Decoded result, once finished successfully.
    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    /// Decoded failure, once failed.
    pub fn error_output(&self) -> Option<&ErrorOutput> {
        self.error_output.as_ref()
    }

    /// Time since start; frozen once terminal. Zero before start.
    pub fn current_execution_time(&self) -> Duration {
        self.execution_time
            .or_else(|| self.started_at.map(|t| t.elapsed()))
            .unwrap_or_default()
    }

    /// Register a success handler.
    pub fn then(&mut self, callback: impl FnMut(&Value) + Send + 'static) -> &mut Self {
        self.callbacks.on_success(callback);
        self
    }

    /// Register an error handler accepting any kind.
    pub fn catch(&mut self, callback: impl FnMut(&RemoteError) + Send + 'static) -> &mut Self {
        self.callbacks.on_error(None, callback);
        self
    }

    /// Register an error handler accepting `kind` and the kinds nested below it.
    pub fn catch_kind(
        &mut self,
        kind: impl Into<ErrorKind>,
        callback: impl FnMut(&RemoteError) + Send + 'static,
    ) -> &mut Self {
        self.callbacks.on_error(Some(kind.into()), callback);
        self
    }

    /// Register a timeout handler.
    pub fn on_timeout(&mut self, callback: impl FnMut() + Send + 'static) -> &mut Self {
        self.callbacks.on_timeout(callback);
        self
    }

    /// Fire success handlers and hand back the output.
    ///
    /// When an error payload is present the run is not a success: error
    /// handling takes over and `Ok(None)` is returned.
    pub fn trigger_success(&mut self) -> Result<Option<Value>> {
        if self.error_output.is_some() {
            self.trigger_error()?;
            return Ok(None);
        }

        let output = self.output.clone().unwrap_or_default();
        self.callbacks.fire_success(&output);
        Ok(Some(output))
    }

    /// Dispatch the failure to the first matching error handler.
    ///
    /// With no error handler registered the error is returned to the caller.
    pub fn trigger_error(&mut self) -> Result<()> {
        let err = self.resolve_error();
        match self.callbacks.fire_error(err) {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::debug!(id = self.id, "No error handler accepted the failure");
                Ok(())
            }
            Err(err) => Err(PoolError::Remote(err)),
        }
    }

    /// Fire every timeout handler.
    pub fn trigger_timeout(&mut self) {
        self.callbacks.fire_timeout();
    }

    fn resolve_error(&self) -> RemoteError {
        match &self.error_output {
            Some(output) => output.to_remote_error(),
            None => RemoteError::generic(match &self.termination {
                Some(reason) => format!("process {}", reason),
                None => "process failed".to_string(),
            }),
        }
    }
}

impl fmt::Debug for Runnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runnable")
            .field("id", &self.id)
            .field("pid", &self.pid())
            .field("backend", &self.backend)
            .field("callbacks", &self.callbacks)
            .field("termination", &self.termination)
            .finish_non_exhaustive()
    }
}

fn raw_payload(bytes: &[u8], empty: impl FnOnce() -> String) -> ErrorOutput {
    let text = String::from_utf8_lossy(bytes).trim().to_string();
    ErrorOutput::Raw(if text.is_empty() { empty() } else { text })
}

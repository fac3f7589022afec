//! Task definitions and the registry shared by parent and child.
//!
//! Closures cannot cross a process boundary, so work is described as data: a
//! [`Task`] value, or a call to a function registered by name together with
//! its bound arguments. Both sides of the boundary build the same
//! [`TaskRegistry`] and look the work up by kind.

use crate::error::{ErrorKind, TaskError};
use crate::protocol::Job;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

/// A two-phase unit of work.
///
/// `configure` runs first and may open resources that only make sense where
/// the task runs; `run` does the work and produces the output.
pub trait Task: Serialize + DeserializeOwned + 'static {
    /// Name the task is registered under on both sides of the process boundary.
    const KIND: &'static str;

    type Output: Serialize;

    fn configure(&mut self) -> Result<(), TaskError> {
        Ok(())
    }

    fn run(&mut self) -> Result<Self::Output, TaskError>;
}

type Runner = Box<dyn Fn(Value) -> Result<Value, TaskError> + Send + Sync>;

/// Maps task kinds to type-erased runners.
#[derive(Default)]
pub struct TaskRegistry {
    runners: HashMap<String, Runner>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task type under [`Task::KIND`].
    pub fn register<T: Task>(&mut self) -> &mut Self {
        self.runners.insert(
            T::KIND.to_string(),
            Box::new(|payload: Value| {
                let mut task: T = from_payload(T::KIND, payload)?;
                task.configure()?;
                let output = task.run()?;
                to_value(&output)
            }),
        );
        self
    }

    /// Register a plain function whose arguments are captured by [`Job::call`].
    pub fn register_fn<A, R, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(A) -> Result<R, TaskError> + Send + Sync + 'static,
    {
        let kind = name.to_string();
        self.runners.insert(
            name.to_string(),
            Box::new(move |payload: Value| {
                let args: A = from_payload(&kind, payload)?;
                to_value(&f(args)?)
            }),
        );
        self
    }

    /// Whether work of this kind can be executed.
    pub fn contains(&self, kind: &str) -> bool {
        self.runners.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.runners.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Run a job in the current process.
    ///
    /// A panic inside the task is caught and reported as a [`ErrorKind::PANIC`] error.
    pub fn execute(&self, job: Job) -> Result<Value, TaskError> {
        let runner = self.runners.get(job.kind()).ok_or_else(|| {
            TaskError::new(
                ErrorKind::INVALID_INPUT,
                format!("No task registered under '{}'", job.kind()),
            )
        })?;
        let payload = job.into_payload();

        match panic::catch_unwind(AssertUnwindSafe(|| runner(payload))) {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "task panicked".to_string());
                Err(TaskError::new(ErrorKind::PANIC, message))
            }
        }
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

fn from_payload<T: DeserializeOwned>(kind: &str, payload: Value) -> Result<T, TaskError> {
    serde_json::from_value(payload).map_err(|e| {
        TaskError::new(
            ErrorKind::DECODE,
            format!("Invalid payload for '{}': {}", kind, e),
        )
    })
}

fn to_value<T: Serialize>(output: &T) -> Result<Value, TaskError> {
    serde_json::to_value(output)
        .map_err(|e| TaskError::new(ErrorKind::DECODE, format!("Unserializable output: {}", e)))
}

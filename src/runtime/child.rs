//! Child process entry point.
//!
//! This module runs when the binary is invoked as
//! `<binary> --forkpool-child <bootstrap> <encoded-task> <max-output-bytes>`.
//! Standard output and standard error are reserved for the wire protocol:
//! nothing else may be written to them.

use super::bootstrap;
use crate::error::PoolError;
use crate::protocol::{self, DEFAULT_MAX_OUTPUT_BYTES, ExceptionRecord};
use crate::task::TaskRegistry;
use std::ffi::{OsStr, OsString};
use std::io::{self, Write};
use std::path::PathBuf;

/// Marker argument that selects the child entry point.
pub const CHILD_ENTRY: &str = "--forkpool-child";

/// Exit code of a failed child.
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Run the child entry and exit if this process was spawned by a pool.
///
/// Call this first thing in `main`, before parsing arguments or installing a
/// tracing subscriber. Returns normally when the process is not a child.
pub fn run_if_child(registry: &TaskRegistry) {
    let mut args = std::env::args_os().skip(1);
    if args.next().as_deref() != Some(OsStr::new(CHILD_ENTRY)) {
        return;
    }

    // Panic messages would corrupt the exception stream.
    std::panic::set_hook(Box::new(|_| {}));

    let args: Vec<OsString> = args.collect();
    let code = main(registry, &args);
    std::process::exit(code);
}

/// Child main: run the task described by `args` and write the outcome.
///
/// Returns the process exit code.
pub fn main(registry: &TaskRegistry, args: &[OsString]) -> i32 {
    match execute(registry, args) {
        Ok(encoded) => {
            let mut stdout = io::stdout().lock();
            match stdout
                .write_all(encoded.as_bytes())
                .and_then(|()| stdout.flush())
            {
                Ok(()) => 0,
                Err(e) => {
                    let record = ExceptionRecord::from(&PoolError::Io(e));
                    write_exception(&record);
                    FAILURE_EXIT_CODE
                }
            }
        }
        Err(record) => {
            write_exception(&record);
            FAILURE_EXIT_CODE
        }
    }
}

/// Validate arguments, load the bootstrap, then decode, run and encode the task.
pub fn execute(registry: &TaskRegistry, args: &[OsString]) -> Result<String, ExceptionRecord> {
    let bootstrap = args
        .first()
        .filter(|arg| !arg.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| invalid_input("No bootstrap provided in child process."))?;
    if !bootstrap.exists() {
        return Err(invalid_input(format!(
            "Could not find bootstrap in child process: {}",
            bootstrap.display()
        )));
    }

    let encoded_task = args
        .get(1)
        .and_then(|arg| arg.to_str())
        .filter(|arg| !arg.is_empty())
        .ok_or_else(|| invalid_input("No valid task was passed to the child process."))?;

    let max_output_bytes = args
        .get(2)
        .and_then(|arg| arg.to_str())
        .and_then(|arg| arg.parse::<usize>().ok())
        .filter(|&max| max > 0)
        .unwrap_or(DEFAULT_MAX_OUTPUT_BYTES);

    bootstrap::load(&bootstrap).map_err(|e| ExceptionRecord::from(&e))?;

    let job = protocol::decode_task(encoded_task).map_err(|e| ExceptionRecord::from(&e))?;
    let output = registry
        .execute(job)
        .map_err(|e| ExceptionRecord::from(&e))?;

    protocol::encode_output(&output, max_output_bytes).map_err(|e| ExceptionRecord::from(&e))
}

fn invalid_input(message: impl Into<String>) -> ExceptionRecord {
    ExceptionRecord::from(&PoolError::InvalidInput(message.into()))
}

fn write_exception(record: &ExceptionRecord) {
    let payload = match protocol::encode_exception(record) {
        Ok(encoded) => encoded,
        // The parent keeps undecodable stderr as plain text.
        Err(_) => record.message.clone(),
    };
    let mut stderr = io::stderr().lock();
    let _ = stderr.write_all(payload.as_bytes());
    let _ = stderr.flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, TaskError};
    use crate::protocol::Job;
    use serde_json::json;

    fn registry() -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        registry
            .register_fn("square", |n: i64| Ok(n * n))
            .register_fn("fail", |msg: String| -> Result<(), TaskError> {
                Err(TaskError::new("app.failure", msg))
            })
            .register_fn("big", |n: usize| Ok("x".repeat(n)));
        registry
    }

    fn exe() -> OsString {
        std::env::current_exe().unwrap().into_os_string()
    }

    fn args(job: &Job, max: &str) -> Vec<OsString> {
        vec![
            exe(),
            protocol::encode_task(job).unwrap().into(),
            max.into(),
        ]
    }

    #[test]
    fn test_execute_success() {
        let job = Job::call("square", &7).unwrap();
        let encoded = execute(&registry(), &args(&job, "100")).unwrap();
        assert_eq!(protocol::decode_output(&encoded).unwrap(), json!(49));
    }

    #[test]
    fn test_missing_bootstrap() {
        let err = execute(&registry(), &[]).unwrap_err();
        assert_eq!(err.type_name, ErrorKind::INVALID_INPUT.as_str());
        assert_eq!(err.message, "Invalid input: No bootstrap provided in child process.");
    }

    #[test]
    fn test_nonexistent_bootstrap() {
        let err = execute(&registry(), &["/nonexistent/forkpool.env".into()]).unwrap_err();
        assert_eq!(err.type_name, ErrorKind::INVALID_INPUT.as_str());
        assert!(err.message.contains("Could not find bootstrap"));
    }

    #[test]
    fn test_missing_task() {
        for args in [vec![exe()], vec![exe(), OsString::new()]] {
            let err = execute(&registry(), &args).unwrap_err();
            assert_eq!(err.type_name, ErrorKind::INVALID_INPUT.as_str());
            assert!(err.message.contains("No valid task"));
        }
    }

    #[test]
    fn test_garbage_task_is_decode_failure() {
        let err = execute(&registry(), &[exe(), "!!not-base64!!".into()]).unwrap_err();
        assert_eq!(err.type_name, ErrorKind::DECODE.as_str());
    }

    #[test]
    fn test_task_error_is_recorded() {
        let job = Job::call("fail", &"boom").unwrap();
        let err = execute(&registry(), &args(&job, "100")).unwrap_err();
        assert_eq!(err.type_name, "app.failure");
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn test_output_limit() {
        let job = Job::call("big", &500).unwrap();
        let err = execute(&registry(), &args(&job, "64")).unwrap_err();
        assert_eq!(err.type_name, ErrorKind::PROTOCOL.as_str());
        assert!(err.message.contains("too large"));
    }

    #[test]
    fn test_invalid_limit_falls_back_to_default() {
        let job = Job::call("big", &500).unwrap();
        for max in ["0", "lots", ""] {
            assert!(execute(&registry(), &args(&job, max)).is_ok());
        }
        let mut short = args(&job, "");
        short.pop();
        assert!(execute(&registry(), &short).is_ok());
    }
}

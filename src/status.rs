//! Human-readable pool status.

use crate::pool::Pool;
use crate::process::Runnable;
use std::fmt;

/// Summary line plus one line per failed runnable.
///
/// ```text
/// queue: 0 - finished: 4 - failed: 1 - timeout: 0
/// 4242 failed with app.failure: boom
/// ```
///
/// Rendering only reads already-decoded state, so it cannot fail on a
/// malformed payload; undecodable errors are shown as raw text.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus<'a> {
    pool: &'a Pool,
}

impl<'a> PoolStatus<'a> {
    pub fn new(pool: &'a Pool) -> Self {
        Self { pool }
    }

    /// The summary line alone.
    pub fn summary(&self) -> String {
        format!(
            "queue: {} - finished: {} - failed: {} - timeout: {}",
            self.pool.queue().len(),
            self.pool.finished().len(),
            self.pool.failed().len(),
            self.pool.timeouts().len()
        )
    }
}

impl fmt::Display for PoolStatus<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())?;
        for runnable in self.pool.failed() {
            write!(f, "\n{} failed with ", label(runnable))?;
            match (runnable.error_output(), runnable.termination()) {
                (Some(error), _) => write!(f, "{}", error)?,
                (None, Some(reason)) => write!(f, "process {}", reason)?,
                (None, None) => f.write_str("unknown error")?,
            }
        }
        Ok(())
    }
}

/// Process id, or the runnable id for work that never had a process.
fn label(runnable: &Runnable) -> String {
    match runnable.pid() {
        Some(pid) => pid.to_string(),
        None => format!("#{}", runnable.id()),
    }
}

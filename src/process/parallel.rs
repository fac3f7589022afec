//! Out-of-process runnable backed by a child process.
//!
//! The child's streams are drained by a dedicated collector thread that blocks
//! until the process exits and then posts a single [`ProcessEvent`] to the
//! pool. The pool is the only consumer, so completions are handled one at a
//! time no matter how many children exit together.

use super::ProcessEvent;
use crate::error::RunnableId;
use crossbeam_channel::Sender;
use std::ffi::OsString;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Stack size for collector threads. They only copy bytes.
const COLLECTOR_STACK_SIZE: usize = 256 * 1024;

/// Delay between reap attempts once both streams are closed.
const REAP_INTERVAL: Duration = Duration::from_millis(2);

/// Handle to a child process, spawned on [`start`](ParallelProcess::start).
#[derive(Debug)]
pub struct ParallelProcess {
    program: PathBuf,
    args: Vec<OsString>,
    pid: Option<u32>,
    /// Set once the child has been reaped. The child is only reaped and only
    /// signalled while this lock is held, so a recycled pid is never killed.
    reaped: Arc<Mutex<bool>>,
}

impl ParallelProcess {
    pub fn new(program: PathBuf, args: Vec<OsString>) -> Self {
        Self {
            program,
            args,
            pid: None,
            reaped: Arc::new(Mutex::new(false)),
        }
    }

    /// The full argv, starting with the program.
    pub fn argv(&self) -> Vec<OsString> {
        std::iter::once(self.program.clone().into_os_string())
            .chain(self.args.iter().cloned())
            .collect()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Spawn the child and its collector thread.
    pub fn start(&mut self, id: RunnableId, events: Sender<ProcessEvent>) -> io::Result<u32> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let pid = child.id();
        self.pid = Some(pid);

        let reaped = self.reaped.clone();
        let spawned = thread::Builder::new()
            .name(format!("forkpool-collector-{}", id))
            .stack_size(COLLECTOR_STACK_SIZE)
            .spawn(move || {
                let event = collect(id, child, &reaped);
                // The pool may already be gone; nothing left to report to.
                let _ = events.send(event);
            });

        if let Err(e) = spawned {
            let mut reaped = lock(&self.reaped);
            kill(pid);
            *reaped = true;
            return Err(e);
        }

        tracing::trace!(id, pid, program = %self.program.display(), "Spawned child process");
        Ok(pid)
    }

    /// Whether the child has been reaped.
    pub fn has_exited(&self) -> bool {
        *lock(&self.reaped)
    }

    /// Give the child `grace` to exit on its own, then SIGKILL it.
    pub fn stop(&mut self, grace: Duration) -> bool {
        let Some(pid) = self.pid else {
            return true;
        };

        let deadline = Instant::now() + grace;
        while !self.has_exited() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        let reaped = lock(&self.reaped);
        *reaped || kill(pid)
    }
}

impl Drop for ParallelProcess {
    fn drop(&mut self) {
        if let Some(pid) = self.pid {
            let reaped = lock(&self.reaped);
            if !*reaped {
                kill(pid);
            }
        }
    }
}

fn lock(reaped: &Mutex<bool>) -> MutexGuard<'_, bool> {
    reaped.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drain both streams, then reap the child.
fn collect(id: RunnableId, mut child: Child, reaped: &Mutex<bool>) -> ProcessEvent {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let streams = thread::scope(|scope| -> io::Result<(Vec<u8>, Vec<u8>)> {
        let stderr_reader = thread::Builder::new()
            .stack_size(COLLECTOR_STACK_SIZE)
            .spawn_scoped(scope, move || drain(stderr))?;
        let stdout = drain(stdout)?;
        let stderr = stderr_reader
            .join()
            .map_err(|_| io::Error::other("stderr reader panicked"))??;
        Ok((stdout, stderr))
    });
    let status = reap(&mut child, reaped);

    match (streams, status) {
        (Ok((stdout, stderr)), Ok(status)) => ProcessEvent::Exited {
            id,
            status,
            stdout,
            stderr,
        },
        (Err(e), _) | (_, Err(e)) => ProcessEvent::Lost {
            id,
            message: format!("Failed to collect child process {}: {}", child.id(), e),
        },
    }
}

fn drain(pipe: Option<impl Read>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf)?;
    }
    Ok(buf)
}

/// Wait for the child without blocking a concurrent `stop`.
fn reap(child: &mut Child, reaped: &Mutex<bool>) -> io::Result<ExitStatus> {
    loop {
        {
            let mut reaped = lock(reaped);
            match child.try_wait() {
                Ok(Some(status)) => {
                    *reaped = true;
                    return Ok(status);
                }
                Ok(None) => {}
                Err(e) => {
                    *reaped = true;
                    return Err(e);
                }
            }
        }
        thread::sleep(REAP_INTERVAL);
    }
}

#[cfg(unix)]
fn kill(pid: u32) -> bool {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(pid, error = %e, "Failed to send SIGKILL");
            false
        }
    }
}

#[cfg(not(unix))]
fn kill(_pid: u32) -> bool {
    false
}

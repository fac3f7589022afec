//! Termination analysis for child processes.

use std::process::ExitStatus;

/// Why a child process terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by a signal, by name when the platform knows it.
    Signaled(String),
    /// Killed by SIGKILL (forced stop, or the OOM killer).
    Killed,
    /// Killed by the pool once its timeout elapsed.
    TimedOut,
    /// Segmentation fault or bus error, usually a stack overflow.
    Crashed(String),
    /// Unknown termination reason.
    Unknown,
}

impl TerminationReason {
    /// Check if this is a successful exit.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Get a human-readable description.
    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Signaled(sig) => format!("killed by signal {}", sig),
            Self::Killed => "killed by signal SIGKILL".to_string(),
            Self::TimedOut => "timed out and was killed".to_string(),
            Self::Crashed(sig) => format!("crashed ({})", sig),
            Self::Unknown => "terminated for an unknown reason".to_string(),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Analyze an `ExitStatus` to determine the termination reason.
pub fn analyze_exit_status(status: ExitStatus) -> TerminationReason {
    if let Some(code) = status.code() {
        return TerminationReason::Exited(code);
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::Signal;
        use std::os::unix::process::ExitStatusExt;

        if let Some(raw) = status.signal() {
            return match Signal::try_from(raw) {
                Ok(Signal::SIGKILL) => TerminationReason::Killed,
                Ok(sig @ (Signal::SIGSEGV | Signal::SIGBUS)) => {
                    TerminationReason::Crashed(sig.as_str().to_string())
                }
                Ok(sig) => TerminationReason::Signaled(sig.as_str().to_string()),
                Err(_) => TerminationReason::Signaled(raw.to_string()),
            };
        }
    }

    TerminationReason::Unknown
}

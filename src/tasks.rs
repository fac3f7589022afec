//! Builtin tasks used by the `forkpool` binary.
//!
//! Each one is small on purpose: together they exercise every outcome a
//! child can report (a value, a raised error, oversized output, a hang, and
//! state loaded from the bootstrap file).

use crate::error::{ErrorKind, TaskError};
use crate::task::{Task, TaskRegistry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

/// `n * n`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Square {
    pub n: i64,
}

impl Task for Square {
    const KIND: &'static str = "square";
    type Output = i64;

    fn run(&mut self) -> Result<i64, TaskError> {
        self.n.checked_mul(self.n).ok_or_else(|| {
            TaskError::new("arithmetic.overflow", format!("{} squared overflows", self.n))
        })
    }
}

/// Sleep, then return `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sleep {
    pub millis: u64,
    pub value: Value,
}

impl Task for Sleep {
    const KIND: &'static str = "sleep";
    type Output = Value;

    fn run(&mut self) -> Result<Value, TaskError> {
        std::thread::sleep(Duration::from_millis(self.millis));
        Ok(self.value.clone())
    }
}

/// Raise an error of the given kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fail {
    pub kind: String,
    pub message: String,
}

impl Task for Fail {
    const KIND: &'static str = "fail";
    type Output = ();

    fn configure(&mut self) -> Result<(), TaskError> {
        if ErrorKind::parse(&self.kind).is_none() {
            return Err(TaskError::new(
                ErrorKind::INVALID_INPUT,
                format!("'{}' is not a valid error kind", self.kind),
            ));
        }
        Ok(())
    }

    fn run(&mut self) -> Result<(), TaskError> {
        Err(TaskError::new(self.kind.as_str(), self.message.clone()))
    }
}

/// A string of `len` repeated characters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repeat {
    pub len: usize,
}

impl Task for Repeat {
    const KIND: &'static str = "repeat";
    type Output = String;

    fn run(&mut self) -> Result<String, TaskError> {
        Ok("x".repeat(self.len))
    }
}

/// The value of an environment variable in the child, or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadEnv {
    pub name: String,
}

impl Task for ReadEnv {
    const KIND: &'static str = "env";
    type Output = Option<String>;

    fn run(&mut self) -> Result<Option<String>, TaskError> {
        Ok(std::env::var(&self.name).ok())
    }
}

/// Registry holding every builtin task.
pub fn builtin_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry
        .register::<Square>()
        .register::<Sleep>()
        .register::<Fail>()
        .register::<Repeat>()
        .register::<ReadEnv>();
    registry
}

/// A builtin task parsed from its command-line form.
///
/// `square:N`, `sleep:MS[:VALUE]`, `fail:KIND:MESSAGE`, `repeat:N`, `env:NAME`.
/// A sleep `VALUE` is parsed as JSON when possible and kept as a string otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskSpec {
    Square(Square),
    Sleep(Sleep),
    Fail(Fail),
    Repeat(Repeat),
    ReadEnv(ReadEnv),
}

impl TaskSpec {
    /// The transportable job for this task.
    pub fn to_job(&self) -> crate::Result<crate::Job> {
        match self {
            Self::Square(t) => crate::Job::task(t),
            Self::Sleep(t) => crate::Job::task(t),
            Self::Fail(t) => crate::Job::task(t),
            Self::Repeat(t) => crate::Job::task(t),
            Self::ReadEnv(t) => crate::Job::task(t),
        }
    }
}

impl FromStr for TaskSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, rest) = s.split_once(':').unwrap_or((s, ""));
        let number = |what: &str| -> Result<u64, String> {
            rest.split(':')
                .next()
                .unwrap_or_default()
                .parse()
                .map_err(|_| format!("'{}' needs a {}: {}", name, what, s))
        };

        match name {
            "square" => rest
                .parse()
                .map(|n| Self::Square(Square { n }))
                .map_err(|_| format!("'square' needs an integer: {}", s)),
            "sleep" => {
                let millis = number("duration in milliseconds")?;
                let value = match rest.split_once(':') {
                    Some((_, raw)) => serde_json::from_str(raw)
                        .unwrap_or_else(|_| Value::String(raw.to_string())),
                    None => Value::Null,
                };
                Ok(Self::Sleep(Sleep { millis, value }))
            }
            "fail" => {
                let (kind, message) = rest
                    .split_once(':')
                    .ok_or_else(|| format!("'fail' needs KIND:MESSAGE: {}", s))?;
                Ok(Self::Fail(Fail {
                    kind: kind.to_string(),
                    message: message.to_string(),
                }))
            }
            "repeat" => {
                let len = number("length")?;
                let len = usize::try_from(len).map_err(|_| format!("length too large: {}", s))?;
                Ok(Self::Repeat(Repeat { len }))
            }
            "env" if !rest.is_empty() => Ok(Self::ReadEnv(ReadEnv {
                name: rest.to_string(),
            })),
            "env" => Err(format!("'env' needs a variable name: {}", s)),
            _ => Err(format!(
                "Unknown task '{}'. Valid tasks: square, sleep, fail, repeat, env",
                name
            )),
        }
    }
}

//! forkpool - run independent tasks across a bounded pool of OS processes.
//!
//! Work is described as data (a [`Task`] value or a registered function
//! call), shipped to a child process on its argv, and brought back as a
//! result on standard output or an exception record on standard error.
//!
//! ```no_run
//! use forkpool::{Job, Pool, PoolConfig, TaskRegistry};
//!
//! fn registry() -> TaskRegistry {
//!     let mut registry = TaskRegistry::new();
//!     registry.register_fn("square", |n: i64| Ok(n * n));
//!     registry
//! }
//!
//! fn main() -> forkpool::Result<()> {
//!     // Child processes re-enter here and exit once their task is done.
//!     forkpool::runtime::run_if_child(&registry());
//!
//!     let mut pool = Pool::new(PoolConfig::default().with_concurrency(2), registry())?;
//!     for i in 0..5 {
//!         pool.add(Job::call("square", &i)?)?
//!             .then(|value| println!("got {}", value));
//!     }
//!     let results = pool.wait()?;
//!     assert_eq!(results.len(), 5);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod pool;
pub mod process;
pub mod protocol;
pub mod runtime;
pub mod status;
pub mod task;
pub mod tasks;

pub use config::PoolConfig;
pub use error::{ErrorKind, PoolError, RemoteError, Result, RunnableId, TaskError};
pub use pool::Pool;
pub use process::Runnable;
pub use protocol::Job;
pub use status::PoolStatus;
pub use task::{Task, TaskRegistry};

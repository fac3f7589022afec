//! Runtime bridge between a pool and its child processes.
//!
//! - [`parent`]: turns a [`Job`](crate::Job) into a not-yet-started runnable
//!   whose argv carries the encoded task
//! - [`child`]: the entry point a spawned process runs to decode, execute and
//!   report that task
//! - [`bootstrap`]: the environment file every child loads first

pub mod bootstrap;
pub mod child;
pub mod parent;

pub use child::{CHILD_ENTRY, run_if_child};
pub use parent::ParentRuntime;

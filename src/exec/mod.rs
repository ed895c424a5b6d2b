// src/exec/mod.rs

//! Process execution layer.
//!
//! Everything that touches a child process lives here:
//!
//! - [`command`] builds peon command lines and tokenizes option strings.
//! - [`holder`] holds the per-task control surface (`ProcessHolder`) and the
//!   runner's bookkeeping record (`WorkItem`).
//! - [`supervisor`] is the activation that takes one task from dispatch to
//!   cleanup.

pub mod command;
pub mod holder;
pub(crate) mod supervisor;

pub use command::tokenize;
pub use holder::{ProcessHolder, TaskCompletion, WorkItem};

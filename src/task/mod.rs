//! Task module - handles for outstanding remote jobs.
//!
//! A `TaskHandle` tracks one server-side job from submission to a terminal
//! state. Status transitions are monotonic: once a handle reaches COMPLETED
//! or FAILED it never moves again, and it never returns to PENDING.

mod result;
mod types;

pub use result::{extract_result, TaskResult};
pub use types::{ResourceKey, TaskHandle, TaskKind, TaskProgress, TaskStatus};

//! # Slideflow
//!
//! Task orchestration core for an AI presentation generator. The backend
//! runs the expensive jobs (description generation, image rendering, exports,
//! file parsing); this crate submits them, polls them to completion, and
//! keeps a locally reconciled view of the project while they run.
//!
//! ## Task Flow
//! 1. A UI collaborator requests a job via the API
//! 2. The single-flight guard admits or rejects it per resource
//! 3. The job is submitted and its handle persisted to the task registry
//! 4. A poll loop drives it to a terminal outcome
//! 5. The result is folded into the project aggregate and the registry
//!
//! ## Modules
//! - `orchestrator`: the flow behind every generation and export action
//! - `poll`: fixed-cadence status polling with a client-side budget
//! - `guard`: per-resource single-flight admission
//! - `merge`: list reconciliation between server truth and local optimism
//! - `refine`: requirement history accumulation for AI refine calls
//! - `registry`: disk-backed task registry that survives restarts

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod guard;
pub mod merge;
pub mod orchestrator;
pub mod poll;
pub mod project;
pub mod refine;
pub mod registry;
pub mod task;

pub use config::Config;
pub use error::TaskError;
pub use orchestrator::Orchestrator;

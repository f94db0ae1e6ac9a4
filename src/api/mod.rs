//! HTTP API exposed to UI collaborators.

pub mod routes;
pub mod types;

pub use routes::serve;

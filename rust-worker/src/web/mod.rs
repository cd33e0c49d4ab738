//! Health endpoint.
//!
//! The endpoint reports process liveness only; it answers `ok` regardless of
//! broker connectivity.

pub mod handlers;

pub use handlers::{health, router, HealthResponse};

//! Data Transfer Objects
//!
//! Request and response shapes exchanged between the master and its clients.
//! DTOs are thin wrappers around domain entities plus query parameters.

pub mod log;
pub mod task;

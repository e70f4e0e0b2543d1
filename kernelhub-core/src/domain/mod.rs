//! Core domain types
//!
//! This module contains the core domain structures used across KernelHub crates.
//! These types are owned by the master (which supervises tasks) and mirrored
//! by clients (which display them).

pub mod log;
pub mod task;

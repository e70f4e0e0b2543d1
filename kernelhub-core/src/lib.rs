//! KernelHub Core
//!
//! Core types and abstractions for the KernelHub task master.
//!
//! This crate contains:
//! - Domain types: Core business entities (Task, LogEntry, etc.)
//! - DTOs: Data transfer objects exchanged between the master and its clients

pub mod domain;
pub mod dto;

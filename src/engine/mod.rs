// src/engine/mod.rs

//! Job orchestration.
//!
//! [`job`] drives one backup run: it owns the object arena and the
//! dependency resolver, dispatches ready objects into a bounded worker pool,
//! reaps completions as they arrive, and settles the backend session's
//! transaction outcome.

pub mod job;

pub use job::BackupJob;

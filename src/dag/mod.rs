// src/dag/mod.rs

//! Dependency handling for backup objects.
//!
//! - [`objects`] holds the arena of objects and groups built from config.
//! - [`resolver`] computes which objects are runnable and which are blocked,
//!   and unblocks dependents as objects complete.

pub mod objects;
pub mod resolver;

pub use objects::{build_objects, BackupObject, ObjId, ObjectGroup};
pub use resolver::DepResolver;

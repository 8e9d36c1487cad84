// src/errors.rs

//! Crate-wide error taxonomy.
//!
//! Configuration problems are fatal before any object runs; everything that
//! escapes the scheduling loop forces a backend rollback before propagating.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackdagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Circular group dependency involving '{0}'")]
    CircularDependency(String),

    #[error("process `{cmdline}` exited with code {code} (accepted: {expected})")]
    ProcessFailure {
        cmdline: String,
        code: i32,
        expected: String,
    },

    /// The scheduler found blocked objects left but nothing runnable and
    /// nothing in flight. This is a resolver construction bug, not bad input.
    #[error("invalid dependency tree: blocked objects remain but none can run")]
    InvalidDependencyTree,

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BackdagError>;

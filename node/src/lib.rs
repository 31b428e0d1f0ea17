//! The bima service binary: composition root and long-running workers.

/// CLI args and subcommands.
pub mod cli;
/// Env-derived configuration.
pub mod config;
/// Composition root.
pub mod context;
/// The run loop and its workers.
pub mod run;

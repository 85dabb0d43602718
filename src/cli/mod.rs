//! Command-line interface for drivebench.
//!
//! Provides the `run` and `inspect` commands.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};

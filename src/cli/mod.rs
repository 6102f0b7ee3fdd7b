//! CLI module
//!
//! Command-line arguments, client configuration and the subcommands.

pub mod args;
pub mod commands;
pub mod config;

pub use args::{CliArgs, Command};
pub use config::ClientConfig;

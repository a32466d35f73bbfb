//! CLI module for kindsync.
//!
//! This module provides the command-line interface for deploying,
//! cleaning, purging and pulling resource kinds.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, Selection, SyncArgs};
pub use output::OutputFormatter;

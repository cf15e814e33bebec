//! CLI module for lmsflow - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for single-unit runs,
//! bulk runs, and offline configuration checks.

pub mod commands;

pub use commands::Cli;

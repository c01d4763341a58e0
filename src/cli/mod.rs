//! CLI module for chatwire - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for serving, probing a
//! server, and issuing single actions.

pub mod commands;

pub use commands::Cli;

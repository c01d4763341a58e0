//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - serve: run the server (default)
//! - ping: keep-alive round trips against a server
//! - call: one exchange for a catalog action
//! - actions: print the action catalog

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Chatwire - shared-connection messaging protocol server and client
#[derive(Parser, Debug)]
#[command(name = "chatwire")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Run the server until SIGINT/SIGTERM
    Serve,

    /// Send PING and wait for PONG
    Ping {
        /// Number of round trips
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },

    /// Send one action and print its reply values
    Call {
        /// Action name from the catalog (e.g. LOGIN)
        action: String,

        /// Parameters in order; JSON literals, anything else is sent as a string
        params: Vec<String>,
    },

    /// List the action catalog with arities
    Actions,
}

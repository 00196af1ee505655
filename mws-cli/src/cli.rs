use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "mws")]
#[command(about = "Inspect and steer a multiworkspace root")]
#[command(version)]
pub struct Args {
    /// Root directory holding instances/ and .multiworkspace/ (default: current directory)
    #[arg(long, global = true, conflicts_with = "config")]
    pub root: Option<PathBuf>,

    /// YAML settings file naming the root
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show registered instances and the pending control directive
    Status,
    /// Create a fresh instance on the next apply
    NewInstance,
    /// Route mutating calls to a registered instance
    Pin {
        /// Instance key
        key: String,
    },
    /// Stop routing to a pinned instance
    Unpin,
    /// Schedule instances for garbage collection
    Gc {
        /// Instance key to tear down (repeatable)
        #[arg(long = "delete", value_name = "KEY")]
        delete: Vec<String>,

        /// Tear down instances whose directory is older than this RFC3339 time
        #[arg(long, value_name = "RFC3339")]
        prune_before: Option<String>,
    },
    /// Drop the pending garbage-collection directive
    ClearGc,
}

//! CLI argument parsing for modelstore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ms")]
#[command(author, version, about = "Content-addressed model payload store", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the store directory
    #[arg(short, long)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Store a file and print its reference
    Put {
        /// File to store
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Write an object's bytes to a file (or stdout)
    Get {
        /// Object reference (sha256:...)
        #[arg(required = true)]
        reference: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List all stored references
    Ls,

    /// Re-hash objects and report corruption
    Verify {
        /// Reference to verify (default: every object)
        reference: Option<String>,
    },

    /// Show store statistics
    Stats,
}

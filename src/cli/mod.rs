//! CLI interface using clap.
//!
//! Provides command-line arguments and subcommands for the tool.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::SCHEMA_V3;

/// wxexport - decrypt, browse and export local WeChat chat history.
///
/// Without a subcommand the web service is started.
#[derive(Parser, Debug)]
#[command(name = "wxexport")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (use multiple times for more verbosity).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (default: ~/.wxexport/config.toml).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the web service.
    Serve {
        /// Address to listen on (overrides config).
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config).
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List contacts of an already decrypted database directory.
    Contacts {
        /// Directory holding MicroMsg.db (the `Msg` directory of a decrypt run).
        database_dir: PathBuf,

        /// Schema version of the decrypted layout.
        #[arg(long, default_value_t = SCHEMA_V3)]
        schema_version: u32,
    },

    /// Write a default configuration file if none exists.
    InitConfig,
}

impl Cli {
    /// The subcommand to run, `serve` when none was given.
    #[must_use]
    pub fn command(&self) -> &Commands {
        static DEFAULT: Commands = Commands::Serve {
            host: None,
            port: None,
        };
        self.command.as_ref().unwrap_or(&DEFAULT)
    }
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "neon: SSR front door for single-page applications",
    long_about = "neon serves a single-page application with server-side rendering.\n\
                  A renderer chain handles each request; the index renderer runs the\n\
                  client bundle in an isolated JavaScript VM against state assembled\n\
                  from pre-fetched external resources.\n\n\
                  Examples:\n  \
                  neon init\n  \
                  neon check -c neon.yaml\n  \
                  neon serve -c neon.yaml"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the server
    Serve {
        /// Configuration file (defaults to CONFIG_FILE or neon.yaml)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Scaffold a default configuration and site
    Init {
        /// Target directory
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
    /// Validate the configuration without serving
    Check {
        /// Configuration file (defaults to CONFIG_FILE or neon.yaml)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

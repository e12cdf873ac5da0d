pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "puterfs")]
#[command(about = "Mount Puter cloud storage as a local filesystem")]
pub struct Args {
    /// Path to the puterfs config directory (defaults to ~/.puterfs)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}

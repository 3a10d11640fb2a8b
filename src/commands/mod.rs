mod merge;
mod save;

pub use merge::Merge;
pub use save::Save;

use clap::{Parser, Subcommand};

/// Download HLS (.m3u8) playlists and merge segments into a single video file.
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Print debug logs.
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    Merge(Merge),
    Save(Save),
}

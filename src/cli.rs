use crate::config::PlaylistFormat;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "iptv-viewer")]
#[command(author, version, about = "IPTV viewer: Xtream/M3U sources, channel lists and live playback")]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Save a stream source (Xtream credentials or a direct M3U URL)
    Configure {
        /// Server host, or a full playlist URL
        #[arg(long)]
        host: String,

        #[arg(short, long, default_value = "")]
        username: String,

        #[arg(short, long, default_value = "")]
        password: String,

        #[arg(long, default_value = "80")]
        port: String,

        /// Stream container requested from the server (ts or hls)
        #[arg(long, default_value = "ts")]
        format: PlaylistFormat,

        /// Fallback host tried when the main one fails
        #[arg(long, default_value = "")]
        alt_dns: String,

        /// Playlist refresh interval in minutes
        #[arg(long, default_value = "30")]
        update_interval: String,

        #[arg(long)]
        no_auto_reconnect: bool,

        #[arg(long)]
        no_hw_accel: bool,
    },

    /// Show the saved configuration
    Show,

    /// Remove the saved configuration
    Clear,

    /// Check that the configured server answers
    Probe,

    /// Download the playlist and list its channels
    Channels,

    /// Play a channel and report playback state
    Play {
        /// Channel id (defaults to the first channel)
        #[arg(short, long)]
        channel: Option<u32>,

        /// How long to keep playing
        #[arg(short, long, default_value = "30")]
        seconds: u64,
    },
}

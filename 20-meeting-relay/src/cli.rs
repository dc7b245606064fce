use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::config::{
    DEFAULT_MAX_FRAME_BYTES, DEFAULT_MAX_VIDEO_BYTES, DEFAULT_SHUTDOWN_GRACE, RelayConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the meeting relay, accepting client TCP connections.
    Serve(ServeArgs),
    /// Connect to a relay from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address to bind. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:5555")]
    pub listen: SocketAddr,

    /// Video frames larger than this many bytes are dropped.
    #[arg(long, default_value_t = DEFAULT_MAX_VIDEO_BYTES)]
    pub max_video_bytes: usize,

    /// Connections announcing a frame larger than this are closed.
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,

    /// Per-recipient write timeout in milliseconds.
    #[arg(long, default_value_t = 2000)]
    pub write_timeout_ms: u64,

    /// JSON file used to persist registered users. In-memory only if omitted.
    #[arg(long)]
    pub users_file: Option<PathBuf>,

    /// Seconds between stats log lines; 0 disables them.
    #[arg(long, default_value_t = 30)]
    pub stats_interval_secs: u64,
}

impl ServeArgs {
    pub fn into_config(self) -> RelayConfig {
        RelayConfig {
            listen: self.listen,
            max_video_bytes: self.max_video_bytes,
            max_frame_bytes: self.max_frame_bytes,
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            stats_interval: (self.stats_interval_secs > 0)
                .then(|| Duration::from_secs(self.stats_interval_secs)),
            users_file: self.users_file,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the relay to connect to.
    #[arg(long, default_value = "127.0.0.1:5555")]
    pub server: SocketAddr,
}

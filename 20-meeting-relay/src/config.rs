use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Result, ensure};

pub const DEFAULT_LISTEN: &str = "127.0.0.1:5555";
pub const DEFAULT_MAX_VIDEO_BYTES: usize = 300 * 1024;
pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(30);

/// Runtime settings for the relay server.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    /// Video frames above this size are dropped without a reply.
    pub max_video_bytes: usize,
    /// Any frame announcing a larger payload closes the connection.
    pub max_frame_bytes: usize,
    /// Upper bound on a single write to one recipient.
    pub write_timeout: Duration,
    /// How long shutdown waits for connection tasks to finish.
    pub shutdown_grace: Duration,
    pub stats_interval: Option<Duration>,
    /// Credential store persistence; in-memory only when unset.
    pub users_file: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 5555)),
            max_video_bytes: DEFAULT_MAX_VIDEO_BYTES,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            stats_interval: Some(DEFAULT_STATS_INTERVAL),
            users_file: None,
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.max_video_bytes > 0, "max video size must be positive");
        ensure!(
            self.max_frame_bytes >= self.max_video_bytes,
            "max frame size ({}) must be at least the max video size ({})",
            self.max_frame_bytes,
            self.max_video_bytes
        );
        ensure!(
            !self.write_timeout.is_zero(),
            "write timeout must be positive"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RelayConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.listen, DEFAULT_LISTEN.parse().expect("addr"));
        assert_eq!(config.max_video_bytes, 307_200);
    }

    #[test]
    fn rejects_zero_limits() {
        let config = RelayConfig {
            max_video_bytes: 0,
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());

        let config = RelayConfig {
            write_timeout: Duration::ZERO,
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn frame_ceiling_must_cover_video() {
        let config = RelayConfig {
            max_frame_bytes: 1024,
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());
    }
}

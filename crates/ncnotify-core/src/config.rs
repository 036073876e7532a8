//! Configuration for the notification stream engine.

use std::path::PathBuf;
use std::time::Duration;

/// Environment variable that overrides the streams directory.
pub const STREAMS_PATH_ENV: &str = "LIBNETCONF_STREAMS";

/// Compiled-in default streams directory.
pub const DEFAULT_STREAMS_PATH: &str = "/var/run/netconf_events";

/// Configuration for a [`NotificationEngine`](crate::NotificationEngine) instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Explicit streams directory. `None` resolves [`STREAMS_PATH_ENV`] and
    /// then [`DEFAULT_STREAMS_PATH`].
    pub streams_dir: Option<PathBuf>,
    /// Bounded timeout for one live-phase bus poll.
    pub live_poll_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            streams_dir: None,
            live_poll_timeout: Duration::from_millis(10),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration rooted at an explicit streams directory.
    #[must_use]
    pub fn with_streams_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            streams_dir: Some(dir.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.streams_dir.is_none());
        assert_eq!(config.live_poll_timeout, Duration::from_millis(10));
    }

    #[test]
    fn test_with_streams_dir() {
        let config = EngineConfig::with_streams_dir("/tmp/streams");
        assert_eq!(config.streams_dir.as_deref(), Some(std::path::Path::new("/tmp/streams")));
    }
}

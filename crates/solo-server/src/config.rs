use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Logical name every connection resolves to.
    pub logical_name: String,
    /// Endpoint whose round trip is measured for every message.
    pub dependency_url: String,
    pub dependency_timeout_secs: u64,
    /// Tag prefixed to every reply frame.
    pub reply_tag: String,
    /// Reason sent with the server's close frame.
    pub close_reason: String,
    pub max_send_queue: usize,
    /// Largest accepted inbound message, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8787,
            logical_name: "foo".into(),
            dependency_url: "https://httpbin.org/delay/5".into(),
            dependency_timeout_secs: 30,
            reply_tag: "Session Actor".into(),
            close_reason: "Session actor is closing WebSocket".into(),
            max_send_queue: 256,
            max_message_size: 1 << 20,
        }
    }
}

impl ServerConfig {
    /// Load from a TOML file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.logical_name.is_empty() {
            return Err(ConfigError::Invalid("logical_name must not be empty".into()));
        }
        if self.dependency_url.is_empty() {
            return Err(ConfigError::Invalid("dependency_url must not be empty".into()));
        }
        if self.dependency_timeout_secs == 0 {
            return Err(ConfigError::Invalid("dependency_timeout_secs must be > 0".into()));
        }
        if self.max_send_queue == 0 {
            return Err(ConfigError::Invalid("max_send_queue must be > 0".into()));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid("max_message_size must be > 0".into()));
        }
        Ok(())
    }

    pub fn dependency_timeout(&self) -> Duration {
        Duration::from_secs(self.dependency_timeout_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT: AtomicUsize = AtomicUsize::new(0);

    fn write_temp(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "solo-config-{}-{}.toml",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.logical_name, "foo");
        assert_eq!(config.dependency_timeout(), Duration::from_secs(30));
        assert_eq!(config.bind_addr(), "0.0.0.0:8787");
    }

    #[test]
    fn load_partial_file_keeps_defaults() {
        let path = write_temp("port = 9000\nlogical_name = \"room\"\n");
        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.logical_name, "room");
        assert_eq!(config.reply_tag, "Session Actor");
    }

    #[test]
    fn load_rejects_zero_timeout() {
        let path = write_temp("dependency_timeout_secs = 0\n");
        let err = ServerConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "got: {err}");
    }

    #[test]
    fn load_reports_parse_errors() {
        let path = write_temp("port = \"not a number\"\n");
        let err = ServerConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = ServerConfig::load(Path::new("/nonexistent/solo.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where tracks go and what happens when a name is already taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    #[serde(default = "platform::default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub overwrite_existing: bool,
    #[serde(default)]
    pub append_sequence_suffix: bool,
    #[serde(default)]
    pub write_id3_tag: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Sent as `user-agent` in the ICY handshake.  Some servers only
    /// interleave metadata for player strings they recognise.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Upper bound on handshake attempts, redirects included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Connect timeout used when probing playlist entries.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_dir: platform::default_output_dir(),
            overwrite_existing: false,
            append_sequence_suffix: false,
            write_id3_tag: false,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            max_attempts: default_max_attempts(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl StreamConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }
}

fn default_user_agent() -> String {
    "xmms/1.2.7".to_string()
}

fn default_max_attempts() -> u32 {
    10
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_log_filter() -> String {
    "info,shoutrip_core=debug".to_string()
}

impl Config {
    /// Load `config.toml` from the platform config directory, falling back
    /// to defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.recorder.overwrite_existing);
        assert!(!config.recorder.append_sequence_suffix);
        assert!(!config.recorder.write_id3_tag);
        assert_eq!(config.stream.max_attempts, 10);
        assert_eq!(config.stream.user_agent, "xmms/1.2.7");
        assert!(config.recorder.output_dir.ends_with("shoutrip"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [recorder]
            output_dir = "/tmp/rips"
            append_sequence_suffix = true

            [stream]
            probe_timeout_secs = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.recorder.output_dir, PathBuf::from("/tmp/rips"));
        assert!(config.recorder.append_sequence_suffix);
        assert!(!config.recorder.write_id3_tag);
        assert_eq!(config.stream.probe_timeout(), Duration::from_secs(2));
        assert_eq!(config.stream.max_attempts, 10);
        assert_eq!(config.logging.filter, "info,shoutrip_core=debug");
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.stream.max_attempts, 10);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(matches!(
            Config::from_toml_str("[recorder]\noverwrite_existing = \"yes\""),
            Err(ConfigError::Parse(_))
        ));
    }
}

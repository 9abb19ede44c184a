//! Server configuration, read from a JSON file at startup.

use crate::error::ConfigError;
use protocol::Channel;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Which pub/sub fabric to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    Memory,
    Redis,
}

/// Where recorded games are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeederKind {
    File,
    Redis,
}

/// The `app` section of the configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub message_broker: BrokerKind,
    pub game_feeder: FeederKind,
    pub game_data_dir: PathBuf,
    pub game_file_ext: String,
    pub redis_url: String,
    /// Default inter-emission interval in seconds.
    pub default_game_speed: f64,
    /// Pause deadline before a paused game resumes on its own, in seconds.
    pub pause_timeout_secs: f64,
    /// Shared secret for operator commands. `None` accepts any non-empty token.
    pub operator_token: Option<String>,
    pub bind_addr: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            message_broker: BrokerKind::Memory,
            game_feeder: FeederKind::File,
            game_data_dir: PathBuf::from("./data/games"),
            game_file_ext: "json".to_string(),
            redis_url: "redis://localhost".to_string(),
            default_game_speed: 1.0,
            pause_timeout_secs: 60.0,
            operator_token: None,
            bind_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

impl AppSettings {
    /// The configured file extension, with a leading dot whether or not the
    /// configuration wrote one.
    pub fn game_file_ext(&self) -> String {
        if self.game_file_ext.starts_with('.') {
            self.game_file_ext.clone()
        } else {
            format!(".{}", self.game_file_ext)
        }
    }
}

/// The `broker` section of the configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// Comma-separated channel identifiers relayed into a game room on join.
    pub relay_channels: String,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        BrokerSettings {
            relay_channels: "scores_update,controls".to_string(),
        }
    }
}

impl BrokerSettings {
    /// Parses the relay channel list. Any invalid entry discards the whole
    /// setting in favor of the default pair.
    pub fn relay_channels(&self) -> Vec<Channel> {
        let parsed: Result<Vec<Channel>, _> = self
            .relay_channels
            .split(',')
            .map(|entry| entry.trim().parse())
            .collect();
        match parsed {
            Ok(channels) if !channels.is_empty() => channels,
            _ => {
                tracing::error!(
                    relay_channels = %self.relay_channels,
                    "invalid relay channel configuration; falling back to scores_update+controls"
                );
                vec![Channel::ScoresUpdate, Channel::Controls]
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app: AppSettings,
    pub broker: BrokerSettings,
}

/// Reads and parses the configuration file.
pub async fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Invalid {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_standalone() {
        let config = Config::default();
        assert_eq!(config.app.message_broker, BrokerKind::Memory);
        assert_eq!(config.app.game_feeder, FeederKind::File);
        assert_eq!(config.app.game_file_ext(), ".json");
        assert_eq!(
            config.broker.relay_channels(),
            vec![Channel::ScoresUpdate, Channel::Controls]
        );
    }

    #[test]
    fn extension_dot_is_normalized() {
        let mut settings = AppSettings::default();
        settings.game_file_ext = ".dat".to_string();
        assert_eq!(settings.game_file_ext(), ".dat");
        settings.game_file_ext = "dat".to_string();
        assert_eq!(settings.game_file_ext(), ".dat");
    }

    #[test]
    fn invalid_relay_channels_fall_back() {
        let settings = BrokerSettings {
            relay_channels: "scores_update,bogus".to_string(),
        };
        assert_eq!(
            settings.relay_channels(),
            vec![Channel::ScoresUpdate, Channel::Controls]
        );
    }

    #[test]
    fn single_relay_channel_is_accepted() {
        let settings = BrokerSettings {
            relay_channels: "scores_update".to_string(),
        };
        assert_eq!(settings.relay_channels(), vec![Channel::ScoresUpdate]);
    }

    #[tokio::test]
    async fn file_is_loaded_and_sections_default() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{"app": {{"messageBroker": "redis", "defaultGameSpeed": 0.5}}}}"#
        )
        .expect("write config");
        let config = load_config(file.path()).await.expect("load");
        assert_eq!(config.app.message_broker, BrokerKind::Redis);
        assert_eq!(config.app.default_game_speed, 0.5);
        // Untouched keys keep their defaults.
        assert_eq!(config.app.game_feeder, FeederKind::File);
        assert_eq!(config.broker.relay_channels.as_str(), "scores_update,controls");
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let result = load_config(Path::new("/definitely/not/here.json")).await;
        assert!(matches!(result, Err(ConfigError::Unreadable { .. })));
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "not json at all").expect("write config");
        let result = load_config(file.path()).await;
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}

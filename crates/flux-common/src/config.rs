use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use url::Url;

use crate::error::ConfigError;

/// Connection settings for a flux participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FluxConfig {
    /// WebSocket endpoint of the relay (e.g., ws://localhost:3000/flux)
    pub host: Url,
    /// User the connection acts for
    pub username: SmolStr,
    /// Access token sent along with the username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Channel to join on connect; defaults to the username channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<SmolStr>,
    #[serde(default = "default_request_timeout", with = "millis")]
    pub request_timeout: Duration,
    #[serde(default = "default_join_timeout", with = "millis")]
    pub join_timeout: Duration,
}

fn default_request_timeout() -> Duration {
    FluxConfig::DEFAULT_REQUEST_TIMEOUT
}

fn default_join_timeout() -> Duration {
    FluxConfig::DEFAULT_JOIN_TIMEOUT
}

impl FluxConfig {
    pub const DEFAULT_HOST: &'static str = "ws://localhost:3000/flux";
    pub const DEFAULT_USER: &'static str = "defaultuser";
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

    /// Load configuration from environment variables.
    ///
    /// Optional env vars:
    /// - `FLUX_HOST`: relay WebSocket URL (default: ws://localhost:3000/flux)
    /// - `FLUX_USER`: username (default: defaultuser)
    /// - `FLUX_TOKEN`: access token
    /// - `FLUX_CHANNEL`: channel to join (default: the username)
    /// - `FLUX_REQUEST_TIMEOUT_MS`, `FLUX_JOIN_TIMEOUT_MS`
    pub fn from_env() -> Result<Self, ConfigError> {
        let host_str = std::env::var("FLUX_HOST").unwrap_or_else(|_| Self::DEFAULT_HOST.to_string());
        let host = Url::parse(&host_str).map_err(|e| ConfigError::UrlParse {
            url: host_str,
            message: e.to_string(),
        })?;

        let username = std::env::var("FLUX_USER")
            .map(SmolStr::from)
            .unwrap_or_else(|_| SmolStr::new_static(Self::DEFAULT_USER));

        Ok(Self {
            host,
            username,
            token: std::env::var("FLUX_TOKEN").ok(),
            channel: std::env::var("FLUX_CHANNEL").ok().map(SmolStr::from),
            request_timeout: millis_from_env("FLUX_REQUEST_TIMEOUT_MS")?
                .unwrap_or(Self::DEFAULT_REQUEST_TIMEOUT),
            join_timeout: millis_from_env("FLUX_JOIN_TIMEOUT_MS")?
                .unwrap_or(Self::DEFAULT_JOIN_TIMEOUT),
        })
    }

    /// The channel joined on connect.
    pub fn channel(&self) -> &str {
        self.channel.as_deref().unwrap_or(&self.username)
    }

    /// Loads the configuration from the provided loader.
    pub async fn load(loader: &impl Loader) -> Result<Self, ConfigError> {
        loader.load().await
    }

    /// Saves the configuration using the provided saver.
    pub async fn save(&self, saver: &impl Saver) -> Result<(), ConfigError> {
        saver.save(self).await
    }
}

impl Default for FluxConfig {
    fn default() -> Self {
        Self {
            host: Url::parse(Self::DEFAULT_HOST).expect("default host is a valid url"),
            username: SmolStr::new_static(Self::DEFAULT_USER),
            token: None,
            channel: None,
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
            join_timeout: Self::DEFAULT_JOIN_TIMEOUT,
        }
    }
}

fn millis_from_env(var: &'static str) -> Result<Option<Duration>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        Err(_) => Ok(None),
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// The trait for loading configuration data.
pub trait Loader {
    /// Loads the configuration data.
    fn load(&self) -> impl Future<Output = Result<FluxConfig, ConfigError>> + Send;
}

/// The trait for saving configuration data.
pub trait Saver {
    /// Saves the configuration data.
    fn save(&self, config: &FluxConfig) -> impl Future<Output = Result<(), ConfigError>> + Send;
}

/// An implementation of [`Loader`] and [`Saver`] that reads and writes a configuration file.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Create a new [`FileStore`] with the given path.
    ///
    /// [`FluxConfig`] data will be serialized and deserialized using the file extension,
    /// either `.json` or `.toml`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn read(&self) -> Result<String, ConfigError> {
        std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn write(&self, contents: String) -> Result<(), ConfigError> {
        std::fs::write(&self.path, contents).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn parse_error(&self, message: impl ToString) -> ConfigError {
        ConfigError::Parse {
            path: self.path.clone(),
            message: message.to_string(),
        }
    }
}

impl Loader for FileStore {
    async fn load(&self) -> Result<FluxConfig, ConfigError> {
        match self.path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&self.read()?).map_err(|e| self.parse_error(e)),
            Some("toml") => toml::from_str(&self.read()?).map_err(|e| self.parse_error(e)),
            _ => Err(ConfigError::UnsupportedFormat {
                path: self.path.clone(),
            }),
        }
    }
}

impl Saver for FileStore {
    async fn save(&self, config: &FluxConfig) -> Result<(), ConfigError> {
        let contents = match self.path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::to_string_pretty(config).map_err(|e| self.parse_error(e))?,
            Some("toml") => toml::to_string_pretty(config).map_err(|e| self.parse_error(e))?,
            _ => {
                return Err(ConfigError::UnsupportedFormat {
                    path: self.path.clone(),
                });
            }
        };
        self.write(contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_defaults_to_username() {
        let mut config = FluxConfig::default();
        assert_eq!(config.channel(), "defaultuser");

        config.channel = Some("shared".into());
        assert_eq!(config.channel(), "shared");
    }

    #[test]
    fn test_json_timeouts_default_when_absent() {
        let config: FluxConfig =
            serde_json::from_str(r#"{"host":"ws://relay.test/flux","username":"alice"}"#).unwrap();

        assert_eq!(config.username, "alice");
        assert_eq!(config.request_timeout, FluxConfig::DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.join_timeout, FluxConfig::DEFAULT_JOIN_TIMEOUT);
    }

    #[test]
    fn test_json_round_trips_host() {
        let config: FluxConfig =
            serde_json::from_str(r#"{"host":"ws://relay.test/flux","username":"alice"}"#).unwrap();
        let json = serde_json::to_value(&config).unwrap();

        assert_eq!(json["host"], "ws://relay.test/flux");
        assert_eq!(json["username"], "alice");
    }

    #[test]
    fn test_json_timeouts_are_millis() {
        let config: FluxConfig = serde_json::from_str(
            r#"{"host":"ws://relay.test/flux","username":"alice","requestTimeout":1500}"#,
        )
        .unwrap();

        assert_eq!(config.request_timeout, Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_file_store_unsupported_extension() {
        let store = FileStore::new("flux.yaml");
        let err = FluxConfig::load(&store).await.unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat { .. }));
    }
}

use std::time::Duration;

use clap::Parser;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::api::ApiClient;
use crate::error::Result;
use crate::session::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_END_OF_TURN_MARKER, DEFAULT_EVENT_CAPACITY, SessionSettings,
};
use crate::transport::StreamEndpoint;

/// Prefix of environment overrides, e.g. `ASSISTANT_STREAM__URL`.
pub const ENV_PREFIX: &str = "ASSISTANT";

/// Config file picked up from the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about = "Terminal chat with a streaming AI assistant", long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// REST base URL of the backend
    #[arg(long, env = "API_URL")]
    pub api_url: Option<String>,

    /// WebSocket base URL of the backend
    #[arg(long, env = "WS_URL")]
    pub ws_url: Option<String>,

    /// Account email
    #[arg(long, env = "CHAT_EMAIL")]
    pub email: Option<String>,

    /// Account password
    #[arg(long, env = "CHAT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Use an existing access token instead of logging in
    #[arg(long, env = "CHAT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Register the account before logging in
    #[arg(long)]
    pub register: bool,

    /// Thread to open (defaults to the first listed thread, or a new one)
    #[arg(long)]
    pub thread: Option<String>,

    /// Assistant to talk to (defaults to the first listed assistant)
    #[arg(long)]
    pub assistant: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub stream: StreamConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub url: String,
    /// Empty disables end-of-turn detection.
    pub end_of_turn_marker: String,
    /// 0 disables the handshake bound.
    pub connect_timeout_secs: u64,
    /// 0 disables the reply timeout.
    pub reply_timeout_secs: u64,
    pub event_capacity: usize,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Self::from_cli(&cli)
    }

    /// Layering: defaults, config file, `ASSISTANT_` environment, CLI flags.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("api.base_url", "http://localhost:8000")?
            .set_default("stream.url", "ws://localhost:8000")?
            .set_default("stream.end_of_turn_marker", DEFAULT_END_OF_TURN_MARKER)?
            .set_default("stream.connect_timeout_secs", DEFAULT_CONNECT_TIMEOUT.as_secs())?
            .set_default("stream.reply_timeout_secs", 0)?
            .set_default("stream.event_capacity", DEFAULT_EVENT_CAPACITY as u64)?;

        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder.add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false)),
        };

        // E.g. ASSISTANT_STREAM__REPLY_TIMEOUT_SECS=30
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(url) = &cli.api_url {
            builder = builder.set_override("api.base_url", url.as_str())?;
        }
        if let Some(url) = &cli.ws_url {
            builder = builder.set_override("stream.url", url.as_str())?;
        }

        let cfg = builder.build()?;
        Ok(cfg.try_deserialize()?)
    }

    pub fn api_client(&self) -> Result<ApiClient> {
        ApiClient::new(&self.api.base_url)
    }
}

impl StreamConfig {
    pub fn endpoint(&self) -> Result<StreamEndpoint> {
        Ok(StreamEndpoint::parse(&self.url)?)
    }

    pub fn session_settings(&self) -> SessionSettings {
        let optional_secs = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));
        SessionSettings {
            end_of_turn_marker: (!self.end_of_turn_marker.is_empty())
                .then(|| self.end_of_turn_marker.clone()),
            connect_timeout: optional_secs(self.connect_timeout_secs),
            reply_timeout: optional_secs(self.reply_timeout_secs),
            event_capacity: self.event_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_config() -> StreamConfig {
        StreamConfig {
            url: "ws://localhost:8000".to_string(),
            end_of_turn_marker: DEFAULT_END_OF_TURN_MARKER.to_string(),
            connect_timeout_secs: 10,
            reply_timeout_secs: 0,
            event_capacity: 256,
        }
    }

    #[test]
    fn test_default_session_settings() {
        let settings = stream_config().session_settings();
        assert_eq!(settings, SessionSettings::default());
    }

    #[test]
    fn test_zero_and_empty_disable() {
        let config = StreamConfig {
            end_of_turn_marker: String::new(),
            connect_timeout_secs: 0,
            reply_timeout_secs: 45,
            ..stream_config()
        };
        let settings = config.session_settings();
        assert_eq!(settings.end_of_turn_marker, None);
        assert_eq!(settings.connect_timeout, None);
        assert_eq!(settings.reply_timeout, Some(Duration::from_secs(45)));
    }

    #[test]
    fn test_bad_stream_url() {
        let config = StreamConfig {
            url: "::nope::".to_string(),
            ..stream_config()
        };
        assert!(config.endpoint().is_err());
    }
}

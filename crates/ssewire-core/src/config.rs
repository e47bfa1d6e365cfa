//! Configuration loading and validation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level ssewire configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Settings for the stream notifier and its default HTTP collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,

    /// Extra headers added to every stream request. `Accept` is always overridden.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_token_env: Option<String>,

    /// Capacity of the event channel used by the CLI watcher.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Hand out an event left pending when the stream ends without a blank line.
    #[serde(default)]
    pub dispatch_partial_on_eof: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: None,
            connect_timeout_secs: None,
            headers: BTreeMap::new(),
            bearer_token: None,
            bearer_token_env: None,
            channel_capacity: default_channel_capacity(),
            dispatch_partial_on_eof: false,
        }
    }
}

impl ClientConfig {
    /// Resolve the bearer token: check `bearer_token` first, then `bearer_token_env`.
    pub fn resolve_bearer_token(&self) -> Option<String> {
        resolve_secret_field(&self.bearer_token, &self.bearer_token_env)
    }
}

fn default_channel_capacity() -> usize {
    16
}

/// Settings for the event-stream server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Reconnection delay hint sent to clients at stream start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_ms: Option<u64>,

    /// Per-connection outgoing queue size.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: None,
            retry_ms: None,
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_port() -> u16 {
    8089
}

fn default_queue_capacity() -> usize {
    16
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "ssewire_server=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret from a direct value or an environment variable name.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

static ENV_VAR_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern"));

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR_RE
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    ///
    /// A missing file yields the default configuration.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::SseError::Io)?;

        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::SseError::Config(e.to_string()))?;

        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Default config file location.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn client(&self) -> ClientConfig {
        self.client.clone().unwrap_or_default()
    }

    pub fn server(&self) -> ServerConfig {
        self.server.clone().unwrap_or_default()
    }

    pub fn server_port(&self) -> u16 {
        self.server.as_ref().map(|s| s.port).unwrap_or_else(default_port)
    }

    pub fn server_bind(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.bind.clone())
            .unwrap_or_else(|| "127.0.0.1".to_string())
    }

    /// Reconnection hint for upgraded connections. Zero means none.
    pub fn retry(&self) -> Option<Duration> {
        self.server
            .as_ref()
            .and_then(|s| s.retry_ms)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Validate the config. Returns `(warnings, errors)`.
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(server) = &self.server {
            if server.queue_capacity == 0 {
                errors.push("server.queue_capacity must be greater than zero".to_string());
            }
            if let Some(bind) = &server.bind {
                if bind.parse::<std::net::IpAddr>().is_err() {
                    errors.push(format!("server.bind is not an IP address: {bind}"));
                }
            }
        }

        if let Some(client) = &self.client {
            if client.channel_capacity == 0 {
                errors.push("client.channel_capacity must be greater than zero".to_string());
            }
            if client.bearer_token_env.is_some() && client.resolve_bearer_token().is_none() {
                warnings.push("client.bearer_token_env is set but the variable is empty".to_string());
            }
            for name in client.headers.keys() {
                if name.eq_ignore_ascii_case("accept") {
                    warnings.push("client.headers.Accept is always overridden".to_string());
                }
            }
        }

        if let Some(logging) = &self.logging {
            if logging.format != "plain" && logging.format != "json" {
                errors.push(format!("Unknown logging.format: {}", logging.format));
            }
            if logging.output != "stderr" && logging.output != "stdout" {
                errors.push(format!("Unknown logging.output: {}", logging.output));
            }
        }

        (warnings, errors)
    }
}

pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ssewire")
}
